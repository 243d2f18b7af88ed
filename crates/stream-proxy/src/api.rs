//! HTTP handlers.
//!
//! - `GET /audio/{id}`: upstream response forwarded as it arrives.
//! - `GET /stream/audio/{id}`: same upstream body, re-cut into fixed-size pieces with a
//!   pause between them so clients see incremental delivery.
//! - `GET /routes`, `GET /health`.

use std::pin::Pin;
use std::time::Duration;

use actix_web::body::SizedStream;
use actix_web::http::StatusCode;
use actix_web::http::header::{HeaderName, HeaderValue};
use actix_web::{HttpResponse, Responder, get, web};
use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt, stream::unfold};
use serde::Serialize;
use stream_types::RoutesResponse;

use crate::config::RechunkSettings;
use crate::routes::RouteTable;

/// Shared state for all handlers.
pub struct ProxyState {
    pub client: reqwest::Client,
    pub routes: RouteTable,
    pub rechunk: RechunkSettings,
}

impl ProxyState {
    pub fn new(routes: RouteTable, rechunk: RechunkSettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            routes,
            rechunk,
        }
    }
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[get("/health")]
pub async fn health() -> impl Responder {
    HttpResponse::Ok().json(HealthResponse { status: "ok" })
}

#[get("/routes")]
pub async fn list_routes(state: web::Data<ProxyState>) -> impl Responder {
    HttpResponse::Ok().json(RoutesResponse {
        routes: state.routes.infos(),
    })
}

/// Forward the mapped upstream unchanged.
#[get("/audio/{id}")]
pub async fn proxy_audio(state: web::Data<ProxyState>, path: web::Path<String>) -> HttpResponse {
    let id = path.into_inner();
    forward(&state, &id, None).await
}

/// Forward the mapped upstream in fixed-size, delayed pieces.
#[get("/stream/audio/{id}")]
pub async fn stream_audio(state: web::Data<ProxyState>, path: web::Path<String>) -> HttpResponse {
    let id = path.into_inner();
    forward(&state, &id, Some(state.rechunk)).await
}

/// Fallback for unknown paths.
pub async fn not_found() -> HttpResponse {
    HttpResponse::NotFound()
        .content_type("text/plain; charset=utf-8")
        .body("Not found")
}

/// Response headers copied from upstream. Length is carried by the body; CORS by middleware.
const FORWARDED_HEADERS: [&str; 6] = [
    "content-type",
    "accept-ranges",
    "cache-control",
    "etag",
    "last-modified",
    "content-disposition",
];

async fn forward(state: &ProxyState, id: &str, rechunk: Option<RechunkSettings>) -> HttpResponse {
    let Some(url) = state.routes.get(id) else {
        return not_found().await;
    };

    let upstream = match state.client.get(url).send().await {
        Ok(resp) => resp,
        Err(e) => {
            tracing::warn!(id, url, error = %e, "upstream request failed");
            return HttpResponse::InternalServerError()
                .content_type("text/plain; charset=utf-8")
                .body(format!("Proxy error: {e}"));
        }
    };

    let status =
        StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    tracing::info!(
        id,
        url,
        status = status.as_u16(),
        content_length = ?upstream.content_length(),
        chunked = rechunk.is_some(),
        "proxying audio"
    );

    let mut builder = HttpResponse::build(status);
    for name in FORWARDED_HEADERS {
        if let Some(value) = upstream.headers().get(name) {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_bytes(value.as_bytes()),
            ) {
                builder.insert_header((name, value));
            }
        }
    }

    let content_length = upstream.content_length();
    let body: Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>>>> = match rechunk {
        Some(settings) => Box::pin(rechunk_stream(
            upstream.bytes_stream(),
            settings.chunk_bytes,
            settings.delay,
        )),
        None => Box::pin(upstream.bytes_stream()),
    };
    match content_length {
        Some(len) => builder.body(SizedStream::new(len, body)),
        None => builder.streaming(body),
    }
}

struct Rechunk<S> {
    upstream: Pin<Box<S>>,
    pending: BytesMut,
    chunk_bytes: usize,
    delay: Duration,
    emitted: bool,
    done: bool,
}

/// Re-cut `upstream` into pieces of exactly `chunk_bytes` (the last one may be shorter),
/// sleeping `delay` before every piece after the first.
///
/// An upstream error is passed through and ends the stream.
pub fn rechunk_stream<S, E>(
    upstream: S,
    chunk_bytes: usize,
    delay: Duration,
) -> impl Stream<Item = Result<Bytes, E>>
where
    S: Stream<Item = Result<Bytes, E>>,
{
    unfold(
        Rechunk {
            upstream: Box::pin(upstream),
            pending: BytesMut::new(),
            chunk_bytes: chunk_bytes.max(1),
            delay,
            emitted: false,
            done: false,
        },
        |mut ctx| async move {
            loop {
                if ctx.pending.len() >= ctx.chunk_bytes || (ctx.done && !ctx.pending.is_empty()) {
                    if ctx.emitted && !ctx.delay.is_zero() {
                        tokio::time::sleep(ctx.delay).await;
                    }
                    ctx.emitted = true;
                    let n = ctx.chunk_bytes.min(ctx.pending.len());
                    let piece = ctx.pending.split_to(n).freeze();
                    return Some((Ok(piece), ctx));
                }
                if ctx.done {
                    return None;
                }
                match ctx.upstream.next().await {
                    Some(Ok(bytes)) => ctx.pending.extend_from_slice(&bytes),
                    Some(Err(e)) => {
                        ctx.done = true;
                        ctx.pending.clear();
                        return Some((Err(e), ctx));
                    }
                    None => ctx.done = true,
                }
            }
        },
    )
}
