//! HTTP server wiring.

use std::net::SocketAddr;

use actix_cors::Cors;
use actix_web::middleware::Logger;
use actix_web::{App, HttpServer, web};
use anyhow::{Context, Result};

use crate::api;

/// Any origin may read audio; only `GET` and preflight are served.
pub fn cors() -> Cors {
    Cors::default()
        .allow_any_origin()
        .send_wildcard()
        .allowed_methods(vec!["GET", "OPTIONS"])
        .allowed_header(actix_web::http::header::CONTENT_TYPE)
        .max_age(3600)
}

/// Register all routes plus the 404 fallback.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(api::health)
        .service(api::list_routes)
        .service(api::proxy_audio)
        .service(api::stream_audio)
        .default_service(web::route().to(api::not_found));
}

/// Serve until the actix system stops.
pub async fn run(bind: SocketAddr, state: web::Data<api::ProxyState>) -> Result<()> {
    tracing::info!(
        %bind,
        routes = state.routes.len(),
        chunk_bytes = state.rechunk.chunk_bytes,
        delay_ms = state.rechunk.delay.as_millis() as u64,
        "starting stream-proxy"
    );
    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(cors())
            .wrap(Logger::default().exclude("/health"))
            .configure(configure)
    })
    .bind(bind)
    .with_context(|| format!("bind {bind}"))?
    .run()
    .await
    .context("http server")?;
    Ok(())
}
