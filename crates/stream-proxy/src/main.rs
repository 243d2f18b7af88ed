//! Stream proxy: forwards mapped upstream audio with permissive CORS.
//!
//! `/audio/{id}` passes the upstream body through untouched; `/stream/audio/{id}` re-cuts it
//! into small delayed pieces so a progressive client can be exercised against a fast origin.

mod api;
mod config;
mod routes;
mod startup;

use std::path::PathBuf;

use actix_web::web;
use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::config::{ProxyConfig, bind_from_config, rechunk_from_config, routes_from_config};

#[derive(Parser, Debug)]
#[command(name = "stream-proxy")]
struct Args {
    /// HTTP bind address, e.g. 0.0.0.0:8080 (overrides the config file)
    #[arg(long)]
    bind: Option<String>,

    /// Optional TOML config with routes and chunking settings
    #[arg(long)]
    config: Option<PathBuf>,
}

#[actix_web::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,actix_web=info,stream_proxy=info")
        }))
        .init();

    let mut cfg = match args.config.as_deref() {
        Some(path) => ProxyConfig::load(path)?,
        None => ProxyConfig::default(),
    };
    if let Some(bind) = args.bind {
        cfg.bind = Some(bind);
    }
    let bind = bind_from_config(&cfg)?;
    let state = web::Data::new(api::ProxyState::new(
        routes_from_config(&cfg)?,
        rechunk_from_config(&cfg)?,
    ));

    let system = actix_web::rt::System::current();
    let _ = ctrlc::set_handler(move || {
        tracing::info!("interrupt received; shutting down");
        system.stop();
    });

    startup::run(bind, state).await
}
