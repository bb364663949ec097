use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

mod api;
mod cache;
mod codec;
mod compress;
mod config;
mod document;
mod error;
mod imaging;
mod service;
mod storage;

use crate::codec::Codecs;
use crate::config::load_static_config;
use crate::service::RenderService;
use crate::storage::DirectoryStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    info!("Starting Docfit service v{}", env!("CARGO_PKG_VERSION"));

    let static_config = load_static_config()?;

    info!(
        host = %static_config.server.host,
        port = static_config.server.port,
        data_dir = %static_config.storage.data_dir.display(),
        "Configuration loaded"
    );

    // Uploads land here; make sure lookups never fail on a missing root
    std::fs::create_dir_all(&static_config.storage.data_dir)?;

    let store = Arc::new(DirectoryStore::new(&static_config.storage.data_dir));
    let service = Arc::new(RenderService::new(
        static_config.render.clone(),
        store,
        Codecs::default(),
    ));

    let (photo_w, photo_h) = static_config.render.photo_box();
    let (sig_w, sig_h) = static_config.render.signature_box();
    info!(
        dpi = static_config.render.dpi,
        photo = %format!("{}x{}", photo_w, photo_h),
        signature = %format!("{}x{}", sig_w, sig_h),
        "Render service initialized"
    );

    let app = api::router(service, &static_config.server);

    let addr = format!(
        "{}:{}",
        static_config.server.host, static_config.server.port
    );
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let format = fmt::format()
        .with_target(true)
        .with_thread_ids(true)
        .compact();

    // RUST_LOG wins; otherwise info for this crate
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("docfit_service=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().event_format(format))
        .with(filter)
        .init();
}
