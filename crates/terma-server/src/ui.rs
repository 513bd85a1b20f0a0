use std::net::SocketAddr;
use std::path::PathBuf;

use axum::Router;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

/// Directory the static UI is served from. `TERMA_UI_DIR` overrides the
/// `ui/` default next to the working directory.
pub fn ui_dir() -> PathBuf {
    std::env::var("TERMA_UI_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("ui"))
}

/// Serve the static terminal UI.
pub async fn run_ui_server(addr: SocketAddr, dir: PathBuf) -> anyhow::Result<()> {
    if !dir.exists() {
        tracing::warn!(dir = %dir.display(), "UI directory does not exist; serving it anyway");
    }

    let app = Router::new()
        .fallback_service(ServeDir::new(&dir).append_index_html_on_directories(true))
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("UI server listening on {} (serving {})", addr, dir.display());
    axum::serve(listener, app).await?;
    Ok(())
}
