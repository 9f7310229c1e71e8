// Star Coins - Development Proxy
// Forwards /api/* to the remote points API with CORS headers attached.

use anyhow::{Context, Result};
use star_coins::{proxy, ProxyConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,star_coins=debug,tower_http=debug")),
        )
        .init();

    let config = ProxyConfig::from_env();
    let addr = config.listen_addr;

    println!("🚀 Proxy server running at http://{}", addr);
    println!("📡 API proxy: {}/* -> {}{}/*", config.prefix, config.target, config.rewrite);
    println!();
    println!("Point the page's API base at http://{}{}", addr, config.prefix);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    axum::serve(listener, proxy::router(config))
        .await
        .context("Proxy server failed")?;

    Ok(())
}
