use rmcp::{ServiceExt, transport::stdio};

use botbridge::config::BridgeConfig;
use botbridge::server::BridgeServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // The MCP client decides our working directory, so prefer a .env beside
    // the binary.
    let beside_binary = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(".env")))
        .filter(|path| path.exists());
    match beside_binary {
        Some(path) => {
            dotenvy::from_path(&path).ok();
        }
        None => {
            dotenvy::dotenv().ok();
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    tracing::info!("botbridge starting");

    let config = BridgeConfig::load();
    let server = BridgeServer::new(config)?;

    let service = server
        .serve(stdio())
        .await
        .inspect_err(|e| tracing::error!("serving error: {e:?}"))?;

    service.waiting().await?;

    tracing::info!("botbridge shutting down");
    Ok(())
}
