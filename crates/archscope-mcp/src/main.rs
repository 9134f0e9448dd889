mod init;
mod server;
mod watch;

use rmcp::ServiceExt;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::server::ArchscopeServer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // stdout carries the protocol.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let base = std::env::current_dir()?;

    // `archscope-mcp init` registers the server with local MCP clients.
    if std::env::args().nth(1).as_deref() == Some("init") {
        let written = init::init_project(&base).inspect_err(|e| error!(error = %e, "init failed"))?;
        info!(files = written.len(), "init finished; ask your assistant to run `build_graph`");
        return Ok(());
    }

    info!(base = %base.display(), "starting archscope-mcp");
    let server = ArchscopeServer::new(base);
    let shutdown = server.shutdown_token();

    let service = server
        .serve(rmcp::transport::io::stdio())
        .await
        .inspect_err(|e| error!(error = %e, "MCP server error"))?;
    let result = service.waiting().await;
    shutdown.cancel();
    result?;
    Ok(())
}
