use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use proxyherd::config::{Cli, ServerConfig};
use proxyherd::server::Server;

#[tokio::main]
async fn main() -> Result<()> {
    // Use JSON logs in production (PROXYHERD_LOG_JSON=1), human-readable otherwise.
    let json_logs = std::env::var("PROXYHERD_LOG_JSON").unwrap_or_default() == "1";
    let filter = EnvFilter::from_default_env().add_directive("proxyherd=info".parse()?);
    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let cli = Cli::parse();
    let config = ServerConfig::resolve(cli.server_id);
    let server = Server::new(config);
    server.run().await
}
