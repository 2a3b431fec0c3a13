//! KEYLEDGER Node Binary

use clap::{Parser, Subcommand};
use keyledger_core::NodeConfig;
use keyledger_node::NodeBuilder;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "keyledger-node")]
#[command(about = "KEYLEDGER Node - development state service for signed records")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the node
    Run {
        /// Configuration file path (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// API listen address
        #[arg(long)]
        listen_addr: Option<String>,

        /// Data directory; state stays in memory when omitted
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Require HTTP Basic auth with this user
        #[arg(long)]
        auth_user: Option<String>,

        /// Password for --auth-user
        #[arg(long)]
        auth_password: Option<String>,

        /// Log level, overridden by RUST_LOG
        #[arg(long)]
        log_level: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            listen_addr,
            data_dir,
            auth_user,
            auth_password,
            log_level,
        } => {
            let base = match config {
                Some(path) => NodeConfig::from_file(&path)?,
                None => NodeConfig::default(),
            };

            let mut builder = NodeBuilder::new().config(base);
            if let Some(addr) = listen_addr {
                builder = builder.listen_addr(&addr);
            }
            if let Some(dir) = data_dir {
                builder = builder.data_dir(dir);
            }
            if let Some(user) = auth_user {
                builder = builder.auth(&user, auth_password.as_deref());
            }
            if let Some(level) = log_level {
                builder = builder.log_level(&level);
            }
            let config = builder.build_config();

            init_logging(&config.log_level);
            info!("Listening address: {}", config.listen_addr);

            let node = NodeBuilder::new().config(config).build()?;
            node.start().await?;
        }
    }

    Ok(())
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
