//! KEYLEDGER CLI - Command Line Interface

use anyhow::{bail, Context};
use clap::{ArgAction, Parser, Subcommand};
use colored::Colorize;
use dialoguer::Password;
use indicatif::{ProgressBar, ProgressStyle};
use keyledger_cli::{default_key_dir, KeyManager, LedgerClient, SubmitOutcome};
use keyledger_core::{BatchStatus, ClientConfig};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "keyledger")]
#[command(about = "KEYLEDGER - signed record store client")]
#[command(version)]
struct Cli {
    /// Client configuration file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// REST API URL of the state service
    #[arg(long, global = true)]
    url: Option<String>,

    /// Directory holding `<username>.priv` key files
    #[arg(long, global = true)]
    key_dir: Option<PathBuf>,

    /// Name of the signing key, defaults to $USER
    #[arg(long, global = true)]
    username: Option<String>,

    /// HTTP Basic auth user
    #[arg(long, global = true)]
    auth_user: Option<String>,

    /// HTTP Basic auth password, prompted for when omitted
    #[arg(long, global = true)]
    auth_password: Option<String>,

    /// Seconds to wait for the batch to commit; without a value, wait until it does
    #[arg(long, global = true, num_args = 0..=1, require_equals = true, value_name = "SECS")]
    wait: Option<Option<u64>>,

    /// More output (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a record
    Create {
        key: String,
        batch_nr: String,
    },

    /// Change the batch number of a record
    Update {
        key: String,
        batch_nr: String,
    },

    /// Delete a record
    Delete {
        key: String,
    },

    /// Show one record
    Show {
        key: String,
    },

    /// List all records
    List,

    /// Generate a signing key
    Keygen {
        /// Key name, defaults to the username
        #[arg(long)]
        name: Option<String>,

        /// Overwrite existing key files
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = match &cli.config {
        Some(path) => ClientConfig::from_file(path)?,
        None => ClientConfig::default(),
    };
    if let Some(url) = &cli.url {
        config.service_url = url.clone();
    }
    if let Some(user) = &cli.auth_user {
        config.auth_user = Some(user.clone());
    }
    if let Some(password) = &cli.auth_password {
        config.auth_password = Some(password.clone());
    }
    if config.auth_user.is_some() && config.auth_password.is_none() {
        let password = Password::new()
            .with_prompt("Auth password")
            .allow_empty_password(true)
            .interact()
            .context("failed to read auth password")?;
        config.auth_password = Some(password);
    }
    match cli.wait {
        Some(Some(secs)) => config.wait_timeout = secs,
        Some(None) => config.wait_timeout = u64::MAX,
        None => {}
    }

    let username = cli.username.clone().unwrap_or_else(default_username);
    let key_dir = match &cli.key_dir {
        Some(dir) => dir.clone(),
        None => default_key_dir()?,
    };

    match cli.command {
        Commands::Create { key, batch_nr } => {
            let client = writer(&config, &key_dir, &username)?;
            let outcome = with_spinner(
                &config,
                format!("Creating {}", key),
                client.create(&key, &[batch_nr], wait(&config)),
            )
            .await??;
            report(&outcome)?;
        }

        Commands::Update { key, batch_nr } => {
            let client = writer(&config, &key_dir, &username)?;
            let outcome = with_spinner(
                &config,
                format!("Updating {}", key),
                client.update(&key, &[batch_nr], wait(&config)),
            )
            .await??;
            report(&outcome)?;
        }

        Commands::Delete { key } => {
            let client = writer(&config, &key_dir, &username)?;
            let outcome = with_spinner(
                &config,
                format!("Deleting {}", key),
                client.delete(&key, wait(&config)),
            )
            .await??;
            report(&outcome)?;
        }

        Commands::Show { key } => {
            let client = LedgerClient::with_signer(&config, None)?;
            match client.get_record(&key).await? {
                Some(record) => println!("{}", record),
                None => bail!("no record with key {}", key),
            }
        }

        Commands::List => {
            let client = LedgerClient::with_signer(&config, None)?;
            let mut count = 0usize;
            for record in client.list_all().await? {
                println!("{}", record?);
                count += 1;
            }
            if count == 0 {
                println!("{}", "No records found.".dimmed());
            }
        }

        Commands::Keygen { name, force } => {
            let name = name.unwrap_or(username);
            let info = KeyManager::new(key_dir).generate(&name, force)?;
            println!("{} Key '{}' created", "✓".green(), info.name);
            println!("Public key:  {}", info.public_key);
            println!("Private key: {}", info.private_path.display());
        }
    }

    Ok(())
}

/// Client that signs with the configured key file or `<key_dir>/<username>.priv`
fn writer(config: &ClientConfig, key_dir: &Path, username: &str) -> anyhow::Result<LedgerClient> {
    let client = match &config.key_file {
        Some(_) => LedgerClient::new(config)?,
        None => {
            let keypair = KeyManager::new(key_dir.to_path_buf()).load(username)?;
            LedgerClient::with_signer(config, Some(keypair))?
        }
    };
    Ok(client)
}

fn wait(config: &ClientConfig) -> Duration {
    Duration::from_secs(config.wait_timeout)
}

async fn with_spinner<T>(
    config: &ClientConfig,
    message: String,
    work: impl Future<Output = T>,
) -> anyhow::Result<T> {
    if config.wait_timeout == 0 {
        return Ok(work.await);
    }

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner} {msg} ({elapsed})")?);
    spinner.set_message(message);
    spinner.enable_steady_tick(Duration::from_millis(100));

    let result = work.await;
    spinner.finish_and_clear();
    Ok(result)
}

fn report(outcome: &SubmitOutcome) -> anyhow::Result<()> {
    match outcome.status {
        BatchStatus::Committed => {
            println!("{} {}", "COMMITTED".green().bold(), outcome.batch_id);
        }
        BatchStatus::Pending => {
            println!("{} {}", "PENDING".yellow().bold(), outcome.batch_id);
        }
        BatchStatus::Invalid => {
            println!("{} {}", "INVALID".red().bold(), outcome.batch_id);
            for message in &outcome.messages {
                println!("  {}", message);
            }
            bail!("batch was rejected");
        }
        BatchStatus::Unknown => {
            println!("{} {}", "UNKNOWN".red().bold(), outcome.batch_id);
            bail!("the service does not know the batch");
        }
    }
    Ok(())
}

fn default_username() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "default".to_string())
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
