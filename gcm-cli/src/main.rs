//! git credential helper for Azure DevOps.
//!
//! git invokes the helper with an operation and writes the request to stdin.
//!
//! # Usage
//!
//! ```bash
//! # Register the helper
//! git config --global credential.helper manager
//!
//! # Pin the authority for a host instead of probing it
//! git config --global credential.https://account.visualstudio.com.authority AAD
//!
//! # What git runs
//! printf 'protocol=https\nhost=account.visualstudio.com\n\n' | git-credential-manager get
//! ```

mod commands;
mod logging;
mod protocol;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gcm_core::locate::find_git_dir;
use gcm_core::Configuration;
use std::io::Write;

use protocol::OperationArguments;

#[derive(Parser)]
#[command(name = "git-credential-manager")]
#[command(about = "Secure git credentials for Azure DevOps and Microsoft Account hosts")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Return credentials for the host described on stdin
    #[command(alias = "fill")]
    Get,

    /// Save credentials git used successfully
    #[command(alias = "approve")]
    Store,

    /// Forget credentials the host rejected
    #[command(alias = "reject")]
    Erase,

    /// Print the helper's version
    Version,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Get,
    Store,
    Erase,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Get => run(Operation::Get).await,
        Commands::Store => run(Operation::Store).await,
        Commands::Erase => run(Operation::Erase).await,
        Commands::Version => {
            println!("{} version {}", env!("CARGO_BIN_NAME"), env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    };

    if let Err(e) = result {
        let _ = commands::fatal(&e, &mut std::io::stdout());
    }
}

async fn run(operation: Operation) -> Result<()> {
    let mut args = OperationArguments::from_reader(std::io::stdin().lock())?;
    let target = args
        .target_uri()?
        .context("git did not supply a protocol and host")?;

    let cwd = std::env::current_dir().context("failed to read the current directory")?;
    let config = Configuration::load(&cwd).context("failed to read git configuration")?;
    args.load_configuration(&config, Some(&target));

    let log_dir = if args.write_log {
        find_git_dir(&cwd)
    } else {
        None
    };
    logging::init(log_dir.as_deref());
    tracing::debug!(?operation, ?args, "credential request");

    let factory = commands::create_factory(&args).await?;
    let authentication = commands::authentication_for(&args, &target, &factory).await?;

    match operation {
        Operation::Get => {
            let response = commands::get(args, &target, &authentication).await?;
            print!("{}", response);
            std::io::stdout().flush()?;
        }
        Operation::Store => commands::store(&args, &target, &authentication).await?,
        Operation::Erase => commands::erase(&target, &authentication).await?,
    }

    Ok(())
}
