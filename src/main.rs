//! blocksync CLI - synchronise block devices over the network.

use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;

use blocksync::config::{timeout_from_secs, Config, CONFIG_ENV};
use blocksync::logging::init_logging;
use blocksync::progress::{IndicatifCallback, LogCallback, ProgressCallback};
use blocksync::server::run_server;
use blocksync::sync::server_mode::{sync_push, PushOptions, TargetLocation};
use blocksync::transport::server::SshConfig;
use blocksync::{DigestAlgorithm, TargetSync};

/// Synchronise block devices over the network, sending only changed blocks
#[derive(Parser)]
#[command(name = "blocksync")]
#[command(version)]
#[command(about = "Synchronise block devices over the network")]
#[command(long_about = None)]
struct Cli {
    /// Increase log verbosity (target: -v info, -vv debug; source logs at info by default)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Configuration file
    #[arg(long, env = CONFIG_ENV, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve a device to a source over stdin/stdout (started by `source`)
    Target {
        /// Device (or file) to bring in sync
        device: PathBuf,

        /// Block size in bytes
        #[arg(short, long)]
        block_size: Option<u64>,

        /// Digest algorithm
        #[arg(short, long, value_enum)]
        digest: Option<DigestAlgorithm>,

        /// Number of bytes to synchronise (defaults to the whole device)
        #[arg(long)]
        length: Option<u64>,

        /// Seconds to wait for each message from the source (0 disables)
        #[arg(long, value_name = "SECS")]
        io_timeout: Option<u64>,
    },

    /// Push a local device to a target device
    Source {
        /// Source device
        srcdev: PathBuf,

        /// [user@]hostname of the target
        uhost: String,

        /// Destination device (defaults to the source device path)
        dstdev: Option<String>,

        /// Block size in bytes
        #[arg(short, long)]
        block_size: Option<u64>,

        /// SSH port
        #[arg(short, long, env = "BLOCKSYNC_SSH_PORT")]
        port: Option<u16>,

        /// Command that runs blocksync on the target host
        #[arg(short = 'c', long = "command", env = "BLOCKSYNC_REMOTE_COMMAND")]
        remote_command: Option<String>,

        /// Digest algorithm
        #[arg(short, long, value_enum)]
        digest: Option<DigestAlgorithm>,

        /// SSH identity file
        #[arg(short, long)]
        identity: Option<PathBuf>,

        /// Extra SSH option (repeatable)
        #[arg(short = 'o', long = "ssh-option")]
        ssh_options: Vec<String>,

        /// Run the target as a local subprocess instead of over SSH
        #[arg(long)]
        local: bool,

        /// Log progress lines instead of drawing a progress bar
        #[arg(long)]
        no_progress: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if !std::io::stderr().is_terminal() {
        colored::control::set_override(false);
    }

    // The source reports progress through info lines.
    let verbosity = match cli.command {
        Commands::Source { .. } => cli.verbose.saturating_add(1),
        Commands::Target { .. } => cli.verbose,
    };
    if let Err(e) = init_logging(verbosity, cli.quiet) {
        eprintln!("{} failed to initialise logging: {}", "warning:".yellow(), e);
    }

    let result = tokio::select! {
        result = run(cli) => result,
        _ = tokio::signal::ctrl_c() => Err(anyhow::anyhow!("interrupted")),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            // A timed-out stdin read leaves its blocking thread behind, so
            // don't wait for the runtime to shut down.
            std::process::exit(1)
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Target {
            device,
            block_size,
            digest,
            length,
            io_timeout,
        } => {
            let target = TargetSync::new(
                device,
                block_size.unwrap_or(config.sync.block_size),
                digest.unwrap_or(config.sync.digest),
            )
            .with_length(length);
            let io_timeout = io_timeout.map_or(config.io_timeout(), timeout_from_secs);
            run_server(target, io_timeout).await?;
            Ok(())
        }
        Commands::Source {
            srcdev,
            uhost,
            dstdev,
            block_size,
            port,
            remote_command,
            digest,
            identity,
            ssh_options,
            local,
            no_progress,
        } => {
            let dest = dstdev.unwrap_or_else(|| srcdev.to_string_lossy().into_owned());

            let location = if local {
                TargetLocation::Local {
                    program: remote_command.map(PathBuf::from),
                }
            } else {
                let (user, hostname) = SshConfig::parse_destination(&uhost);
                let mut options = config.ssh.options.clone();
                options.extend(ssh_options);
                TargetLocation::Remote(SshConfig {
                    hostname,
                    user: user.or_else(|| config.ssh.user.clone()),
                    port: port.unwrap_or(config.ssh.port),
                    identity_file: identity.or_else(|| config.ssh.identity_file.clone()),
                    options,
                    remote_command: remote_command
                        .unwrap_or_else(|| config.ssh.remote_command.clone()),
                })
            };

            let progress: Arc<dyn ProgressCallback> =
                if no_progress || cli.quiet || !std::io::stderr().is_terminal() {
                    Arc::new(LogCallback::default())
                } else {
                    Arc::new(IndicatifCallback::new())
                };

            let options = PushOptions {
                block_size: block_size.unwrap_or(config.sync.block_size),
                digest: digest.unwrap_or(config.sync.digest),
                progress,
            };

            let stats = sync_push(&srcdev, &location, &dest, &config, options).await?;

            if !cli.quiet {
                eprintln!(
                    "\n{} in {} seconds: same: {}, diff: {}, {:.1} MB/s",
                    "Completed".green().bold(),
                    stats.elapsed.as_secs(),
                    stats.same_blocks,
                    stats.diff_blocks,
                    stats.bytes_per_sec() / (1024.0 * 1024.0)
                );
            }
            Ok(())
        }
    }
}
