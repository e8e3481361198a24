//! Entry point wiring a [`policy_engine::Storage`] to a filesystem
//! checkpoint directory.
//!
//! The socket/IPC protocol, event loop, and CLI argument parsing a real
//! daemon needs are out of scope for this crate. What this binary
//! demonstrates is the ambient scaffolding a real one would be built on
//! — configuration, structured logging — plus two subcommands that
//! exercise `dump`/`load` against a real directory tree:
//!
//! - `policy-daemon checkpoint` — dump an empty, root-only store to
//!   `POLICY_ENGINE_DATA_DIR` as a sanity check that the directory is
//!   writable and the atomic commit path works.
//! - `policy-daemon restore` — load whatever checkpoint is there and
//!   report the bucket count.

mod config;

use anyhow::Context;
use tracing::info;

use config::DaemonConfig;
use policy_backend::FsStreamFactory;
use policy_engine::{persist, PolicyResult, Storage};

fn main() -> anyhow::Result<()> {
    let config = DaemonConfig::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .json()
        .init();

    let command = std::env::args().nth(1).unwrap_or_else(|| "checkpoint".to_owned());
    info!(data_dir = %config.data_dir.display(), command = %command, "policy-daemon starting");

    match command.as_str() {
        "checkpoint" => run_checkpoint(&config),
        "restore" => run_restore(&config),
        other => anyhow::bail!("unknown subcommand: {other} (expected `checkpoint` or `restore`)"),
    }
}

fn run_checkpoint(config: &DaemonConfig) -> anyhow::Result<()> {
    let storage = Storage::new(PolicyResult::deny());
    let factory = FsStreamFactory::begin_checkpoint(&config.data_dir)
        .with_context(|| format!("opening checkpoint directory {}", config.data_dir.display()))?;
    persist::dump(&storage, &factory).context("writing checkpoint")?;
    factory.commit().context("committing checkpoint")?;
    info!("checkpoint written");
    Ok(())
}

fn run_restore(config: &DaemonConfig) -> anyhow::Result<()> {
    let factory = FsStreamFactory::open(&config.data_dir)
        .with_context(|| format!("opening data directory {}", config.data_dir.display()))?;
    let mut storage = Storage::new(PolicyResult::deny());
    persist::load(&mut storage, &factory).context("loading checkpoint")?;
    info!(bucket_count = storage.backend().bucket_ids_in_order().len(), "checkpoint restored");
    Ok(())
}
