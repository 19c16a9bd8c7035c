use std::path::PathBuf;

use clap::Parser;
use singer_messages::{IngestConfig, IngestLimits};
use tokio::runtime::{Handle, Runtime};
use tracing::{debug, info};

use crate::buffer::RecordBuffer;
use crate::checkpoint::emit_state;
use crate::config::TargetConfig;
use crate::dispatcher::Target;
use crate::error::TargetError;
use crate::flush::FlushCoordinator;
use crate::storage::ObjectStoreBlobs;
use crate::usage::spawn_usage_report;

#[derive(Debug, Parser)]
#[command(name = "target-azureblobstorage")]
#[command(about = "Singer target that lands stream records as CSV blobs in Azure Blob Storage")]
#[command(version)]
pub struct Args {
    /// Config file (JSON).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Local staging directory (default: `$HOME/<container_name>`).
    #[arg(long)]
    pub staging_dir: Option<PathBuf>,

    /// Longest accepted input line, in bytes.
    #[arg(long, default_value_t = IngestLimits::default().max_line_bytes)]
    pub max_line_bytes: usize,
}

pub fn run(args: Args) -> Result<(), TargetError> {
    let config = TargetConfig::load(args.config.as_deref())?;
    debug!(?config, "loaded config");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name("target-io")
        .enable_all()
        .build()
        .map_err(TargetError::Runtime)?;

    if !config.disable_collection {
        info!(
            "Sending version information to singer.io. To disable sending anonymous usage data, \
             set the config parameter \"disable_collection\" to true"
        );
        spawn_usage_report(runtime.handle());
    }

    let outcome = run_pipeline(args, config, runtime.handle().clone());
    release_runtime(runtime, outcome)?;
    debug!("Exiting normally");
    Ok(())
}

fn run_pipeline(args: Args, config: TargetConfig, runtime: Handle) -> Result<(), TargetError> {
    let store = ObjectStoreBlobs::azure(&config, runtime)?;
    let staging_dir = args
        .staging_dir
        .unwrap_or_else(|| config.default_staging_dir());
    let buffer = RecordBuffer::open(staging_dir)?;
    let target = Target::new(buffer, FlushCoordinator::new(store, config.container_name));

    let ingest = IngestConfig::default()
        .with_max_line_bytes(args.max_line_bytes)
        .capture_failed_lines(true);
    let state = target.persist_lines(std::io::stdin().lock(), ingest)?;

    emit_state(&mut std::io::stdout().lock(), state.as_ref()).map_err(TargetError::Output)?;
    Ok(())
}

/// Shuts the runtime down without waiting on the usage ping, on success and
/// failure alike.
fn release_runtime<T>(
    runtime: Runtime,
    outcome: Result<T, TargetError>,
) -> Result<T, TargetError> {
    runtime.shutdown_background();
    outcome
}
