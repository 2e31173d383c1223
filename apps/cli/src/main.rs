//! PhotoTransfer command-line front-end.
//!
//! Connects to a phone, plans which photos and videos are worth pulling,
//! and drives the transfer queue with progress output. Interrupted runs
//! leave a queue-state file next to the destination and are resumed on
//! the next invocation.

mod config;

use std::path::Path;

use anyhow::{bail, Context};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use phototransfer_device::{
    detect_any, AfcHandler, DeviceHandler, MockDevice, MtpHandler, StorageInfo,
};
use phototransfer_index::PhotoIndex;
use phototransfer_planner::{finish_sync, plan_sync, PlanOptions, SyncPlan};
use phototransfer_transfer::{paths, TransferQueue};

/// Transfer photos and videos from a phone into a local, deduplicated
/// library organized by date.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Destination folder for transferred media.
    #[arg(short, long)]
    destination: Option<String>,

    /// Device type: android, ios or auto.
    #[arg(short = 't', long)]
    device_type: Option<String>,

    /// Transfer all media, not just items newer than the last sync.
    #[arg(short, long)]
    all: bool,

    /// List media found on the device without transferring.
    #[arg(short, long)]
    list_only: bool,

    /// Run against a built-in demo device instead of real hardware.
    #[arg(long)]
    demo: bool,

    /// Reset the saved configuration to defaults.
    #[arg(long)]
    reset_config: bool,
}

/// Index database, kept inside the destination root.
const INDEX_FILE: &str = ".photo_transfer.db";
/// Queue-state file for crash resume, kept next to the index.
const STATE_FILE: &str = ".photo_transfer.queue";

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    run(Args::parse())
}

fn run(args: Args) -> anyhow::Result<()> {
    if args.reset_config {
        config::Config::default().save()?;
        println!("Configuration reset to defaults.");
    }
    let config = config::Config::load()?;

    let destination = args.destination.unwrap_or(config.destination);
    let device_type = args.device_type.unwrap_or(config.device_type);
    let only_new = !args.all && config.transfer_mode != "all";

    let mut handler = create_handler(&device_type, args.demo)?;
    handler
        .connect(None)
        .context("failed to connect to the device")?;

    println!("=== PhotoTransfer ===");
    println!(
        "Device: {} ({} {})",
        handler.device_name(),
        handler.manufacturer(),
        handler.model()
    );
    println!("Type: {}", handler.device_type());
    match handler.storages() {
        Ok(storages) => print_storages(&storages),
        Err(e) => tracing::warn!(error = %e, "could not read storage info"),
    }

    let dest_root = paths::expand_home(&destination);
    std::fs::create_dir_all(&dest_root).with_context(|| {
        format!("failed to create destination directory {}", dest_root.display())
    })?;

    let index = PhotoIndex::open(&dest_root.join(INDEX_FILE))
        .context("failed to open the transfer index")?;

    let plan = plan_sync(handler.as_ref(), &index, PlanOptions { only_new })?;
    println!(
        "Found {} media files on device; {} planned ({:.1} MB).",
        plan.enumerated,
        plan.items.len(),
        plan.total_bytes as f64 / (1024.0 * 1024.0)
    );

    if args.list_only {
        print_listing(&plan);
        handler.disconnect();
        return Ok(());
    }

    let state_path = dest_root.join(STATE_FILE);
    let outcome = run_queue(handler.as_ref(), &index, &destination, &state_path, &plan)?;

    finish_sync(&index)?;
    handler.disconnect();

    println!("\n=== Summary ===");
    println!("Transferred: {}", outcome.completed);
    println!("Skipped (already present): {}", outcome.skipped);
    println!("Failed: {}", outcome.failed);
    println!(
        "Bytes transferred: {:.1} MB",
        outcome.transferred_bytes as f64 / (1024.0 * 1024.0)
    );
    println!(
        "Library: {} files, {:.1} MB total",
        index.count()?,
        index.total_bytes_transferred()? as f64 / (1024.0 * 1024.0)
    );

    if outcome.failed > 0 {
        bail!("{} transfers failed; run again to retry", outcome.failed);
    }
    Ok(())
}

struct RunOutcome {
    completed: usize,
    skipped: usize,
    failed: usize,
    transferred_bytes: u64,
}

/// Builds the queue (resuming saved state when it has unfinished work),
/// runs it to completion, and persists or clears the state file.
fn run_queue(
    handler: &dyn DeviceHandler,
    index: &PhotoIndex,
    destination: &str,
    state_path: &Path,
    plan: &SyncPlan,
) -> anyhow::Result<RunOutcome> {
    let mut queue = TransferQueue::new();
    queue.set_destination(destination);
    queue.set_handler(handler);
    queue.set_index(index);

    let loaded = queue.load_state(state_path)?;
    if loaded && queue.has_incomplete() {
        println!(
            "Resuming {} unfinished transfers from a previous run.",
            queue
                .items()
                .iter()
                .filter(|i| !i.status.is_terminal())
                .count()
        );
    } else {
        queue.clear();
        for media in &plan.items {
            queue.add(media.clone());
        }
    }

    queue.set_completed_callback(|item| {
        println!(
            "  + {} ({:.1} KB)",
            item.media.filename,
            item.media.size as f64 / 1024.0
        );
    });
    queue.set_failed_callback(|item| {
        println!("  ! {}: {}", item.media.filename, item.error_message);
    });

    println!("\nTransferring {} items...", queue.len());
    queue.start();

    let stats = queue.stats();
    if queue.has_incomplete() || stats.failed > 0 {
        queue
            .save_state(state_path)
            .context("failed to save queue state")?;
        println!("Queue state saved to {}.", state_path.display());
    } else if state_path.exists() {
        let _ = std::fs::remove_file(state_path);
    }

    Ok(RunOutcome {
        completed: stats.completed,
        skipped: stats.skipped,
        failed: stats.failed,
        transferred_bytes: stats.transferred_bytes,
    })
}

fn create_handler(device_type: &str, demo: bool) -> anyhow::Result<Box<dyn DeviceHandler>> {
    if demo {
        return Ok(Box::new(MockDevice::demo()));
    }

    match device_type {
        "android" => {
            let mut handler = MtpHandler::new();
            if !handler.detect()? {
                bail!("no Android device detected; connect the phone and enable File Transfer mode");
            }
            Ok(Box::new(handler))
        }
        "ios" => {
            let mut handler = AfcHandler::new();
            if !handler.detect()? {
                bail!("no iOS device detected; connect the phone and trust this computer");
            }
            Ok(Box::new(handler))
        }
        "auto" => detect_any().context("no supported device detected"),
        other => bail!("unknown device type '{other}' (expected android, ios or auto)"),
    }
}

fn print_storages(storages: &[StorageInfo]) {
    for storage in storages {
        if storage.capacity == 0 {
            println!("Storage: {}", storage.description);
            continue;
        }
        let total_gb = storage.capacity as f64 / (1024.0 * 1024.0 * 1024.0);
        let free_gb = storage.free as f64 / (1024.0 * 1024.0 * 1024.0);
        println!(
            "Storage: {} ({:.1} GB total, {:.1} GB free)",
            storage.description, total_gb, free_gb
        );
    }
}

fn print_listing(plan: &SyncPlan) {
    const MAX_DISPLAY: usize = 10;
    for media in plan.items.iter().take(MAX_DISPLAY) {
        println!(
            "  {} ({:.1} KB, {})",
            media.device_path,
            media.size as f64 / 1024.0,
            media.mime_type
        );
    }
    if plan.items.len() > MAX_DISPLAY {
        println!("  ... and {} more", plan.items.len() - MAX_DISPLAY);
    }
}
