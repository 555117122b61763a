//! Offline garbage collector for an on-disk docker registry.
//!
//! Unreferenced images are moved to the delete path and stale `_index_images` entries are
//! dropped.  The registry must not be written to while this runs.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use registry_gc::{
    config::{GcConfig, DEFAULT_DELETE_PATH, DEFAULT_REGISTRY_PATH},
    gc,
    report::disk_usage,
};

/// registry-gc
#[derive(Debug, Parser)]
#[clap(name = "registry-gc", version)]
pub struct App {
    /// Path where your images and metadata are stored
    #[clap(long, default_value = DEFAULT_REGISTRY_PATH)]
    registry_path: PathBuf,
    /// Path where deleted images and metadata will be stored
    #[clap(long, default_value = DEFAULT_DELETE_PATH)]
    delete_path: PathBuf,
    /// Don't perform any destructive changes on disk
    #[clap(long)]
    dry_run: bool,
    /// Don't report the size of the delete path when done
    #[clap(long)]
    no_report: bool,
}

impl App {
    fn config(&self) -> GcConfig {
        GcConfig::new(&self.registry_path, &self.delete_path).with_dry_run(self.dry_run)
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = App::parse();
    let config = args.config();

    println!("{}", config.registry_path.display());
    println!("{}", config.delete_path.display());

    let result = gc::collect(&config)?;

    for id in &result.unreferenced {
        println!("Unused image: {id}");
    }
    println!("{:?}", result.repositories);
    println!(
        "{} images scanned, {} reachable, {} unreferenced, {} quarantined ({} bytes), {} removed",
        result.images_scanned,
        result.reachable,
        result.unreferenced.len(),
        result.quarantined.len(),
        result.bytes_quarantined,
        result.removed,
    );
    println!(
        "{} indexes rewritten, {} index entries removed",
        result.indexes_rewritten, result.index_entries_removed
    );
    for failure in &result.failures {
        println!("{failure}");
    }

    if !args.no_report {
        if config.delete_path.is_dir() {
            match disk_usage(&config.delete_path) {
                Ok(total) => println!("{total}\t{}", config.delete_path.display()),
                Err(e) => log::error!("{e:#}"),
            }
        } else {
            log::info!("{} does not exist, nothing to report", config.delete_path.display());
        }
    }

    Ok(())
}
