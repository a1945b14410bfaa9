// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use btrfs_hibernate::{
    config::{Layout, DEFAULT_CONFIG_PATH},
    host::SystemHost,
    reconcile::{Reconciler, Report},
    size::SwapSize,
};

use anyhow::{Context, Result};
use clap::Parser;
use std::{
    fs::read_to_string,
    path::{Path, PathBuf},
    process::exit,
};
use tracing::{debug, error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Set up swapfile hibernation on a btrfs root file system.
#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "btrfs-hibernate [options] [swap_size]",
    version
)]
struct Cli {
    /// Size of swapfile, e.g., "32G" [default: physical memory + 2G].
    #[arg(value_name = "swap_size")]
    pub swap_size: Option<SwapSize>,

    /// Path to layout configuration file.
    #[arg(short, long, value_name = "path")]
    pub config: Option<PathBuf>,
}

impl Cli {
    fn run(self) -> Result<()> {
        let layout = load_layout(self.config.as_deref())?;
        debug!("using layout:\n{layout}");

        let reconciler = Reconciler::new(SystemHost::new(), layout);
        let report = reconciler.run(self.swap_size)?;
        summarize(&report);

        Ok(())
    }
}

fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_timer(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = run() {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

fn run() -> Result<()> {
    Cli::parse().run()
}

fn load_layout(path: Option<&Path>) -> Result<Layout> {
    let (path, required) = match path {
        Some(path) => (path, true),
        None => (Path::new(DEFAULT_CONFIG_PATH), false),
    };

    // INVARIANT: Only an explicitly requested configuration file must exist.
    if !required && !path.exists() {
        return Ok(Layout::default());
    }

    let data = read_to_string(path)
        .with_context(|| format!("failed to read configuration {:?}", path.display()))?;
    let layout = data
        .parse()
        .with_context(|| format!("failed to parse configuration {:?}", path.display()))?;

    Ok(layout)
}

fn summarize(report: &Report) {
    if !report.changed_configuration() {
        info!("host already set up for hibernation, nothing changed");
    }

    info!(
        "swapfile backed by {} with {}",
        report.device.display(),
        report.resume
    );
    info!(
        "bootloader: {}, initramfs: {}",
        report.boot.bootloader, report.initramfs.generator
    );
    info!("reboot, then test with \"systemctl hibernate\"");
}
