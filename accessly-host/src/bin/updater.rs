//! Accessly updater - installs new releases while the kiosk is idle

use accessly_host::config::KioskConfig;
use accessly_host::env::{KioskEnv, ONLY_USER};
use accessly_host::process::ProcessControl;
use accessly_host::updater::{Updater, UpdaterOptions};
use accessly_host::{dialog, logging};
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;

/// Delay before a fatal exit so the dialog and log can be read.
const FATAL_EXIT_DELAY: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(name = "accessly-updater", about = "Kiosk self-updater", version)]
struct Args {
    /// Install base directory
    #[arg(long = "dir")]
    dir: Option<PathBuf>,

    /// Kiosk account the install belongs to
    #[arg(long, default_value = ONLY_USER)]
    user: String,

    /// Direct archive URL instead of the release feed
    #[arg(long = "update")]
    update: Option<String>,

    /// Keep running without the launcher
    #[arg(long)]
    force: bool,
}

async fn update(args: Args, guard: &mut Option<WorkerGuard>) -> Result<()> {
    let env = KioskEnv::detect(Some(&args.user)).context("Failed to detect kiosk environment")?;
    let config = KioskConfig::load(&env).await?;
    *guard = logging::init(&env.logs_dir(), "updater", true);
    ProcessControl::check_admin("Updater");

    let options = UpdaterOptions {
        base_dir: args.dir,
        direct_url: args.update,
        force: args.force,
    };
    let mut updater = Updater::new(env, config, options)?;
    info!("Updater watching {}", updater.host().env().base_dir().display());
    updater.run().await?;
    Ok(())
}

#[tokio::main]
async fn main() {
    let mut guard = None;
    let args = Args::parse();
    if let Err(e) = update(args, &mut guard).await {
        error!("Updater stopped: {:#}", e);
        dialog::show_error("Updater Error", &format!("{:#}", e));
        tokio::time::sleep(FATAL_EXIT_DELAY).await;
        drop(guard);
        std::process::exit(1);
    }
}
