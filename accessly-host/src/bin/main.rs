//! Accessly main - the console login wall

use accessly_host::config::KioskConfig;
use accessly_host::env::KioskEnv;
use accessly_host::kiosk::{self, wall::WallExit};
use accessly_host::process::ProcessControl;
use accessly_host::{dialog, logging, UI_CRASH_EXIT_CODE};
use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;

async fn run(guard: &mut Option<WorkerGuard>) -> Result<WallExit> {
    let env = KioskEnv::detect(None).context("Failed to detect kiosk environment")?;
    let config = KioskConfig::load(&env).await?;
    *guard = logging::init(&env.logs_dir(), "main", false);
    ProcessControl::check_admin("Main");

    env.prepare_dirs().context("Failed to prepare kiosk directories")?;
    Ok(kiosk::run_console(env, config).await?)
}

#[tokio::main]
async fn main() {
    let mut guard = None;
    let code = match run(&mut guard).await {
        Ok(WallExit::Destruct) => {
            info!("Kiosk stopped by destruct");
            0
        }
        Ok(WallExit::InputClosed) => {
            error!("Kiosk console input closed");
            UI_CRASH_EXIT_CODE
        }
        Err(e) => {
            error!("Kiosk crashed: {:#}", e);
            dialog::show_error("Kiosk Error", &format!("{:#}", e));
            UI_CRASH_EXIT_CODE
        }
    };
    drop(guard);
    std::process::exit(code);
}
