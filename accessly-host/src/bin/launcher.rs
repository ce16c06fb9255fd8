//! Accessly launcher - keeps the kiosk main running under supervision

use accessly_host::config::KioskConfig;
use accessly_host::env::KioskEnv;
use accessly_host::process::ProcessControl;
use accessly_host::status::RestStatusSource;
use accessly_host::supervisor::{ProcessLauncher, Supervisor};
use accessly_host::{dialog, logging, net};
use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;

async fn launch(guard: &mut Option<WorkerGuard>) -> Result<i32> {
    if let Some(name) = ProcessControl::current_executable_name() {
        if ProcessControl::is_running(&name) {
            info!("{} is already running", name);
            return Ok(0);
        }
    }

    let env = KioskEnv::detect(None).context("Failed to detect kiosk environment")?;
    let config = KioskConfig::load(&env).await?;
    *guard = logging::init(&env.logs_dir(), "launcher", true);
    info!("🚀 Accessly launcher starting for user {}", env.user());

    let source = RestStatusSource::new(net::http_client(), config.status.clone());
    let launcher = ProcessLauncher::new(env.clone(), config.clone());
    let mut supervisor = Supervisor::new(env, config.supervisor.clone(), launcher);

    let outcome = supervisor.run(&source).await;
    info!("Launcher finished: {:?}", outcome);
    Ok(outcome.exit_code())
}

#[tokio::main]
async fn main() {
    let mut guard = None;
    let code = match launch(&mut guard).await {
        Ok(code) => code,
        Err(e) => {
            error!("Launcher failed: {:#}", e);
            dialog::show_error("Launcher Error", &format!("{:#}", e));
            1
        }
    };
    drop(guard);
    std::process::exit(code);
}
