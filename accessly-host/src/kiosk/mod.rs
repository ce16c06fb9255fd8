//! Kiosk main process: login wall, allow-list, session log, idle channel

pub mod idle;
pub mod roster;
pub mod session_log;
pub mod wall;

use crate::config::KioskConfig;
use crate::env::KioskEnv;
use crate::error::KioskResult;
use idle::IdleState;
use tracing::{info, warn};
use wall::{LoginWall, WallExit};

/// Run the wall on the process console with the idle channel and the idle
/// flag file alongside it.
pub async fn run_console(env: KioskEnv, config: KioskConfig) -> KioskResult<WallExit> {
    let idle = IdleState::new(config.kiosk.idle_after()).with_flag_file(env.flag_idle_file());
    let mut wall = LoginWall::new(env, config.clone(), idle.clone())?;

    let server = match idle::bind(config.kiosk.idle_port).await {
        Ok(listener) => Some(tokio::spawn(idle::serve(listener, idle.clone()))),
        Err(e) => {
            warn!("Idle channel unavailable: {}", e);
            None
        }
    };
    let watchdog = idle.spawn_flag_watchdog();

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let result = wall.run(stdin, tokio::io::stdout()).await;

    watchdog.abort();
    if let Some(server) = server {
        server.abort();
    }
    remove_idle_flag(&idle);
    info!("Login wall stopped: {:?}", result);
    result
}

fn remove_idle_flag(idle: &IdleState) {
    if let Some(flag) = idle.flag_file() {
        if flag.exists() {
            let _ = std::fs::remove_file(flag);
        }
    }
}
