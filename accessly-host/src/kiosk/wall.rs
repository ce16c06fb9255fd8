//! Console login wall
//!
//! `Locked -> Validating -> LoggedIn -> Locked`. Besides student ids the
//! wall understands two hidden inputs: `destruct` stops the kiosk for good
//! and `cmd [args]` opens the elevated console.

use super::idle::IdleState;
use super::roster::Roster;
use super::session_log::{ensure_log, format_elapsed, log_login, log_logout, now_stamp};
use crate::config::KioskConfig;
use crate::elevation::{command_line, run_elevated, Credentials};
use crate::env::{pc_name, KioskEnv};
use crate::error::KioskResult;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{error, info, warn};

const LOGOUT_PAUSE: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WallInput {
    Destruct,
    Cmd(Vec<String>),
    StudentId(String),
}

impl WallInput {
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        if line == "destruct" {
            return Some(WallInput::Destruct);
        }
        if line == "cmd" || line.starts_with("cmd ") {
            let args = line.split_whitespace().skip(1).map(str::to_string).collect();
            return Some(WallInput::Cmd(args));
        }
        Some(WallInput::StudentId(line.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginAttempt {
    Denied,
    /// An update holds the kiosk.
    Blocked,
    Granted { display_name: String },
}

/// Why the wall stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WallExit {
    Destruct,
    InputClosed,
}

pub struct LoginWall {
    env: KioskEnv,
    config: KioskConfig,
    idle: IdleState,
    roster: Roster,
    pc_name: String,
    logout_pause: Duration,
}

impl LoginWall {
    /// Prepare the session log and load the allow-list.
    pub fn new(env: KioskEnv, config: KioskConfig, idle: IdleState) -> KioskResult<Self> {
        ensure_log(&env.log_file())?;
        let roster = Roster::load(&env.student_csv())?;
        Ok(Self {
            env,
            config,
            idle,
            roster,
            pc_name: pc_name(),
            logout_pause: LOGOUT_PAUSE,
        })
    }

    pub fn with_logout_pause(mut self, pause: Duration) -> Self {
        self.logout_pause = pause;
        self
    }

    pub async fn login(&self, student_id: &str) -> KioskResult<LoginAttempt> {
        let Some(name) = self.roster.display_name(student_id) else {
            info!("Access denied: {}", student_id);
            return Ok(LoginAttempt::Denied);
        };
        if !self.idle.login().await {
            return Ok(LoginAttempt::Blocked);
        }
        log_login(&self.env.log_file(), student_id, &self.pc_name, &now_stamp())?;
        Ok(LoginAttempt::Granted {
            display_name: name.to_string(),
        })
    }

    pub async fn logout(&self, student_id: &str) -> KioskResult<()> {
        log_logout(&self.env.log_file(), student_id, &now_stamp())?;
        self.idle.logout().await;
        Ok(())
    }

    /// Leave the destruct flag for the launcher.
    pub fn destruct(&self) -> KioskResult<()> {
        let flag = self.env.safe_path(self.env.flag_destruct_file())?;
        if let Some(parent) = flag.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&flag, b"")?;
        info!("Destruct flag written: {}", flag.display());
        Ok(())
    }

    /// Start the console elevated; no args means `--user <default user>`.
    pub async fn launch_cmd(&self, args: &[String]) -> KioskResult<()> {
        let default_args = ["--user".to_string(), self.config.kiosk.default_user.clone()];
        let args = if args.is_empty() { &default_args[..] } else { args };
        let args: Vec<&str> = args.iter().map(String::as_str).collect();

        let creds = Credentials::from_config(&self.config)?;
        run_elevated(&command_line(&self.env.script_cmd(), &args), &creds, false).await?;
        Ok(())
    }

    /// Drive the wall from `input` until `destruct` or end of input.
    pub async fn run<R, W>(&mut self, input: R, mut output: W) -> KioskResult<WallExit>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = input.lines();
        loop {
            output.write_all(b"Student ID: ").await?;
            output.flush().await?;
            let Some(line) = lines.next_line().await? else {
                return Ok(WallExit::InputClosed);
            };
            self.idle.touch().await;

            match WallInput::parse(&line) {
                None => continue,
                Some(WallInput::Destruct) => {
                    self.destruct()?;
                    return Ok(WallExit::Destruct);
                }
                Some(WallInput::Cmd(args)) => {
                    if let Err(e) = self.launch_cmd(&args).await {
                        error!("Could not open console: {}", e);
                        output.write_all(format!("Console unavailable: {}\n", e).as_bytes()).await?;
                    }
                }
                Some(WallInput::StudentId(id)) => match self.login(&id).await? {
                    LoginAttempt::Denied => {
                        output.write_all(b"Access Denied: Invalid Student ID!\n").await?;
                    }
                    LoginAttempt::Blocked => {
                        output.write_all(b"Kiosk is updating, please wait.\n").await?;
                    }
                    LoginAttempt::Granted { display_name } => {
                        output.write_all(format!("Welcome {}\n", display_name).as_bytes()).await?;
                        if !self.session(&id, &mut lines, &mut output).await? {
                            return Ok(WallExit::InputClosed);
                        }
                        self.roster = Roster::load(&self.env.student_csv())?;
                    }
                },
            }
        }
    }

    /// Logged-in prompt until `logout`. False when input ended first.
    async fn session<R, W>(
        &self,
        student_id: &str,
        lines: &mut tokio::io::Lines<R>,
        output: &mut W,
    ) -> KioskResult<bool>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let start = Instant::now();
        loop {
            let prompt = format!("[{}] type 'logout' to end: ", format_elapsed(start.elapsed().as_secs()));
            output.write_all(prompt.as_bytes()).await?;
            output.flush().await?;

            let Some(line) = lines.next_line().await? else {
                warn!("Input closed during session of {}", student_id);
                return Ok(false);
            };
            if line.trim().eq_ignore_ascii_case("logout") {
                self.logout(student_id).await?;
                output.write_all(b"You have successfully logged out!\n").await?;
                output.flush().await?;
                tokio::time::sleep(self.logout_pause).await;
                return Ok(true);
            }
        }
    }
}
