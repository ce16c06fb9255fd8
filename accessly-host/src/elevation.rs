//! Run a command line under the kiosk Administrator account
//!
//! Thin wrapper over `CreateProcessWithLogonW`. A failure is reported to the
//! caller only; whether to retry or ignore is the caller's decision.

use crate::config::KioskConfig;
use crate::error::{KioskError, KioskResult};
use std::path::Path;
use tracing::{debug, info};

#[derive(Clone)]
pub struct Credentials {
    pub account: String,
    pub domain: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("account", &self.account)
            .field("domain", &self.domain)
            .finish_non_exhaustive()
    }
}

impl Credentials {
    pub fn from_config(config: &KioskConfig) -> KioskResult<Self> {
        let password = config.elevation_password().ok_or_else(|| {
            KioskError::Elevation(format!(
                "No password configured for {}",
                config.elevation.account
            ))
        })?;
        Ok(Self {
            account: config.elevation.account.clone(),
            domain: config.elevation.domain.clone(),
            password,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElevatedOutcome {
    Started { pid: u32 },
    Exited { pid: u32, exit_code: u32 },
}

/// Build a Windows command line, quoting arguments that need it.
pub fn command_line(program: &Path, args: &[&str]) -> String {
    let mut line = quote_arg(&program.to_string_lossy());
    for arg in args {
        line.push(' ');
        line.push_str(&quote_arg(arg));
    }
    line
}

fn quote_arg(arg: &str) -> String {
    if !arg.is_empty() && !arg.contains([' ', '\t', '"']) {
        return arg.to_string();
    }
    let mut quoted = String::from("\"");
    let mut backslashes = 0;
    for c in arg.chars() {
        match c {
            '\\' => backslashes += 1,
            '"' => {
                quoted.push_str(&"\\".repeat(backslashes * 2 + 1));
                quoted.push('"');
                backslashes = 0;
            }
            other => {
                quoted.push_str(&"\\".repeat(backslashes));
                quoted.push(other);
                backslashes = 0;
            }
        }
    }
    quoted.push_str(&"\\".repeat(backslashes * 2));
    quoted.push('"');
    quoted
}

/// Launch `command_line` as `creds`. With `wait`, block until the process
/// exits and return its exit code.
pub async fn run_elevated(
    command_line: &str,
    creds: &Credentials,
    wait: bool,
) -> KioskResult<ElevatedOutcome> {
    debug!("Running as {}\\{}: {}", creds.domain, creds.account, command_line);
    let command_line = command_line.to_string();
    let creds = creds.clone();

    let outcome = tokio::task::spawn_blocking(move || platform::create_with_logon(&command_line, &creds, wait))
        .await
        .map_err(|e| KioskError::Elevation(format!("Join error: {}", e)))??;

    match outcome {
        ElevatedOutcome::Started { pid } => info!("Started, PID: {}", pid),
        ElevatedOutcome::Exited { pid, exit_code } => {
            info!("Process {} exited with code {}", pid, exit_code)
        }
    }
    Ok(outcome)
}

#[cfg(windows)]
mod platform {
    use super::{Credentials, ElevatedOutcome};
    use crate::error::{KioskError, KioskResult};
    use std::ffi::OsStr;
    use std::os::windows::ffi::OsStrExt;
    use std::ptr;
    use winapi::shared::minwindef::DWORD;
    use winapi::um::errhandlingapi::GetLastError;
    use winapi::um::handleapi::CloseHandle;
    use winapi::um::processthreadsapi::{GetExitCodeProcess, PROCESS_INFORMATION, STARTUPINFOW};
    use winapi::um::synchapi::WaitForSingleObject;
    use winapi::um::winbase::{CreateProcessWithLogonW, CREATE_NEW_CONSOLE, INFINITE, LOGON_WITH_PROFILE};

    fn wide(s: &str) -> Vec<u16> {
        OsStr::new(s).encode_wide().chain(std::iter::once(0)).collect()
    }

    pub fn create_with_logon(
        command_line: &str,
        creds: &Credentials,
        wait: bool,
    ) -> KioskResult<ElevatedOutcome> {
        let user = wide(&creds.account);
        let domain = wide(&creds.domain);
        let password = wide(&creds.password);
        // The API may write into the command line buffer.
        let mut cmd = wide(command_line);

        let mut si: STARTUPINFOW = unsafe { std::mem::zeroed() };
        si.cb = std::mem::size_of::<STARTUPINFOW>() as DWORD;
        let mut pi: PROCESS_INFORMATION = unsafe { std::mem::zeroed() };

        let ok = unsafe {
            CreateProcessWithLogonW(
                user.as_ptr(),
                domain.as_ptr(),
                password.as_ptr(),
                LOGON_WITH_PROFILE,
                ptr::null(),
                cmd.as_mut_ptr(),
                CREATE_NEW_CONSOLE,
                ptr::null_mut(),
                ptr::null(),
                &mut si,
                &mut pi,
            )
        };
        if ok == 0 {
            let code = unsafe { GetLastError() };
            return Err(KioskError::Elevation(format!(
                "CreateProcessWithLogonW failed: {}",
                std::io::Error::from_raw_os_error(code as i32)
            )));
        }

        let pid = pi.dwProcessId;
        let outcome = if wait {
            let mut exit_code: DWORD = 0;
            unsafe {
                WaitForSingleObject(pi.hProcess, INFINITE);
                GetExitCodeProcess(pi.hProcess, &mut exit_code);
            }
            ElevatedOutcome::Exited { pid, exit_code }
        } else {
            ElevatedOutcome::Started { pid }
        };

        unsafe {
            CloseHandle(pi.hThread);
            CloseHandle(pi.hProcess);
        }
        Ok(outcome)
    }
}

#[cfg(not(windows))]
mod platform {
    use super::{Credentials, ElevatedOutcome};
    use crate::error::{KioskError, KioskResult};

    pub fn create_with_logon(
        _command_line: &str,
        creds: &Credentials,
        _wait: bool,
    ) -> KioskResult<ElevatedOutcome> {
        Err(KioskError::Elevation(format!(
            "Logon as {} is only supported on Windows",
            creds.account
        )))
    }
}
