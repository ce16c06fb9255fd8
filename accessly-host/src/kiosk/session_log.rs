//! Login/logout log (`StudentLogs.csv`)
//!
//! Rows are appended on login with an empty logout time. Logout rewrites
//! the file, filling the last open row of that student.

use crate::error::KioskResult;
use chrono::Local;
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use std::fs::OpenOptions;
use std::path::Path;
use tracing::{info, warn};

pub const HEADER: [&str; 4] = ["StudentID", "PC_Name", "Login_Time", "Logout_Time"];
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn now_stamp() -> String {
    Local::now().format(TIME_FORMAT).to_string()
}

/// Create the log with its header when missing.
pub fn ensure_log(path: &Path) -> KioskResult<()> {
    if path.exists() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = WriterBuilder::new().from_path(path)?;
    writer.write_record(HEADER)?;
    writer.flush()?;
    Ok(())
}

/// Append an open session row for `student_id`.
pub fn log_login(path: &Path, student_id: &str, pc_name: &str, login_time: &str) -> KioskResult<()> {
    ensure_log(path)?;
    let file = OpenOptions::new().append(true).open(path)?;
    let mut writer = WriterBuilder::new().from_writer(file);
    writer.write_record([student_id, pc_name, login_time, ""])?;
    writer.flush()?;
    info!("Login: {} on {}", student_id, pc_name);
    Ok(())
}

/// Fill the logout time of the most recent open row for `student_id`.
/// Returns false when no open row was found.
pub fn log_logout(path: &Path, student_id: &str, logout_time: &str) -> KioskResult<bool> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;
    let mut rows: Vec<StringRecord> = reader.records().collect::<Result<_, _>>()?;

    let open = rows.iter().rposition(|row| {
        row.get(0) == Some(student_id) && row.get(3).map_or(true, str::is_empty)
    });
    let Some(index) = open else {
        warn!("No open session for {}", student_id);
        return Ok(false);
    };

    let mut fields: Vec<String> = rows[index].iter().map(str::to_string).collect();
    fields.resize(HEADER.len().max(fields.len()), String::new());
    fields[3] = logout_time.to_string();
    rows[index] = StringRecord::from(fields);

    let mut writer = WriterBuilder::new().flexible(true).from_path(path)?;
    for row in &rows {
        writer.write_record(row)?;
    }
    writer.flush()?;
    info!("Logout: {}", student_id);
    Ok(true)
}

/// `Logged in: 1h 2m 3s` style duration.
pub fn format_elapsed(secs: u64) -> String {
    let (hrs, rem) = (secs / 3600, secs % 3600);
    let (mins, secs) = (rem / 60, rem % 60);
    if hrs > 0 {
        format!("Logged in: {}h {}m {}s", hrs, mins, secs)
    } else if mins > 0 {
        format!("Logged in: {}m {}s", mins, secs)
    } else {
        format!("Logged in: {}s", secs)
    }
}
