//! Blocking message boxes for errors nobody is watching the console for

use tracing::{error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogKind {
    Warning,
    Error,
}

/// Show a modal message box and log the same text. Falls back to stderr
/// off Windows.
pub fn show(kind: DialogKind, title: &str, msg: &str) {
    match kind {
        DialogKind::Warning => warn!("{}: {}", title, msg),
        DialogKind::Error => error!("{}: {}", title, msg),
    }
    platform_show(kind, title, msg);
}

pub fn show_warning(title: &str, msg: &str) {
    show(DialogKind::Warning, title, msg)
}

pub fn show_error(title: &str, msg: &str) {
    show(DialogKind::Error, title, msg)
}

#[cfg(windows)]
fn platform_show(kind: DialogKind, title: &str, msg: &str) {
    use std::ffi::OsStr;
    use std::os::windows::ffi::OsStrExt;
    use std::ptr;
    use winapi::um::winuser::{MessageBoxW, MB_ICONERROR, MB_ICONWARNING, MB_OK, MB_SETFOREGROUND, MB_TOPMOST};

    let wide = |s: &str| -> Vec<u16> { OsStr::new(s).encode_wide().chain(std::iter::once(0)).collect() };
    let title = wide(title);
    let text = wide(msg);
    let icon = match kind {
        DialogKind::Warning => MB_ICONWARNING,
        DialogKind::Error => MB_ICONERROR,
    };

    unsafe {
        MessageBoxW(
            ptr::null_mut(),
            text.as_ptr(),
            title.as_ptr(),
            MB_OK | icon | MB_TOPMOST | MB_SETFOREGROUND,
        );
    }
}

#[cfg(not(windows))]
fn platform_show(_kind: DialogKind, title: &str, msg: &str) {
    eprintln!("[{}] {}", title, msg);
}
