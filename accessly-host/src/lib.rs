//! Accessly kiosk host
//!
//! Lockdown for shared lab PCs, split over four binaries:
//! - `accessly-launcher`: supervises the kiosk, honours the remote
//!   kill-switch and escalates crash loops to an emergency update
//! - `accessly-updater`: polls GitHub releases and installs them while the
//!   kiosk is idle
//! - `accessly-main`: the console login wall with session logging
//! - `accessly-cmd`: the elevated admin console

pub mod archive;
pub mod cache;
pub mod cli;
pub mod config;
pub mod crash_loop;
pub mod dialog;
pub mod elevation;
pub mod env;
pub mod error;
pub mod kiosk;
pub mod logging;
pub mod net;
pub mod process;
pub mod status;
pub mod supervisor;
pub mod updater;

pub use error::{KioskError, KioskResult};

/// Exit code of the kiosk main when its UI stops unexpectedly.
pub const UI_CRASH_EXIT_CODE: i32 = 369;
