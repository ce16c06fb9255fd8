/*!
Sandboxes for tests touching the kiosk directories

A `Sandbox` owns a temp dir with three roots inside it, matching what the
host expects from the machine:
- `Users/` (profile root)
- `ProgramData/` (install and data root)
- `Windows/` (system root, always treated as unsafe)
*/

use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub struct Sandbox {
    dir: TempDir,
}

impl Sandbox {
    pub fn new() -> Self {
        init_tracing();
        let dir = tempfile::tempdir().expect("create sandbox");
        for root in ["Users", "ProgramData", "Windows"] {
            std::fs::create_dir_all(dir.path().join(root)).expect("create sandbox root");
        }
        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// `(users, program_data, windir)`
    pub fn roots(&self) -> (PathBuf, PathBuf, PathBuf) {
        (
            self.dir.path().join("Users"),
            self.dir.path().join("ProgramData"),
            self.dir.path().join("Windows"),
        )
    }
}

impl Default for Sandbox {
    fn default() -> Self {
        Self::new()
    }
}

/// Route tracing output to the test writer once per process. `RUST_LOG`
/// overrides the default `debug` level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}
