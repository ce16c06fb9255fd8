/*!
# Accessly DevKit - Test fixtures for the kiosk host

Helpers shared by the host's test modules:
- Zip archive and file tree builders
- Throwaway sandboxes standing in for the profile, ProgramData and Windows roots
- Tracing initialisation for tests
*/

pub mod fixtures;
pub mod test_utils;

pub use test_utils::Sandbox;
