use std::path::{Path, PathBuf};

use super::{Platform, resolve_data_dir};

pub struct NativePlatform;

impl Platform for NativePlatform {
    fn restrict_dir_permissions(_path: &Path) {}

    fn restrict_file_permissions(_path: &Path) {}

    fn set_executable(_path: &Path) {}

    fn agent_missing_hint() -> &'static str {
        "Agent binary not found in PATH. Install it or set SOLO_AGENT_BIN / [agent].binary."
    }

    fn data_dir() -> PathBuf {
        let base = dirs::data_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(std::env::temp_dir);
        resolve_data_dir(base.join("solo"))
    }
}
