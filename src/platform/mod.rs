use std::path::{Path, PathBuf};

/// Platform-specific operations abstracted behind a common interface.
/// Each OS provides its own `NativePlatform` implementation so call sites
/// remain free of `#[cfg]` blocks.
pub trait Platform {
    /// Set restrictive *directory* permissions (0o700 on Unix, no-op on Windows).
    fn restrict_dir_permissions(path: &Path);

    /// Set restrictive *file* permissions (0o600 on Unix, no-op on Windows).
    fn restrict_file_permissions(path: &Path);

    /// Mark a file as executable (0o755 on Unix, no-op on Windows).
    fn set_executable(path: &Path);

    /// Human-readable hint shown when the agent binary is not on PATH.
    fn agent_missing_hint() -> &'static str;

    /// Root data directory for solo.
    /// Unix: `~/.solo`, Windows: `%APPDATA%\solo`.
    fn data_dir() -> PathBuf;
}

/// `SOLO_DATA_DIR` wins over the platform default when set and non-empty.
pub(crate) fn resolve_data_dir(default: PathBuf) -> PathBuf {
    match std::env::var("SOLO_DATA_DIR") {
        Ok(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
        _ => default,
    }
}

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub use unix::NativePlatform;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub use windows::NativePlatform;
