//! Central path resolution for relay data files.
//!
//! Resolved once at startup from: CLI `--data-dir` > `COUNCIL_DATA_DIR` env > `~/.council`.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

static DATA_DIR: RwLock<Option<PathBuf>> = RwLock::new(None);

/// Initialize the global data directory. Returns the resolved path.
///
/// `--data-dir` already folds in `COUNCIL_DATA_DIR` through clap; the env
/// lookup here covers callers that bypass the CLI.
pub fn init_data_dir(explicit: Option<&Path>) -> io::Result<PathBuf> {
    let dir = if let Some(p) = explicit {
        p.to_path_buf()
    } else if let Ok(env_val) = std::env::var("COUNCIL_DATA_DIR") {
        PathBuf::from(env_val)
    } else {
        dirs::home_dir()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "HOME directory not found"))?
            .join(".council")
    };

    let mut guard = DATA_DIR.write().unwrap_or_else(|e| e.into_inner());
    *guard = Some(dir.clone());
    Ok(dir)
}

/// Return the current data directory. Panics if `init_data_dir` hasn't been called.
pub fn data_dir() -> PathBuf {
    DATA_DIR
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .clone()
        .expect("data_dir() called before init_data_dir()")
}

pub fn log_dir() -> PathBuf {
    data_dir().join("logs")
}

/// Create all required subdirectories under the data dir.
pub fn ensure_dirs() -> io::Result<()> {
    std::fs::create_dir_all(log_dir())
}

/// Reset data dir. Test isolation only.
#[cfg(test)]
pub fn reset_data_dir() {
    let mut guard = DATA_DIR.write().unwrap_or_else(|e| e.into_inner());
    *guard = None;
}
