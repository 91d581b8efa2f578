// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine relevent path information for external files that need to be
//! interacted with, or managed in some way.

use std::{
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
};

/// Environment variable overriding default store location.
pub const STORE_ENV: &str = "CONFSYNC_STORE";

/// Determine default absolute path to store directory.
///
/// Uses `$CONFSYNC_STORE` if set. Otherwise, uses XDG Base Directory path
/// `$XDG_DATA_HOME/confsync-store`. Does not check if the path returned
/// actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
///
/// # See Also
///
/// - [XDG Base Directory](https://wiki.archlinux.org/title/XDG_Base_Directory)
pub fn default_store_dir() -> Result<PathBuf> {
    if let Some(path) = std::env::var_os(STORE_ENV).filter(|path| !path.is_empty()) {
        return Ok(PathBuf::from(path));
    }

    dirs::data_dir()
        .map(|path| path.join("confsync-store"))
        .ok_or(NoWayHome)
}

/// Write file by writing a sibling temporary file, then renaming it over the
/// target.
///
/// Readers either see the old contents or the new contents, never a partial
/// write.
pub fn write_atomic(path: &Path, contents: impl AsRef<[u8]>) -> std::io::Result<()> {
    let mut temp_name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("confsync"));
    temp_name.push(".tmp");
    let temp_path = path.with_file_name(temp_name);

    fs::write(&temp_path, contents)?;
    fs::rename(&temp_path, path)
}

/// No way to determine user's home directory.
///
/// # See Also
///
/// - [`dirs::data_dir`](https://docs.rs/dirs/latest/dirs/fn.data_dir.html)
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's home directory")]
pub struct NoWayHome;

/// Friendly result alias :3
pub type Result<T, E = NoWayHome> = std::result::Result<T, E>;
