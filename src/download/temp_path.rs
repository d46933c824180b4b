//! Deterministic temp file locations for in-progress downloads.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

/// Hex characters of the path hash kept in temp file names.
const HASH_PREFIX_LEN: usize = 16;

/// Name used when the save path has no usable file name.
const FALLBACK_FILE_NAME: &str = "download";

/// Directories used to derive temp paths.
///
/// Temp files live in `<saved_dir>/temp/<hash>_<file name>`, where the hash is
/// taken over the save path relative to `project_dir` when the save path lies
/// inside it, and over the absolute save path otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TempLayout {
    /// Root that save paths are made relative to.
    pub project_dir: PathBuf,
    /// Directory holding the `temp` subdirectory.
    pub saved_dir: PathBuf,
}

impl Default for TempLayout {
    fn default() -> Self {
        let project_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let saved_dir = project_dir.join("saved");
        Self {
            project_dir,
            saved_dir,
        }
    }
}

impl TempLayout {
    /// Creates a layout from explicit directories.
    #[must_use]
    pub fn new(project_dir: impl Into<PathBuf>, saved_dir: impl Into<PathBuf>) -> Self {
        Self {
            project_dir: project_dir.into(),
            saved_dir: saved_dir.into(),
        }
    }

    /// Directory that receives temp files.
    #[must_use]
    pub fn temp_dir(&self) -> PathBuf {
        self.saved_dir.join("temp")
    }

    /// Returns the temp path for a download saved at `save_path`.
    #[must_use]
    pub fn temp_path_for(&self, save_path: &Path) -> PathBuf {
        let absolute = std::path::absolute(save_path).unwrap_or_else(|_| save_path.to_path_buf());
        let project = std::path::absolute(&self.project_dir)
            .unwrap_or_else(|_| self.project_dir.clone());

        let key = absolute.strip_prefix(&project).unwrap_or(&absolute);
        let hash = path_hash(key);
        let name = clean_file_name(save_path);

        self.temp_dir().join(format!("{hash}_{name}"))
    }
}

fn path_hash(path: &Path) -> String {
    let normalized = path.to_string_lossy().replace('\\', "/");
    let digest = Sha256::digest(normalized.as_bytes());
    let mut hex: String = digest.iter().map(|byte| format!("{byte:02x}")).collect();
    hex.truncate(HASH_PREFIX_LEN);
    hex
}

fn clean_file_name(path: &Path) -> String {
    let raw = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches('.');
    if trimmed.is_empty() {
        FALLBACK_FILE_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}
