//! The `latest` symlink: a single-writer, many-reader pointer to the current generation.

use std::fs;
use std::io::{self, ErrorKind};
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

use super::ConfigPathError;

/// Pointer to the current generation, stored as a relative symlink whose
/// target is the bare serial (`latest -> 42`).
#[derive(Debug, Clone)]
pub struct LatestPointer {
    link: PathBuf,
}

impl LatestPointer {
    pub fn new(link: impl Into<PathBuf>) -> Self {
        Self { link: link.into() }
    }

    pub fn link(&self) -> &Path {
        &self.link
    }

    /// Raw link target, `None` if the link does not exist.
    pub fn target_name(&self) -> io::Result<Option<String>> {
        match fs::read_link(&self.link) {
            Ok(target) => Ok(Some(target.to_string_lossy().into_owned())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Serial named by the link, `None` if the link does not exist.
    pub fn serial(&self) -> Result<Option<u64>, ConfigPathError> {
        let Some(target) = self
            .target_name()
            .map_err(|e| ConfigPathError::io(&self.link, e))?
        else {
            return Ok(None);
        };
        target
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigPathError::InvalidLatest {
                path: self.link.clone(),
                target,
            })
    }

    /// Canonical path of the current generation directory.
    ///
    /// Fails with `NotFound` when the link is missing or dangling.
    pub fn resolve(&self) -> io::Result<PathBuf> {
        fs::canonicalize(&self.link)
    }

    /// Repoint the link at `serial`.
    ///
    /// The new link is created under a temporary name and renamed over the
    /// old one, so readers observe either the old or the new target and
    /// never a missing link.
    pub fn set(&self, serial: u64) -> io::Result<()> {
        let file_name = self
            .link
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("latest");
        let staging = self
            .link
            .with_file_name(format!(".{}.{}.tmp", file_name, ulid::Ulid::new()));

        symlink(serial.to_string(), &staging)?;
        if let Err(e) = fs::rename(&staging, &self.link) {
            let _ = fs::remove_file(&staging);
            return Err(e);
        }
        Ok(())
    }
}
