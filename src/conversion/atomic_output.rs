//! Atomic output files
//!
//! Output is written to a uniquely named `*.tmp` file next to the destination
//! and renamed over it only once it is complete. A handle that is dropped
//! without being committed removes its temp file, so an interrupted or failed
//! item never leaves a partial file at the destination path.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tempfile::{Builder, NamedTempFile};

use crate::error::TaskError;

/// A temp file waiting to be published at `destination`
#[derive(Debug)]
pub struct TempOutput {
    file: NamedTempFile,
    destination: PathBuf,
}

impl TempOutput {
    /// Create the temp file in the destination's directory
    ///
    /// The directory must already exist; it is never created here.
    pub fn acquire(destination: &Path) -> Result<Self, TaskError> {
        let dir = match destination.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };

        if !dir.is_dir() {
            return Err(TaskError::Directory {
                path: dir.to_path_buf(),
                source: io::Error::new(io::ErrorKind::NotFound, "no such directory"),
            });
        }

        let prefix = format!(
            ".{}.",
            destination
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default()
        );
        let file = Builder::new()
            .prefix(&prefix)
            .suffix(".tmp")
            .tempfile_in(dir)
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => TaskError::Directory {
                    path: dir.to_path_buf(),
                    source: e,
                },
                _ => TaskError::io("failed to create temporary file", e),
            })?;

        // tempfile creates 0600; published files should look like any other
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o644))
                .map_err(|e| TaskError::io("failed to set temporary file permissions", e))?;
        }

        log::debug!("Acquired {} for {}", file.path().display(), destination.display());
        Ok(Self {
            file,
            destination: destination.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn as_file(&self) -> &File {
        self.file.as_file()
    }

    /// A new handle on the temp file, suitable as a child's stdout
    pub fn stdio(&self) -> Result<Stdio, TaskError> {
        let file = self
            .file
            .as_file()
            .try_clone()
            .map_err(|e| TaskError::io("failed to duplicate temporary file handle", e))?;
        Ok(Stdio::from(file))
    }

    /// Flush to disk and rename over the destination
    ///
    /// Any existing file at the destination is replaced. On failure the temp
    /// file is removed and the destination is left as it was.
    pub fn commit(self) -> Result<PathBuf, TaskError> {
        self.file
            .as_file()
            .sync_all()
            .map_err(|e| TaskError::io("failed to flush output", e))?;

        let destination = self.destination;
        self.file
            .persist(&destination)
            .map_err(|e| TaskError::io(format!("failed to publish '{}'", destination.display()), e.error))?;

        log::debug!("Committed {}", destination.display());
        Ok(destination)
    }

    /// Discard the temp file without publishing
    pub fn release(self) {
        log::debug!("Released {}", self.file.path().display());
    }
}
