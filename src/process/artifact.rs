//! Transient startup file handed to the engine process.

use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

/// Errors creating the startup artifact.
#[derive(thiserror::Error, Debug)]
pub enum ArtifactError {
    /// The temp file could not be created.
    #[error("Failed to create startup file in {dir}: {source}")]
    Create {
        dir: PathBuf,
        source: std::io::Error,
    },
    /// The instruction could not be written.
    #[error("Failed to write startup file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Uniquely named temp file holding the startup instruction for one run.
///
/// The file is removed when the artifact is dropped or [`remove`](Self::remove)d.
#[derive(Debug)]
pub struct StartupArtifact {
    file: NamedTempFile,
}

impl StartupArtifact {
    /// Create a fresh artifact in `dir` (or the system temp dir).
    ///
    /// The file holds `instruction` verbatim. Non-empty `script_text` is
    /// appended on its own line.
    ///
    /// # Errors
    ///
    /// Returns `ArtifactError` if the file cannot be created or written.
    pub fn create(
        dir: Option<&Path>,
        instruction: &str,
        script_text: &str,
    ) -> Result<Self, ArtifactError> {
        let dir = dir.map_or_else(std::env::temp_dir, Path::to_path_buf);

        let mut file = tempfile::Builder::new()
            .prefix("startup-")
            .suffix(".txt")
            .tempfile_in(&dir)
            .map_err(|source| ArtifactError::Create {
                dir: dir.clone(),
                source,
            })?;

        write_contents(file.as_file_mut(), instruction, script_text).map_err(|source| {
            ArtifactError::Write {
                path: file.path().to_path_buf(),
                source,
            }
        })?;

        tracing::debug!(path = %file.path().display(), "Created startup artifact");
        Ok(Self { file })
    }

    /// Path passed to the engine process.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Delete the file now, reporting any failure.
    ///
    /// # Errors
    ///
    /// Returns the I/O error from removing the file.
    pub fn remove(self) -> std::io::Result<()> {
        let path = self.file.path().to_path_buf();
        self.file.close()?;
        tracing::debug!(path = %path.display(), "Removed startup artifact");
        Ok(())
    }
}

fn write_contents(
    out: &mut impl Write,
    instruction: &str,
    script_text: &str,
) -> std::io::Result<()> {
    out.write_all(instruction.as_bytes())?;
    if !script_text.is_empty() {
        if !instruction.is_empty() && !instruction.ends_with('\n') {
            out.write_all(b"\n")?;
        }
        out.write_all(script_text.as_bytes())?;
    }
    out.flush()
}
