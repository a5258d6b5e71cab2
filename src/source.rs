use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::{debug, info};

use crate::codec::SourceKind;
use crate::domain::SVError;

/// Something that lets the user choose a file.
pub trait FilePicker {
    /// The chosen file, or `SVError::PickCancelled` when the user backed out.
    fn pick(&mut self) -> Result<PathBuf, SVError>;
}

/// Picks a path given as text, from the command line or the open prompt.
/// An empty answer counts as a cancellation.
#[derive(Debug, Default)]
pub struct PathPicker {
    answer: Option<String>,
}

impl PathPicker {
    pub fn new(answer: impl Into<String>) -> Self {
        Self {
            answer: Some(answer.into()),
        }
    }
}

impl FilePicker for PathPicker {
    fn pick(&mut self) -> Result<PathBuf, SVError> {
        let answer = self.answer.take().unwrap_or_default();
        let answer = answer.trim();
        if answer.is_empty() {
            return Err(SVError::PickCancelled);
        }
        let expanded = shellexpand::full(answer)
            .map_err(|e| SVError::Read {
                path: PathBuf::from(answer),
                source: std::io::Error::new(ErrorKind::InvalidInput, e.to_string()),
            })?;
        debug!("Picked {answer} -> {expanded}");
        Ok(PathBuf::from(expanded.as_ref()))
    }
}

/// Only CSV, XLS and XLSX files are accepted.
pub fn accept(path: &Path) -> Result<SourceKind, SVError> {
    SourceKind::from_path(path)
        .ok_or_else(|| SVError::UnknownFileType(path.display().to_string()))
}

/// Read a whole file and return its content base64 encoded.
pub fn read_base64(path: &Path) -> Result<String, SVError> {
    let read_error = |source| SVError::Read {
        path: path.to_path_buf(),
        source,
    };

    let metadata = fs::metadata(path).map_err(read_error)?;
    if !metadata.is_file() {
        return Err(read_error(std::io::Error::new(
            ErrorKind::InvalidInput,
            "not a file",
        )));
    }
    let bytes = fs::read(path).map_err(read_error)?;
    info!("Read {} ({} bytes)", path.display(), bytes.len());
    Ok(STANDARD.encode(bytes))
}
