use std::fs;
use std::path::{Path, PathBuf};

use arboard::Clipboard;
use tracing::{info, trace};

use crate::domain::SVError;

pub const EXPORT_FILE_NAME: &str = "export.csv";

/// Hands exported text to the user outside of the viewer.
pub trait ShareTarget {
    fn share(&mut self, path: &Path, text: &str) -> Result<(), SVError>;
}

impl<T: ShareTarget + ?Sized> ShareTarget for Box<T> {
    fn share(&mut self, path: &Path, text: &str) -> Result<(), SVError> {
        (**self).share(path, text)
    }
}

/// Shares by putting the exported text on the system clipboard.
#[derive(Default)]
pub struct ClipboardShare {
    clipboard: Option<Clipboard>,
}

impl ShareTarget for ClipboardShare {
    fn share(&mut self, path: &Path, text: &str) -> Result<(), SVError> {
        // Opened lazily, headless sessions only fail once they try to share
        if self.clipboard.is_none() {
            let clipboard = Clipboard::new().map_err(|e| SVError::Export(e.to_string()))?;
            self.clipboard = Some(clipboard);
        }
        if let Some(clipboard) = self.clipboard.as_mut() {
            clipboard
                .set_text(text.to_string())
                .map_err(|e| SVError::Export(e.to_string()))?;
            trace!("Copied export of {} to clipboard", path.display());
        }
        Ok(())
    }
}

/// Default export directory: documents, else the local data dir, else `.`.
pub fn default_export_dir() -> PathBuf {
    dirs::document_dir()
        .or_else(|| dirs::data_local_dir().map(|d| d.join("sv")))
        .unwrap_or_else(|| PathBuf::from("."))
}

pub fn export_path(dir: &Path) -> PathBuf {
    dir.join(EXPORT_FILE_NAME)
}

/// Writes export text to a fixed location and shares it.
pub struct Exporter<S: ShareTarget> {
    dir: PathBuf,
    share: S,
}

impl<S: ShareTarget> Exporter<S> {
    pub fn new(dir: PathBuf, share: S) -> Self {
        Self { dir, share }
    }

    pub fn path(&self) -> PathBuf {
        export_path(&self.dir)
    }

    pub fn export(&mut self, text: &str) -> Result<PathBuf, SVError> {
        let path = self.path();
        fs::create_dir_all(&self.dir)
            .and_then(|_| fs::write(&path, text))
            .map_err(|e| SVError::Export(format!("{}: {e}", path.display())))?;
        info!("Exported {} bytes to {}", text.len(), path.display());

        self.share.share(&path, text)?;
        Ok(path)
    }
}
