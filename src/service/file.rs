//! File service request dispatch
//!
//! Stores uploaded payloads as files in one flat storage directory and reads
//! them back on download.

use super::RequestHandler;
use crate::io::frame_codec::DELIMITER;
use crate::types::{Request, RequestKind, Response, ServiceError};
use std::ffi::OsStr;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Handler for the file service
#[derive(Debug)]
pub struct FileHandler {
    storage: PathBuf,
    /// Lowercase extensions with a leading dot; empty means any file
    allowed_extensions: Vec<String>,
}

impl FileHandler {
    /// Create a handler storing files under `storage`
    ///
    /// The directory is created if missing. Extensions may be given with or
    /// without the leading dot and are compared case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Resource`] if the directory cannot be created.
    pub fn new(storage: impl Into<PathBuf>, allowed_extensions: &[String]) -> Result<Self, ServiceError> {
        let storage = storage.into();
        fs::create_dir_all(&storage)
            .map_err(|e| ServiceError::resource("Failed to create storage directory", e))?;

        let allowed_extensions = allowed_extensions
            .iter()
            .map(|ext| ext.trim().trim_start_matches('.').to_lowercase())
            .filter(|ext| !ext.is_empty())
            .map(|ext| format!(".{}", ext))
            .collect();

        Ok(FileHandler {
            storage,
            allowed_extensions,
        })
    }

    /// Directory files are stored in
    pub fn storage(&self) -> &Path {
        &self.storage
    }

    fn resolve(&self, name: &str) -> Result<PathBuf, ServiceError> {
        let plain = !name.is_empty()
            && !name.contains(['/', '\\'])
            && Path::new(name).file_name() == Some(OsStr::new(name));
        if !plain {
            return Err(ServiceError::FileNameNotAllowed {
                name: name.to_string(),
            });
        }
        Ok(self.storage.join(name))
    }

    fn check_extension(&self, name: &str) -> Result<(), ServiceError> {
        if self.allowed_extensions.is_empty() {
            return Ok(());
        }

        let extension = Path::new(name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| format!(".{}", ext.to_lowercase()))
            .ok_or_else(|| ServiceError::MissingExtension {
                name: name.to_string(),
            })?;

        if self.allowed_extensions.contains(&extension) {
            Ok(())
        } else {
            Err(ServiceError::ExtensionNotAllowed {
                name: name.to_string(),
                extension,
            })
        }
    }

    /// Write `contents` to `name`, replacing any existing file
    ///
    /// # Errors
    ///
    /// - [`ServiceError::FileNameNotAllowed`] for names with path components
    /// - [`ServiceError::MissingExtension`] or
    ///   [`ServiceError::ExtensionNotAllowed`] when an allow-list is set
    /// - [`ServiceError::UnsupportedContent`] if `contents` contains `|`
    /// - [`ServiceError::Resource`] ("Failed to create file") on write failure
    pub fn upload(&self, name: &str, contents: &str) -> Result<(), ServiceError> {
        let path = self.resolve(name)?;
        self.check_extension(name)?;
        check_content(name, contents)?;
        fs::write(&path, contents).map_err(|e| ServiceError::resource("Failed to create file", e))?;
        info!(file = name, bytes = contents.len(), "file stored");
        Ok(())
    }

    /// Read the contents of `name`
    ///
    /// # Errors
    ///
    /// - [`ServiceError::FileNameNotAllowed`] for names with path components
    /// - [`ServiceError::FileNotFound`] if no such file is stored
    /// - [`ServiceError::UnsupportedContent`] if the stored data contains `|`
    /// - [`ServiceError::Resource`] on any other read failure
    pub fn download(&self, name: &str) -> Result<String, ServiceError> {
        let path = self.resolve(name)?;
        let contents = fs::read_to_string(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => ServiceError::FileNotFound {
                name: name.to_string(),
            },
            _ => ServiceError::resource("Failed to read file", e),
        })?;
        check_content(name, &contents)?;
        Ok(contents)
    }
}

/// Response payloads are not the last wire field, so they must not contain
/// the delimiter.
fn check_content(name: &str, contents: &str) -> Result<(), ServiceError> {
    if contents.contains(DELIMITER) {
        return Err(ServiceError::UnsupportedContent {
            name: name.to_string(),
        });
    }
    Ok(())
}

impl RequestHandler for FileHandler {
    fn name(&self) -> &str {
        "file"
    }

    fn handle(&self, request: &Request, _peer: &str) -> Response {
        let result = match request.kind {
            RequestKind::UploadFile => self
                .upload(&request.name, &request.payload)
                .map(|()| Response::success("File uploaded successfully")),
            RequestKind::DownloadFile => self
                .download(&request.name)
                .map(|data| Response::success("File downloaded successfully").with_payload(data)),
            kind => Err(ServiceError::UnknownRequest { kind }),
        };

        result.unwrap_or_else(|e| {
            warn!(file = %request.name, error = ?e, "file request failed");
            Response::failure(e.to_string())
        })
    }
}
