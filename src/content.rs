//! Response bodies for the HTTP responders.

use crate::error::NetError;
use bytes::Bytes;
use std::io;
use std::path::PathBuf;

/// Page served when no content file is configured.
pub const DEFAULT_PAGE: &str =
    "<html>\r\n<body>\r\n<h1><center>sockprobe is up.</center></h1>\r\n</body>\r\n</html>";

/// Source of the HTTP response body.
pub trait ContentProvider: Send {
    /// Produce the body for one response.
    fn get_body(&self) -> Result<Bytes, NetError>;
}

/// A fixed body.
#[derive(Debug, Clone)]
pub struct StaticBody(Bytes);

impl StaticBody {
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self(body.into())
    }
}

impl Default for StaticBody {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE)
    }
}

impl ContentProvider for StaticBody {
    fn get_body(&self) -> Result<Bytes, NetError> {
        Ok(self.0.clone())
    }
}

/// A file read afresh on every request, so edits show up immediately.
#[derive(Debug, Clone)]
pub struct FileBody {
    path: PathBuf,
}

impl FileBody {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn unavailable(&self, source: io::Error) -> NetError {
        NetError::ContentUnavailable {
            resource: self.path.display().to_string(),
            source,
        }
    }
}

impl ContentProvider for FileBody {
    fn get_body(&self) -> Result<Bytes, NetError> {
        let data = std::fs::read(&self.path).map_err(|e| self.unavailable(e))?;
        // Served as text/html; refuse anything that is not UTF-8.
        if let Err(e) = std::str::from_utf8(&data) {
            return Err(self.unavailable(io::Error::new(io::ErrorKind::InvalidData, e)));
        }
        Ok(Bytes::from(data))
    }
}

/// Provider for an optional content path.
pub fn provider_for(path: Option<PathBuf>) -> Box<dyn ContentProvider> {
    match path {
        Some(path) => Box::new(FileBody::new(path)),
        None => Box::new(StaticBody::default()),
    }
}
