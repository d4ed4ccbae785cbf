//! Image byte sources

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Where an image's bytes came from; recorded for audit logging only
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSource {
    BuiltIn,
    UserProvided,
}

impl fmt::Display for ImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageSource::BuiltIn => write!(f, "built-in"),
            ImageSource::UserProvided => write!(f, "user-provided"),
        }
    }
}

/// Raw firmware image
#[derive(Debug, Clone)]
pub struct ImageBlob {
    pub name: String,
    pub data: Vec<u8>,
    pub source: ImageSource,
}

impl ImageBlob {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Supplies firmware image bytes by name
pub trait ImageProvider: Send + Sync {
    fn request(&self, name: &str) -> io::Result<ImageBlob>;
}

/// Default number of attempts for transient read failures
pub const DEFAULT_FETCH_RETRIES: u32 = 3;

/// Reads images from an optional override directory, then the packaged one
pub struct DirectoryProvider {
    user_dir: Option<PathBuf>,
    builtin_dir: PathBuf,
    retries: u32,
}

impl DirectoryProvider {
    pub fn new(builtin_dir: impl Into<PathBuf>) -> Self {
        Self {
            user_dir: None,
            builtin_dir: builtin_dir.into(),
            retries: DEFAULT_FETCH_RETRIES,
        }
    }

    /// Images found here take precedence over packaged ones
    pub fn with_user_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.user_dir = Some(dir.into());
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries.max(1);
        self
    }

    fn read_with_retry(&self, path: &Path) -> io::Result<Vec<u8>> {
        let mut attempt = 1;
        loop {
            match fs::read(path) {
                Err(e) if transient(&e) && attempt < self.retries => {
                    log::warn!("read {} failed ({}), retry {}/{}", path.display(), e, attempt, self.retries);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

fn transient(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock)
}

impl ImageProvider for DirectoryProvider {
    fn request(&self, name: &str) -> io::Result<ImageBlob> {
        let file_name = Path::new(name)
            .file_name()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, format!("bad image name {:?}", name)))?;

        if let Some(dir) = &self.user_dir {
            let path = dir.join(file_name);
            if path.is_file() {
                let data = self.read_with_retry(&path)?;
                return Ok(ImageBlob {
                    name: name.to_string(),
                    data,
                    source: ImageSource::UserProvided,
                });
            }
        }

        let data = self.read_with_retry(&self.builtin_dir.join(file_name))?;
        Ok(ImageBlob {
            name: name.to_string(),
            data,
            source: ImageSource::BuiltIn,
        })
    }
}
