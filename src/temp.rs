use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::Result;

const TOKEN_LENGTH: usize = 16;
const MAX_ATTEMPTS: usize = 64;

pub const FILE_UPLOAD_PREFIX: &str = "FUp_";
pub const FILE_UPLOAD_POSTFIX: &str = ".tmp";
pub const ATTRIBUTE_PREFIX: &str = "Attr_";
pub const ATTRIBUTE_POSTFIX: &str = ".att";

/// Naming and placement rules for backing files.
///
/// A file is named `<prefix><random token><postfix>`. When a disk
/// filename hint is present the postfix becomes `_<hint>` so that the
/// original upload name stays recognisable on disk.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct TempFilePolicy {
    pub prefix: String,
    pub postfix: String,
    pub base_directory: Option<PathBuf>,
    pub delete_on_exit: bool,
    pub disk_filename: Option<String>,
}

impl TempFilePolicy {
    pub fn new(prefix: impl Into<String>, postfix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            postfix: postfix.into(),
            base_directory: None,
            delete_on_exit: false,
            disk_filename: None,
        }
    }

    /// Policy used for uploaded files, keeping the client filename as hint.
    pub fn file_upload(filename: impl Into<String>) -> Self {
        Self::new(FILE_UPLOAD_PREFIX, FILE_UPLOAD_POSTFIX)
            .with_disk_filename(filename)
            .with_delete_on_exit(true)
    }

    /// Policy used for plain form attributes.
    pub fn attribute() -> Self {
        Self::new(ATTRIBUTE_PREFIX, ATTRIBUTE_POSTFIX).with_delete_on_exit(true)
    }

    pub fn with_base_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_directory = Some(dir.into());
        self
    }

    pub fn with_delete_on_exit(mut self, delete_on_exit: bool) -> Self {
        self.delete_on_exit = delete_on_exit;
        self
    }

    pub fn with_disk_filename(mut self, filename: impl Into<String>) -> Self {
        self.disk_filename = Some(filename.into());
        self
    }

    pub fn directory(&self) -> PathBuf {
        match &self.base_directory {
            Some(dir) => dir.clone(),
            None => std::env::temp_dir(),
        }
    }

    fn effective_postfix(&self) -> String {
        match &self.disk_filename {
            Some(filename) => format!("_{}", sanitize(filename)),
            None => self.postfix.clone(),
        }
    }

    /// Create a new empty file that no other caller can have received.
    ///
    /// Uniqueness comes from `O_EXCL` creation: a name collision is
    /// answered by drawing another token.
    pub fn create_file(&self) -> Result<(PathBuf, File)> {
        let dir = self.directory();
        let postfix = self.effective_postfix();
        for _ in 0..MAX_ATTEMPTS {
            let token: String = std::iter::repeat_with(fastrand::alphanumeric)
                .take(TOKEN_LENGTH)
                .collect();
            let path = dir.join(format!("{}{}{}", self.prefix, token, postfix));
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => {
                    log::trace!("allocated temp file {}", path.display());
                    return Ok((path, file));
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(std::io::Error::new(
            ErrorKind::AlreadyExists,
            format!("could not find a free file name in {}", dir.display()),
        )
        .into())
    }

    /// Like [`TempFilePolicy::create_file`] but closes the handle at once.
    pub fn create(&self) -> Result<PathBuf> {
        let (path, _file) = self.create_file()?;
        Ok(path)
    }
}

impl Default for TempFilePolicy {
    fn default() -> Self {
        Self::attribute()
    }
}

/// Keep only the last path component of a client supplied filename.
fn sanitize(filename: &str) -> String {
    let name = Path::new(filename)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");
    name.chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect()
}
