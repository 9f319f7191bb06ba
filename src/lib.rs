use std::io::Read;
use std::path::Path;

pub mod charset;
pub mod cleanup;
pub mod disk;
pub mod errors;
pub mod span;
pub mod temp;

pub use charset::Charset;
pub use cleanup::CleanupRegistry;
pub use disk::{Backing, DiskHttpData};
pub use errors::{HttpDataError, Result};
pub use span::ByteSpan;
pub use temp::TempFilePolicy;

const KILOBYTE: usize = 1024;

/// Size of the buffer used to drain a stream of unknown length.
pub const STREAM_BUFFER_CAPACITY: usize = 16 * KILOBYTE;

/// Largest file [`HttpData::get`] will load into memory.
pub const MAX_IN_MEMORY_SIZE: u64 = i32::MAX as u64;

pub const DEFAULT_CHARSET: Charset = Charset::Utf8;

/// Content of one multipart/form-data field.
///
/// Implementations decide where the bytes live; callers only see
/// the accumulated content and its size accounting.
pub trait HttpData {
    fn name(&self) -> &str;

    fn charset(&self) -> Charset;

    /// Maximum number of bytes accepted, `0` when unbounded.
    fn defined_size(&self) -> u64;

    /// Number of bytes accepted so far.
    fn length(&self) -> u64;

    /// Whether a complete content assignment has been received.
    fn is_completed(&self) -> bool;

    fn is_in_memory(&self) -> bool;

    /// Path of the file holding the content, if any.
    fn file(&self) -> Option<&Path>;

    /// Replace the whole content with the remaining bytes of `span`.
    fn set_content(&mut self, span: &mut dyn ByteSpan) -> Result<()>;

    /// Append the remaining bytes of `span`. The call with `last` set
    /// terminates the sequence; `span` may only be absent on that call.
    fn add_content(
        &mut self,
        span: Option<&mut dyn ByteSpan>,
        last: bool,
    ) -> Result<()>;

    /// Adopt an existing, complete file as the content.
    fn set_content_from_file(&mut self, path: &Path) -> Result<()>;

    /// Drain `source` until end of stream and use it as the content.
    fn set_content_from_stream(&mut self, source: &mut dyn Read) -> Result<()>;

    /// Release the storage held by this item.
    fn delete(&mut self) -> Result<()>;

    /// The whole content.
    fn get(&self) -> Result<Vec<u8>>;

    /// Next chunk of at most `max_len` bytes. A result shorter than
    /// `max_len` means the content is exhausted.
    fn get_chunk(&mut self, max_len: usize) -> Result<Vec<u8>>;

    /// The whole content decoded with `charset`, or [`DEFAULT_CHARSET`].
    fn get_string(&self, charset: Option<Charset>) -> Result<String>;

    /// Move the content to `dest`.
    fn rename_to(&mut self, dest: &Path) -> Result<()>;
}
