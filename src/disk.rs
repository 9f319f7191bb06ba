use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Read, Seek, Write};
use std::path::{Path, PathBuf};

use crate::{
    ByteSpan, Charset, HttpData, HttpDataError, Result, TempFilePolicy,
    DEFAULT_CHARSET, MAX_IN_MEMORY_SIZE, STREAM_BUFFER_CAPACITY,
};

const LOG_PREFIX: &str = "disk-data";

/// Who is responsible for removing a backing file.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Backing {
    /// Allocated by the item, removed by [`HttpData::delete`].
    Owned(PathBuf),
    /// Adopted or handed over by rename; never removed by the item.
    External(PathBuf),
}

impl Backing {
    pub fn path(&self) -> &Path {
        match self {
            Backing::Owned(path) | Backing::External(path) => path,
        }
    }

    pub fn is_owned(&self) -> bool {
        matches!(self, Backing::Owned(_))
    }
}

/// The single open handle an item may hold.
#[derive(Debug)]
enum Handle {
    Writer(File),
    Reader(File),
}

/// Field content kept in a file on disk.
///
/// The file is allocated lazily through the item's [`TempFilePolicy`] on
/// the first call that carries content. Items are meant to be driven by
/// one owner at a time; every operation blocks on disk I/O.
#[derive(Debug)]
pub struct DiskHttpData {
    log_prefix: String,
    name: String,
    charset: Charset,
    defined_size: u64,
    policy: TempFilePolicy,
    size: u64,
    backing: Option<Backing>,
    handle: Option<Handle>,
    completed: bool,
    drained: bool,
}

impl DiskHttpData {
    pub fn new(
        name: impl Into<String>,
        charset: Charset,
        defined_size: u64,
        policy: TempFilePolicy,
    ) -> Self {
        let name = name.into();
        Self {
            log_prefix: format!("{}/{}", LOG_PREFIX, name),
            name,
            charset,
            defined_size,
            policy,
            size: 0,
            backing: None,
            handle: None,
            completed: false,
            drained: false,
        }
    }

    pub fn backing(&self) -> Option<&Backing> {
        self.backing.as_ref()
    }

    pub fn policy(&self) -> &TempFilePolicy {
        &self.policy
    }

    /// The policy asked for exit-time cleanup and the current file
    /// belongs to this item.
    pub fn wants_exit_cleanup(&self) -> bool {
        self.policy.delete_on_exit
            && self.backing.as_ref().map_or(false, Backing::is_owned)
    }

    fn check_size(&self, size: u64) -> Result<()> {
        if self.defined_size > 0 && size > self.defined_size {
            log::warn!(
                "{}: rejected {} bytes, limit is {}",
                self.log_prefix,
                size,
                self.defined_size
            );
            return Err(HttpDataError::over_capacity(size, self.defined_size));
        }
        Ok(())
    }

    fn ensure_file(&mut self) -> Result<PathBuf> {
        if let Some(backing) = &self.backing {
            return Ok(backing.path().to_path_buf());
        }
        let path = self.policy.create()?;
        log::debug!(
            "{}: allocated backing file {}",
            self.log_prefix,
            path.display()
        );
        self.backing = Some(Backing::Owned(path.clone()));
        Ok(path)
    }

    fn writer(&mut self) -> Result<&mut File> {
        if let Some(Handle::Reader(_)) = self.handle {
            return Err(HttpDataError::InvalidState(
                "cannot append during a chunked read".to_owned(),
            ));
        }
        if self.handle.is_none() {
            let path = self.ensure_file()?;
            // Only the first open of a sequence starts from an empty file,
            // a reopen continues after the bytes already accounted for.
            let file = if self.size == 0 {
                File::create(path)?
            } else {
                OpenOptions::new().create(true).append(true).open(path)?
            };
            self.handle = Some(Handle::Writer(file));
            self.drained = false;
        }
        match self.handle.as_mut() {
            Some(Handle::Writer(file)) => Ok(file),
            _ => Err(HttpDataError::InvalidState(
                "no write handle available".to_owned(),
            )),
        }
    }

    /// Remove the backing file if this item owns it. An adopted file is
    /// only forgotten when `forget_external` is set.
    fn discard(&mut self, forget_external: bool) -> Result<()> {
        match &self.backing {
            Some(Backing::Owned(path)) => {
                remove_if_exists(path)?;
                log::debug!(
                    "{}: removed backing file {}",
                    self.log_prefix,
                    path.display()
                );
                self.backing = None;
            }
            Some(Backing::External(_)) if forget_external => {
                self.backing = None;
            }
            _ => {}
        }
        Ok(())
    }

    fn reset(&mut self, size: u64) {
        self.handle = None;
        self.size = size;
        self.completed = false;
        self.drained = false;
    }
}

impl HttpData for DiskHttpData {
    fn name(&self) -> &str {
        &self.name
    }

    fn charset(&self) -> Charset {
        self.charset
    }

    fn defined_size(&self) -> u64 {
        self.defined_size
    }

    fn length(&self) -> u64 {
        self.size
    }

    fn is_completed(&self) -> bool {
        self.completed
    }

    fn is_in_memory(&self) -> bool {
        false
    }

    fn file(&self) -> Option<&Path> {
        self.backing.as_ref().map(Backing::path)
    }

    fn set_content(&mut self, span: &mut dyn ByteSpan) -> Result<()> {
        let size = span.remaining() as u64;
        self.check_size(size)?;
        self.handle = None;
        let path = self.ensure_file()?;

        // Truncates whatever an earlier assignment left behind.
        let mut file = File::create(&path)?;
        self.reset(0);
        let mut written = 0;
        let result = write_fully(&mut file, span.chunk(), &mut written);
        drop(file);
        span.advance(written);
        self.size = written as u64;
        result?;

        self.completed = true;
        log::trace!("{}: content set, {} bytes", self.log_prefix, size);
        Ok(())
    }

    fn add_content(
        &mut self,
        span: Option<&mut dyn ByteSpan>,
        last: bool,
    ) -> Result<()> {
        if self.completed {
            return Err(HttpDataError::InvalidState(
                "content is already completed".to_owned(),
            ));
        }
        if span.is_none() && !last {
            return Err(HttpDataError::InvalidArgument("buffer"));
        }

        if let Some(span) = span {
            let len = span.remaining() as u64;
            self.check_size(self.size + len)?;
            let mut written = 0;
            let result =
                write_fully(self.writer()?, span.chunk(), &mut written);
            span.advance(written);
            self.size += written as u64;
            if let Err(e) = result {
                self.handle = None;
                return Err(e.into());
            }
        }

        if last {
            self.writer()?;
            self.handle = None;
            self.completed = true;
            log::trace!(
                "{}: last chunk received, {} bytes total",
                self.log_prefix,
                self.size
            );
        }
        Ok(())
    }

    fn set_content_from_file(&mut self, path: &Path) -> Result<()> {
        let size = fs::metadata(path)?.len();
        self.check_size(size)?;
        self.reset(size);
        if self.file() != Some(path) {
            self.discard(true)?;
        }

        self.backing = Some(Backing::External(path.to_path_buf()));
        self.completed = true;
        log::debug!(
            "{}: adopted {} ({} bytes)",
            self.log_prefix,
            path.display(),
            size
        );
        Ok(())
    }

    fn set_content_from_stream(&mut self, source: &mut dyn Read) -> Result<()> {
        self.reset(0);
        self.discard(true)?;

        let (path, mut file) = self.policy.create_file()?;
        self.backing = Some(Backing::Owned(path.clone()));
        let result = drain_into(source, &mut file);
        drop(file);

        let total = match result {
            Ok(total) => total,
            Err(e) => {
                self.discard(true)?;
                return Err(e.into());
            }
        };
        // The length of a stream is only known once it is drained.
        if let Err(e) = self.check_size(total) {
            self.discard(true)?;
            return Err(e);
        }

        self.size = total;
        self.completed = true;
        log::trace!(
            "{}: drained stream into {}, {} bytes",
            self.log_prefix,
            path.display(),
            total
        );
        Ok(())
    }

    fn delete(&mut self) -> Result<()> {
        self.handle = None;
        if !self.backing.as_ref().map_or(false, Backing::is_owned) {
            return Ok(());
        }
        self.discard(false)?;
        self.reset(0);
        Ok(())
    }

    fn get(&self) -> Result<Vec<u8>> {
        match &self.backing {
            Some(backing) => read_from(backing.path()),
            None => Ok(Vec::new()),
        }
    }

    fn get_chunk(&mut self, max_len: usize) -> Result<Vec<u8>> {
        let path = match &self.backing {
            Some(backing) if max_len > 0 && !self.drained => {
                backing.path().to_path_buf()
            }
            _ => return Ok(Vec::new()),
        };
        if let Some(Handle::Writer(_)) = self.handle {
            return Err(HttpDataError::InvalidState(
                "content is still being written".to_owned(),
            ));
        }
        if self.handle.is_none() {
            self.handle = Some(Handle::Reader(File::open(path)?));
        }

        let outcome = match self.handle.as_mut() {
            Some(Handle::Reader(file)) => fill(file, max_len),
            _ => {
                return Err(HttpDataError::InvalidState(
                    "no read handle available".to_owned(),
                ))
            }
        };
        let (buf, eof) = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                self.handle = None;
                return Err(e);
            }
        };
        if eof {
            self.handle = None;
            self.drained = true;
            log::trace!("{}: chunked read exhausted", self.log_prefix);
        }
        Ok(buf)
    }

    fn get_string(&self, charset: Option<Charset>) -> Result<String> {
        if self.backing.is_none() {
            return Ok(String::new());
        }
        let bytes = self.get()?;
        Ok(charset.unwrap_or(DEFAULT_CHARSET).decode(&bytes))
    }

    fn rename_to(&mut self, dest: &Path) -> Result<()> {
        if dest.as_os_str().is_empty() {
            return Err(HttpDataError::InvalidArgument("dest"));
        }
        if self.handle.is_some() {
            return Err(HttpDataError::InvalidState(
                "cannot rename while a handle is open".to_owned(),
            ));
        }
        let src = match &self.backing {
            Some(backing) => backing.path().to_path_buf(),
            None => {
                return Err(HttpDataError::InvalidState(
                    "no backing file to rename".to_owned(),
                ))
            }
        };

        if let Err(e) = fs::rename(&src, dest) {
            log::debug!(
                "{}: rename to {} failed ({}), copying instead",
                self.log_prefix,
                dest.display(),
                e
            );
            copy_then_remove(&src, dest, self.size)?;
        }

        self.backing = Some(Backing::External(dest.to_path_buf()));
        log::debug!(
            "{}: moved {} to {}",
            self.log_prefix,
            src.display(),
            dest.display()
        );
        Ok(())
    }
}

/// Write all of `data`, syncing after every write so that each
/// returned write is on disk. `written` counts the bytes the file took,
/// including on failure.
fn write_fully(
    file: &mut File,
    data: &[u8],
    written: &mut usize,
) -> io::Result<()> {
    while *written < data.len() {
        match file.write(&data[*written..]) {
            Ok(0) => {
                return Err(io::Error::new(
                    ErrorKind::WriteZero,
                    "failed to write whole buffer",
                ))
            }
            Ok(n) => {
                *written += n;
                file.sync_data()?;
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

fn drain_into(source: &mut dyn Read, file: &mut File) -> io::Result<u64> {
    let mut buf = vec![0u8; STREAM_BUFFER_CAPACITY];
    let mut total = 0;
    loop {
        let read = match source.read(&mut buf) {
            Ok(0) => return Ok(total),
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        let mut written = 0;
        let result = write_fully(file, &buf[..read], &mut written);
        total += written as u64;
        result?;
    }
}

/// Read up to `max_len` bytes, or until the file ends. The flag tells
/// whether the end was reached. The buffer is sized by what is left in
/// the file, never by `max_len` alone.
fn fill(file: &mut File, max_len: usize) -> Result<(Vec<u8>, bool)> {
    let left = file
        .metadata()?
        .len()
        .saturating_sub(file.stream_position()?);
    let limit = u64::try_from(max_len).unwrap_or(u64::MAX);
    let mut buf = Vec::new();
    buf.try_reserve_exact(left.min(limit) as usize)?;
    std::io::Read::by_ref(&mut *file).take(limit).read_to_end(&mut buf)?;
    let eof = buf.len() < max_len;
    Ok((buf, eof))
}

fn read_from(path: &Path) -> Result<Vec<u8>> {
    let len = fs::metadata(path)?.len();
    if len > MAX_IN_MEMORY_SIZE {
        return Err(HttpDataError::OversizedForMemory(len));
    }
    let mut buf = Vec::new();
    buf.try_reserve_exact(len as usize)?;
    File::open(path)?.read_to_end(&mut buf)?;
    Ok(buf)
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Copy `src` to `dest` and remove `src`, provided exactly `expected`
/// bytes made it over. Otherwise `dest` is removed and `src` kept.
fn copy_then_remove(src: &Path, dest: &Path, expected: u64) -> Result<()> {
    let copied = match fs::copy(src, dest) {
        Ok(copied) => copied,
        Err(e) => {
            if let Err(cleanup) = remove_if_exists(dest) {
                log::warn!(
                    "could not remove partial copy {}: {}",
                    dest.display(),
                    cleanup
                );
            }
            return Err(e.into());
        }
    };
    if copied != expected {
        remove_if_exists(dest)?;
        return Err(HttpDataError::IncompleteCopy { copied, expected });
    }
    if let Err(e) = remove_if_exists(src) {
        log::warn!(
            "copied to {} but could not remove {}: {}",
            dest.display(),
            src.display(),
            e
        );
    }
    Ok(())
}
