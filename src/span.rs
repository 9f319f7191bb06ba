use std::io::Cursor;

/// A readable byte span with a read cursor.
///
/// This is the shape in which a multipart decoder hands field bytes over:
/// whatever lies between the cursor and the end is "remaining", and the
/// consumer advances the cursor by however many bytes it took.
pub trait ByteSpan {
    /// Number of bytes between the cursor and the end of the span.
    fn remaining(&self) -> usize;

    /// Move the cursor forward by `n` bytes.
    ///
    /// `n` must not exceed [`ByteSpan::remaining`].
    fn advance(&mut self, n: usize);

    /// The remaining bytes as one contiguous slice.
    fn chunk(&self) -> &[u8];
}

impl<'a> ByteSpan for &'a [u8] {
    fn remaining(&self) -> usize {
        self.len()
    }

    fn advance(&mut self, n: usize) {
        assert!(n <= self.len(), "cannot advance past the end of the span");
        *self = &self[n..];
    }

    fn chunk(&self) -> &[u8] {
        self
    }
}

impl<T: AsRef<[u8]>> ByteSpan for Cursor<T> {
    fn remaining(&self) -> usize {
        let len = self.get_ref().as_ref().len();
        len.saturating_sub(self.position() as usize)
    }

    fn advance(&mut self, n: usize) {
        assert!(
            n <= self.remaining(),
            "cannot advance past the end of the span"
        );
        self.set_position(self.position() + n as u64);
    }

    fn chunk(&self) -> &[u8] {
        let data = self.get_ref().as_ref();
        let start = (self.position() as usize).min(data.len());
        &data[start..]
    }
}
