//! The byte source a binary file/packet reader pulls from. The reader never owns its
//! bytes: a medium lends them out a request at a time.
use crate::error::MediumStatus;
use std::io::Read;

/// `request_bytes(request_sz) -> (buf, buf_sz, status)`. Bytes are borrowed for the
/// duration of the call that produced them, never copied by the reader; offsets accumulate
/// linearly across calls. A medium may return fewer bytes than requested without that being
/// an error: only `Again`/`Eof`/`Error` are terminal for the current request.
pub trait Medium {
    fn request_bytes(&mut self, request_sz: usize) -> Result<&[u8], MediumStatus>;
}

/// A medium over an in-memory buffer already known in full, e.g. a memory-mapped trace file.
#[derive(Debug)]
pub struct SliceMedium<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> SliceMedium<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }
}

impl Medium for SliceMedium<'_> {
    fn request_bytes(&mut self, request_sz: usize) -> Result<&[u8], MediumStatus> {
        if self.offset >= self.bytes.len() {
            return Err(MediumStatus::Eof);
        }
        let end = (self.offset + request_sz).min(self.bytes.len());
        let slice = &self.bytes[self.offset..end];
        self.offset = end;
        Ok(slice)
    }
}

/// A medium that pulls from any [`Read`] implementor, buffering internally so the reader can
/// still borrow a contiguous slice per request.
#[derive(Debug)]
pub struct ReadMedium<R> {
    inner: R,
    buf: Vec<u8>,
}

impl<R: Read> ReadMedium<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, buf: Vec::new() }
    }
}

impl<R: Read> Medium for ReadMedium<R> {
    fn request_bytes(&mut self, request_sz: usize) -> Result<&[u8], MediumStatus> {
        self.buf.resize(request_sz, 0);
        let mut total = 0;
        while total < request_sz {
            match self.inner.read(&mut self.buf[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Err(MediumStatus::Again),
                Err(_) => return Err(MediumStatus::Error),
            }
        }
        self.buf.truncate(total);
        if total == 0 {
            return Err(MediumStatus::Eof);
        }
        Ok(&self.buf)
    }
}
