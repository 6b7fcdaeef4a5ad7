//! Chunked line decoder over a zstd stream.
//!
//! Reads fixed-size chunks from the decompressor into an owned buffer and hands out
//! complete `\n`-terminated lines. Peak memory is the longest line plus the zstd window.

use crate::error::{IngestError, Result};
use crate::util::open_with_retry;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use zstd::stream::read::Decoder;

/// A `Read` wrapper that counts compressed bytes read (drives the progress bar).
pub struct CountingReader<R: Read> {
    inner: R,
    counter: Arc<AtomicU64>,
}

impl<R: Read> CountingReader<R> {
    pub fn new(inner: R) -> (Self, Arc<AtomicU64>) {
        let counter = Arc::new(AtomicU64::new(0));
        (Self { inner, counter: counter.clone() }, counter)
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.counter.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }
}

pub type ArchiveDecoder = Decoder<'static, BufReader<CountingReader<File>>>;

/// Open a `.zst` archive with a capped decompression window.
/// Returns the line decoder and the shared compressed-bytes counter.
pub fn open_archive(
    path: &Path,
    window_log_max: u32,
    read_chunk_bytes: usize,
) -> Result<(LineDecoder<ArchiveDecoder>, Arc<AtomicU64>)> {
    let file = open_with_retry(path, 16, 50)?;
    let (counting, counter) = CountingReader::new(file);
    let mut decoder = Decoder::new(counting).map_err(IngestError::Decompression)?;
    decoder.window_log_max(window_log_max).map_err(IngestError::Decompression)?;
    Ok((LineDecoder::new(decoder, read_chunk_bytes), counter))
}

/// Lazy sequence of newline-delimited byte records.
///
/// A trailing partial line at end-of-stream (no final `\n`) is dropped, never emitted;
/// its size is reported by `discarded_tail_bytes`.
pub struct LineDecoder<R: Read> {
    inner: R,
    chunk: Vec<u8>,
    buf: Vec<u8>,
    start: usize,   // first unconsumed byte in `buf`
    scanned: usize, // bytes of `buf[start..]` already known to hold no '\n'
    eof: bool,
    discarded_tail: usize,
}

impl<R: Read> LineDecoder<R> {
    pub fn new(inner: R, read_chunk_bytes: usize) -> Self {
        Self {
            inner,
            chunk: vec![0u8; read_chunk_bytes.max(1)],
            buf: Vec::with_capacity(16 * 1024),
            start: 0,
            scanned: 0,
            eof: false,
            discarded_tail: 0,
        }
    }

    /// Next complete line without its `\n` (and without a preceding `\r`).
    /// `Ok(None)` at end of stream. Read errors are fatal `Decompression` errors.
    pub fn next_line(&mut self) -> Result<Option<&[u8]>> {
        loop {
            let from = self.start + self.scanned;
            if let Some(pos) = self.buf[from..].iter().position(|&b| b == b'\n') {
                let line_start = self.start;
                let nl = from + pos;
                self.start = nl + 1;
                self.scanned = 0;
                let end = if nl > line_start && self.buf[nl - 1] == b'\r' { nl - 1 } else { nl };
                return Ok(Some(&self.buf[line_start..end]));
            }
            self.scanned = self.buf.len() - self.start;

            if self.start > 0 {
                self.buf.drain(..self.start);
                self.start = 0;
            }
            if self.eof {
                if !self.buf.is_empty() {
                    self.discarded_tail += self.buf.len();
                    tracing::warn!(bytes = self.buf.len(), "discarding unterminated trailing line");
                    self.buf.clear();
                    self.scanned = 0;
                }
                return Ok(None);
            }
            self.fill()?;
        }
    }

    fn fill(&mut self) -> Result<()> {
        loop {
            match self.inner.read(&mut self.chunk) {
                Ok(0) => {
                    self.eof = true;
                    return Ok(());
                }
                Ok(n) => {
                    self.buf.extend_from_slice(&self.chunk[..n]);
                    return Ok(());
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(IngestError::Decompression(e)),
            }
        }
    }

    /// Bytes of unterminated trailing data dropped at end of stream.
    pub fn discarded_tail_bytes(&self) -> usize {
        self.discarded_tail
    }
}
