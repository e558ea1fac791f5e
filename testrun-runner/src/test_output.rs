// Copyright (c) The testrun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Capturing and compressing the output of a test.
//!
//! Output is accumulated in an [`OutputBuffer`] as it streams in, and frozen
//! into a [`CapturedOutput`] when the attempt ends. Large outputs are
//! compressed with zstd; the raw bytes stay available so that a trailing
//! excerpt can still be shown verbatim.

use bytes::{Bytes, BytesMut};
use std::{borrow::Cow, fmt, io};
use tracing::warn;

/// The initial capacity of the output buffer. This is the (normal) page size
/// on most systems.
const CHUNK_SIZE: usize = 4 * 1024;

/// Append-only accumulator for the combined output of one attempt.
pub struct OutputBuffer {
    buf: BytesMut,
    max_size: usize,
    dropped_bytes: usize,
    // Cached result of `compress`, invalidated on append.
    compressed: Option<CompressedOutput>,
}

impl OutputBuffer {
    /// Creates a new buffer that stores at most `max_size` bytes.
    pub fn new(max_size: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(CHUNK_SIZE.min(max_size)),
            max_size,
            dropped_bytes: 0,
            compressed: None,
        }
    }

    /// Appends output to the buffer.
    ///
    /// Returns false if the buffer is full and some or all of `bytes` was
    /// dropped.
    pub fn append(&mut self, bytes: &[u8]) -> bool {
        if bytes.is_empty() {
            return true;
        }
        self.compressed = None;

        let room = self.max_size.saturating_sub(self.buf.len());
        if bytes.len() <= room {
            self.buf.extend_from_slice(bytes);
            true
        } else {
            self.buf.extend_from_slice(&bytes[..room]);
            self.dropped_bytes += bytes.len() - room;
            false
        }
    }

    /// Returns true if the buffer has reached its maximum size.
    pub fn is_full(&self) -> bool {
        self.buf.len() >= self.max_size
    }

    /// The number of bytes stored.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns true if nothing has been stored.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// The number of bytes discarded because the buffer was full.
    pub fn dropped_bytes(&self) -> usize {
        self.dropped_bytes
    }

    /// The raw bytes stored so far.
    pub fn raw(&self) -> &[u8] {
        &self.buf
    }

    /// Compresses the stored output.
    ///
    /// Calling this again without appending in between returns the same
    /// bytes and ratio without recompressing.
    pub fn compress(&mut self, level: i32) -> &CompressedOutput {
        self.compressed
            .get_or_insert_with(|| CompressedOutput::compress(&self.buf, level))
    }

    /// Returns the compressed output, if [`compress`](Self::compress) was
    /// called since the last append.
    pub fn compressed(&self) -> Option<&CompressedOutput> {
        self.compressed.as_ref()
    }

    /// Returns the trailing `size` bytes of output, cut at a line boundary
    /// where one is available.
    pub fn tail_excerpt(&self, size: usize) -> &[u8] {
        tail_excerpt(&self.buf, size)
    }

    /// Marks the capture as done, returning a [`CapturedOutput`].
    pub fn freeze(self) -> CapturedOutput {
        CapturedOutput {
            raw: self.buf.freeze(),
            compressed: self.compressed,
            dropped_bytes: self.dropped_bytes,
        }
    }
}

impl fmt::Debug for OutputBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputBuffer")
            .field("len", &self.buf.len())
            .field("max_size", &self.max_size)
            .field("dropped_bytes", &self.dropped_bytes)
            .field("compressed", &self.compressed.is_some())
            .finish()
    }
}

fn tail_excerpt(buf: &[u8], size: usize) -> &[u8] {
    if buf.len() <= size {
        return buf;
    }
    let tail = &buf[buf.len() - size..];
    // Skip the partial first line, unless the tail is a single line.
    match tail.iter().position(|&b| b == b'\n') {
        Some(pos) if pos + 1 < tail.len() => &tail[pos + 1..],
        _ => tail,
    }
}

/// How the bytes in a [`CompressedOutput`] are encoded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputEncoding {
    /// zstd-compressed.
    Zstd,

    /// Stored as-is, because compression did not make the output smaller.
    Stored,
}

/// A compressed representation of captured output.
#[derive(Clone, PartialEq, Eq)]
pub struct CompressedOutput {
    bytes: Bytes,
    raw_len: usize,
    encoding: OutputEncoding,
}

impl CompressedOutput {
    fn compress(raw: &[u8], level: i32) -> Self {
        let stored = || Self {
            bytes: Bytes::copy_from_slice(raw),
            raw_len: raw.len(),
            encoding: OutputEncoding::Stored,
        };

        match zstd::bulk::compress(raw, level) {
            Ok(compressed) if compressed.len() < raw.len() => Self {
                bytes: compressed.into(),
                raw_len: raw.len(),
                encoding: OutputEncoding::Zstd,
            },
            Ok(_) => stored(),
            Err(error) => {
                warn!(%error, "failed to compress test output, storing it uncompressed");
                stored()
            }
        }
    }

    /// The compressed bytes.
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// The encoding of [`bytes`](Self::bytes).
    pub fn encoding(&self) -> OutputEncoding {
        self.encoding
    }

    /// The size of the output before compression.
    pub fn raw_len(&self) -> usize {
        self.raw_len
    }

    /// Compressed size divided by raw size, in the interval (0, 1].
    ///
    /// Empty output has a ratio of 1.
    pub fn ratio(&self) -> f64 {
        if self.raw_len == 0 {
            1.0
        } else {
            self.bytes.len() as f64 / self.raw_len as f64
        }
    }

    /// Recovers the raw output.
    pub fn decompress(&self) -> io::Result<Bytes> {
        match self.encoding {
            OutputEncoding::Zstd => zstd::bulk::decompress(&self.bytes, self.raw_len).map(Into::into),
            OutputEncoding::Stored => Ok(self.bytes.clone()),
        }
    }
}

impl fmt::Debug for CompressedOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompressedOutput")
            .field("len", &self.bytes.len())
            .field("raw_len", &self.raw_len)
            .field("encoding", &self.encoding)
            .finish()
    }
}

/// The complete captured output of one attempt.
#[derive(Clone, Debug)]
pub struct CapturedOutput {
    raw: Bytes,
    compressed: Option<CompressedOutput>,
    dropped_bytes: usize,
}

impl CapturedOutput {
    /// Output for attempts that never launched a process.
    pub fn empty() -> Self {
        Self {
            raw: Bytes::new(),
            compressed: None,
            dropped_bytes: 0,
        }
    }

    /// The raw bytes of combined stdout and stderr.
    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    /// The raw output as a lossy UTF-8 string.
    pub fn lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.raw)
    }

    /// The compressed representation, if the output crossed the compression threshold.
    pub fn compressed(&self) -> Option<&CompressedOutput> {
        self.compressed.as_ref()
    }

    /// Compresses the output if that hasn't happened yet.
    pub fn compress(&mut self, level: i32) -> &CompressedOutput {
        self.compressed
            .get_or_insert_with(|| CompressedOutput::compress(&self.raw, level))
    }

    /// The compression ratio, or 1 if the output was not compressed.
    pub fn compression_ratio(&self) -> f64 {
        self.compressed.as_ref().map_or(1.0, CompressedOutput::ratio)
    }

    /// The number of bytes that were discarded because the output was too large.
    pub fn dropped_bytes(&self) -> usize {
        self.dropped_bytes
    }

    /// The trailing `size` bytes, cut at a line boundary where possible.
    pub fn tail_excerpt(&self, size: usize) -> &[u8] {
        tail_excerpt(&self.raw, size)
    }
}
