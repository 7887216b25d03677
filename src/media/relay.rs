//! Frame relay
//!
//! Sits between the transcoder's stdout and the multipart framer. Process
//! chunk boundaries are arbitrary, so the relay decides what one payload
//! unit is:
//!
//! - [`FrameAlignment::Chunk`]: every chunk is forwarded as-is.
//! - [`FrameAlignment::Jpeg`]: the byte stream is re-cut at JPEG end-of-image
//!   markers so each unit is one whole image.
//!
//! Either way the concatenation of all units equals the process output
//! byte-for-byte: nothing is altered, dropped or reordered.

use bytes::{Bytes, BytesMut};
use serde::Deserialize;

/// Default upper bound on a buffered JPEG image
pub const DEFAULT_MAX_FRAME_SIZE: usize = 8 * 1024 * 1024;

const MARKER_SOI: u8 = 0xD8;
const MARKER_EOI: u8 = 0xD9;
const MARKER_SOS: u8 = 0xDA;
const MARKER_TEM: u8 = 0x01;

/// How process output is divided into payload units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameAlignment {
    /// One unit per process chunk
    Chunk,
    /// One unit per JPEG image
    #[default]
    Jpeg,
}

/// Turns process chunks into payload units
#[derive(Debug)]
pub struct FrameRelay {
    alignment: FrameAlignment,
    splitter: JpegSplitter,
}

impl FrameRelay {
    /// Create a relay
    pub fn new(alignment: FrameAlignment, max_frame_size: usize) -> Self {
        Self {
            alignment,
            splitter: JpegSplitter::new(max_frame_size),
        }
    }

    /// Feed a chunk; returns the units completed by it, in order
    pub fn push(&mut self, chunk: Bytes) -> Vec<Bytes> {
        match self.alignment {
            FrameAlignment::Chunk => vec![chunk],
            FrameAlignment::Jpeg => self.splitter.push(&chunk),
        }
    }

    /// Flush whatever is buffered at end of stream
    pub fn finish(&mut self) -> Option<Bytes> {
        self.splitter.finish()
    }

    /// Bytes currently held back waiting for a frame end
    pub fn buffered(&self) -> usize {
        self.splitter.buf.len()
    }
}

/// Incremental JPEG boundary detector
///
/// Walks marker segments by their declared lengths and only searches for
/// markers inside entropy-coded data, where `0xFF` is byte-stuffed. A stray
/// `FF D9` inside a table or metadata segment therefore never ends a frame.
#[derive(Debug)]
struct JpegSplitter {
    buf: BytesMut,
    max_frame_size: usize,
    /// Resume position within `buf`
    scan_pos: usize,
    /// Whether `scan_pos` is inside entropy-coded data
    in_entropy: bool,
}

impl JpegSplitter {
    fn new(max_frame_size: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_frame_size,
            scan_pos: 0,
            in_entropy: false,
        }
    }

    fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.buf.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(end) = self.scan() {
            frames.push(self.buf.split_to(end).freeze());
            self.reset_scan();
        }

        if self.buf.len() > self.max_frame_size {
            tracing::warn!(
                buffered = self.buf.len(),
                max = self.max_frame_size,
                "No JPEG end marker within frame limit, flushing"
            );
            frames.push(self.buf.split().freeze());
            self.reset_scan();
        }

        frames
    }

    fn finish(&mut self) -> Option<Bytes> {
        self.reset_scan();
        if self.buf.is_empty() {
            None
        } else {
            Some(self.buf.split().freeze())
        }
    }

    fn reset_scan(&mut self) {
        self.scan_pos = 0;
        self.in_entropy = false;
    }

    /// Offset just past the next end-of-image marker, if buffered
    fn scan(&mut self) -> Option<usize> {
        let buf = &self.buf[..];
        let mut pos = self.scan_pos;

        loop {
            if self.in_entropy {
                while pos + 1 < buf.len() {
                    if buf[pos] == 0xFF {
                        let next = buf[pos + 1];
                        // Stuffed zero, restart markers and fill bytes stay in the scan
                        if next != 0x00 && !(0xD0..=0xD7).contains(&next) && next != 0xFF {
                            self.in_entropy = false;
                            break;
                        }
                    }
                    pos += 1;
                }
                if self.in_entropy {
                    self.scan_pos = pos;
                    return None;
                }
            }

            if pos + 2 > buf.len() {
                self.scan_pos = pos;
                return None;
            }

            if buf[pos] != 0xFF {
                // Not at a marker; resynchronise
                pos += 1;
                continue;
            }

            match buf[pos + 1] {
                MARKER_EOI => return Some(pos + 2),
                MARKER_SOI | MARKER_TEM | 0xD0..=0xD7 => pos += 2,
                0xFF => pos += 1,
                marker => {
                    if pos + 4 > buf.len() {
                        self.scan_pos = pos;
                        return None;
                    }
                    let len = u16::from_be_bytes([buf[pos + 2], buf[pos + 3]]) as usize;
                    pos += 2 + len;
                    if marker == MARKER_SOS {
                        self.in_entropy = true;
                    }
                }
            }
        }
    }
}
