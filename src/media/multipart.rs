//! Multipart framer
//!
//! Wraps opaque payloads into `multipart/x-mixed-replace` parts:
//!
//! ```text
//! --<boundary>\r\n
//! Content-Type: <type>\r\n
//! Content-Length: <payload length>\r\n
//! \r\n
//! <payload bytes>\r\n
//! ```
//!
//! Each part is built into a single buffer so it reaches the socket whole or
//! not at all. Payload bytes are copied verbatim and never inspected.

use bytes::{BufMut, Bytes, BytesMut};

/// Default boundary token
pub const DEFAULT_BOUNDARY: &str = "camrelayframe";

/// Multipart part encoder
#[derive(Debug, Clone)]
pub struct MultipartFramer {
    boundary: String,
    part_content_type: String,
}

impl MultipartFramer {
    /// Create a framer with the given boundary token and part content type
    pub fn new(boundary: impl Into<String>, part_content_type: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            part_content_type: part_content_type.into(),
        }
    }

    /// Boundary token (without the leading dashes)
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Value of the response `Content-Type` header
    pub fn content_type(&self) -> String {
        format!("multipart/x-mixed-replace; boundary={}", self.boundary)
    }

    /// Encode one part around `payload`
    pub fn encode_part(&self, payload: &[u8]) -> Bytes {
        let header = format!(
            "--{}\r\nContent-Type: {}\r\nContent-Length: {}\r\n\r\n",
            self.boundary,
            self.part_content_type,
            payload.len()
        );

        let mut part = BytesMut::with_capacity(header.len() + payload.len() + 2);
        part.put_slice(header.as_bytes());
        part.put_slice(payload);
        part.put_slice(b"\r\n");
        part.freeze()
    }
}

impl Default for MultipartFramer {
    fn default() -> Self {
        Self::new(DEFAULT_BOUNDARY, crate::catalog::camera::DEFAULT_PART_CONTENT_TYPE)
    }
}
