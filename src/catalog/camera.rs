//! Camera definition

use serde::Deserialize;

use super::encoding::EncodingParams;

/// Content type announced for each multipart part
pub const DEFAULT_PART_CONTENT_TYPE: &str = "image/jpeg";

/// A single upstream camera
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraSpec {
    /// Unique camera name (e.g., "Camera_Zone_1")
    pub name: String,

    /// HTTP path serving this camera (e.g., "/camera1")
    pub endpoint: String,

    /// Upstream source URI (e.g., "rtsp://192.168.0.237:554/stream1")
    pub source_url: String,

    /// Transcoder parameters
    #[serde(default)]
    pub encoding: EncodingParams,

    /// Content type of each streamed part
    #[serde(default = "default_part_content_type")]
    pub part_content_type: String,
}

fn default_part_content_type() -> String {
    DEFAULT_PART_CONTENT_TYPE.to_string()
}

impl CameraSpec {
    /// Create a camera with default encoding parameters
    pub fn new(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        source_url: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            source_url: source_url.into(),
            encoding: EncodingParams::default(),
            part_content_type: default_part_content_type(),
        }
    }

    /// Replace the encoding parameters
    pub fn with_encoding(mut self, encoding: EncodingParams) -> Self {
        self.encoding = encoding;
        self
    }

    /// Full transcoder argument list for continuous streaming to stdout
    pub fn stream_args(&self) -> Vec<String> {
        let mut args = self.encoding.input_args();
        args.push("-i".into());
        args.push(self.source_url.clone());
        args.extend(self.encoding.output_args());
        args.push("pipe:1".into());
        args
    }
}
