//! Transcoder encoding parameters
//!
//! The knobs handed to the external transcoder, rendered as a fixed, ordered
//! argument list.

use serde::Deserialize;

/// Ordered transcoder output parameters for one camera
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EncodingParams {
    /// RTSP transport mode ("tcp" or "udp")
    pub transport: String,
    /// Output container passed to `-f`
    pub format: String,
    /// Output video codec passed to `-vcodec`
    pub codec: String,
    /// Quality scale passed to `-q:v` (2-31, lower is better)
    pub quality: u8,
    /// Output frame rate
    pub frame_rate: u32,
    /// Output width in pixels
    pub width: u32,
    /// Output height in pixels
    pub height: u32,
    /// Drop any audio track
    pub no_audio: bool,
    /// Extra arguments appended after the standard knobs
    pub extra: Vec<String>,
}

impl Default for EncodingParams {
    fn default() -> Self {
        Self {
            transport: "tcp".into(),
            format: "image2pipe".into(),
            codec: "mjpeg".into(),
            quality: 3,
            frame_rate: 15,
            width: 1280,
            height: 720,
            no_audio: true,
            extra: Vec::new(),
        }
    }
}

impl EncodingParams {
    /// Set quality scale
    pub fn quality(mut self, quality: u8) -> Self {
        self.quality = quality.clamp(2, 31);
        self
    }

    /// Set frame rate
    pub fn frame_rate(mut self, fps: u32) -> Self {
        self.frame_rate = fps.max(1);
        self
    }

    /// Set output resolution
    pub fn size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Append an extra argument
    pub fn extra_arg(mut self, arg: impl Into<String>) -> Self {
        self.extra.push(arg.into());
        self
    }

    /// Arguments that precede the input (`-rtsp_transport`)
    pub fn input_args(&self) -> Vec<String> {
        vec!["-rtsp_transport".into(), self.transport.clone()]
    }

    /// Arguments that follow the input, up to but excluding the output target
    pub fn output_args(&self) -> Vec<String> {
        let mut args = vec![
            "-f".into(),
            self.format.clone(),
            "-vcodec".into(),
            self.codec.clone(),
            "-q:v".into(),
            self.quality.to_string(),
            "-r".into(),
            self.frame_rate.to_string(),
            "-s".into(),
            format!("{}x{}", self.width, self.height),
        ];

        if self.no_audio {
            args.push("-an".into());
        }

        args.extend(self.extra.iter().cloned());
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_output_args_order() {
        let params = EncodingParams::default();

        assert_eq!(
            params.output_args(),
            vec![
                "-f", "image2pipe", "-vcodec", "mjpeg", "-q:v", "3", "-r", "15", "-s",
                "1280x720", "-an"
            ]
        );
    }

    #[test]
    fn test_audio_kept_and_extra_last() {
        let mut params = EncodingParams::default().extra_arg("-preset").extra_arg("ultrafast");
        params.no_audio = false;

        let args = params.output_args();
        assert!(!args.contains(&"-an".to_string()));
        assert_eq!(&args[args.len() - 2..], &["-preset", "ultrafast"]);
    }

    #[test]
    fn test_builder_clamps() {
        let params = EncodingParams::default().quality(0).frame_rate(0).size(640, 480);

        assert_eq!(params.quality, 2);
        assert_eq!(params.frame_rate, 1);
        assert_eq!(params.output_args()[9], "640x480");
    }

    #[test]
    fn test_deserialize_partial() {
        let params: EncodingParams =
            serde_json::from_str(r#"{"frameRate": 20, "width": 640, "height": 480}"#).unwrap();

        assert_eq!(params.frame_rate, 20);
        assert_eq!(params.transport, "tcp");
        assert_eq!(params.quality, 3);
    }
}
