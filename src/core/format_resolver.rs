//! Format resolution
//!
//! Turns an [`OutputSpec`] into the concrete mechanics handed to the
//! extractor: format selector, container, post-processing and thumbnail
//! embedding. Resolution is pure and total over the closed spec space; the
//! only rejection path for loose input is [`resolve_choice`].

use serde::{Deserialize, Serialize};

use crate::core::models::{AppResult, AudioCodec, OutputSpec};

/// Container used when merging separate video and audio streams
pub const VIDEO_CONTAINER: &str = "mkv";

/// Concrete download mechanics for one output spec
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatPlan {
    /// Extractor format selector (`-f`)
    pub selector: String,
    /// Extension of the final file
    pub extension: String,
    /// Container for merged video/audio streams, video path only
    pub merge_container: Option<String>,
    /// Codec of the extract-audio step, audio path only
    pub audio_codec: Option<AudioCodec>,
    /// Whether a transcoding post-process runs after extraction
    pub requires_transcode: bool,
    /// Best-effort cover art embedding, video path only
    pub embed_thumbnail: bool,
}

impl FormatPlan {
    /// Whether ffmpeg must be present for this plan to succeed
    pub fn requires_ffmpeg(&self) -> bool {
        self.requires_transcode || self.merge_container.is_some()
    }

    /// Streams the extractor transfers one after another: video and audio
    /// when merging, a single stream otherwise
    pub fn stream_count(&self) -> usize {
        if self.merge_container.is_some() {
            2
        } else {
            1
        }
    }

    /// Render the plan as yt-dlp arguments
    pub fn extractor_args(&self) -> Vec<String> {
        let mut args = vec!["-f".to_string(), self.selector.clone()];

        if let Some(container) = &self.merge_container {
            args.push("--merge-output-format".to_string());
            args.push(container.clone());
            // progressive fallbacks skip the merge step
            args.push("--remux-video".to_string());
            args.push(container.clone());
        }

        if let Some(codec) = self.audio_codec {
            args.extend([
                "--extract-audio".to_string(),
                "--audio-format".to_string(),
                codec.as_str().to_string(),
                "--audio-quality".to_string(),
                "0".to_string(),
            ]);
        }

        if self.embed_thumbnail {
            args.push("--embed-thumbnail".to_string());
        }

        args
    }
}

/// Resolve an output spec into a format plan
pub fn resolve(spec: &OutputSpec) -> FormatPlan {
    match spec {
        OutputSpec::Video { quality } => {
            let selector = match quality.max_height() {
                Some(height) => format!(
                    "bestvideo[height<={h}]+bestaudio/best[height<={h}]",
                    h = height
                ),
                None => "bestvideo+bestaudio/best".to_string(),
            };

            FormatPlan {
                selector,
                extension: VIDEO_CONTAINER.to_string(),
                merge_container: Some(VIDEO_CONTAINER.to_string()),
                audio_codec: None,
                requires_transcode: false,
                embed_thumbnail: true,
            }
        }
        OutputSpec::Audio { codec } => FormatPlan {
            selector: "bestaudio/best".to_string(),
            extension: codec.extension().to_string(),
            merge_container: None,
            audio_codec: Some(*codec),
            requires_transcode: true,
            embed_thumbnail: false,
        },
    }
}

/// Parse loose UI strings and resolve them in one step
pub fn resolve_choice(
    kind: &str,
    video_quality: Option<&str>,
    audio_codec: Option<&str>,
) -> AppResult<FormatPlan> {
    let spec = OutputSpec::from_choice(kind, video_quality, audio_codec)?;
    Ok(resolve(&spec))
}
