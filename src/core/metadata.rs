//! Metadata fetching
//!
//! Classifies a user-supplied URL locally and asks the extractor for either
//! a single video or a flat playlist listing.

use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

use crate::core::extractor::MediaExtractor;
use crate::core::models::{AppError, AppResult, Metadata};
use crate::utils::validation::is_youtube_url;

/// What a URL points at
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlKind {
    Video { video_id: String },
    Playlist { playlist_id: String },
}

/// Classify a YouTube URL without touching the network. A `list` query
/// parameter makes it a playlist, even on a watch URL.
pub fn classify_url(url: &str) -> AppResult<UrlKind> {
    let url = url.trim();
    if !is_youtube_url(url) {
        return Err(AppError::InvalidUrl(url.to_string()));
    }

    let parsed = Url::parse(url).map_err(|e| AppError::InvalidUrl(format!("{}: {}", url, e)))?;
    let query = |key: &str| {
        parsed
            .query_pairs()
            .find(|(k, v)| k == key && !v.is_empty())
            .map(|(_, v)| v.into_owned())
    };

    if let Some(playlist_id) = query("list") {
        return Ok(UrlKind::Playlist { playlist_id });
    }

    let video_id = query("v").or_else(|| {
        // youtu.be/<id> and /embed/<id>
        parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
    });

    video_id
        .map(|video_id| UrlKind::Video { video_id })
        .ok_or_else(|| AppError::InvalidUrl(url.to_string()))
}

/// Canonical URL the playlist listing is fetched from
pub fn canonical_playlist_url(playlist_id: &str) -> String {
    format!("https://www.youtube.com/playlist?list={}", playlist_id)
}

/// Fetches normalized metadata through a [`MediaExtractor`]
pub struct MetadataFetcher {
    extractor: Arc<dyn MediaExtractor>,
}

impl MetadataFetcher {
    pub fn new(extractor: Arc<dyn MediaExtractor>) -> Self {
        Self { extractor }
    }

    /// Fetch a video or playlist. Single attempt, no retry.
    pub async fn fetch(&self, url: &str) -> AppResult<Metadata> {
        match classify_url(url)? {
            UrlKind::Video { video_id } => {
                debug!("Fetching video metadata for {}", video_id);
                let video = self.extractor.extract_video(url.trim()).await?;
                info!("Fetched video '{}'", video.title);
                Ok(Metadata::Video(video))
            }
            UrlKind::Playlist { playlist_id } => {
                debug!("Fetching playlist metadata for {}", playlist_id);
                let mut playlist = self
                    .extractor
                    .extract_playlist(&canonical_playlist_url(&playlist_id))
                    .await?;

                if playlist.entries.is_empty() {
                    return Err(AppError::Unavailable(format!(
                        "Playlist {} has no available videos",
                        playlist_id
                    )));
                }
                if playlist.id.is_empty() {
                    playlist.id = playlist_id;
                }
                for (position, entry) in playlist.entries.iter_mut().enumerate() {
                    entry.playlist_index = Some(position);
                }

                info!(
                    "Fetched playlist '{}' with {} videos",
                    playlist.title,
                    playlist.entries.len()
                );
                Ok(Metadata::Playlist(playlist))
            }
        }
    }
}
