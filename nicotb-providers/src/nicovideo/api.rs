//! Remote API seam used by the session negotiator.

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;

use super::types::{ContentId, GuestWatchInfo, MediaSession, ServiceUserId, VideoInfo};
use crate::error::ProviderClientError;

/// The remote calls a negotiation is made of.
///
/// [`super::NicovideoClient`] is the HTTP implementation. Each method maps to
/// exactly one request; none of them retry.
#[async_trait]
pub trait NicovideoApi: Send + Sync {
    /// Embed metadata for `id`, tagged with the caller's service user id.
    async fn fetch_video_info(
        &self,
        id: &ContentId,
        service_user_id: &ServiceUserId,
    ) -> Result<VideoInfo, ProviderClientError>;

    /// Legacy watch info, parsed from its URL-encoded form body.
    async fn fetch_thumb_watch_info(
        &self,
        id: &ContentId,
        play_key: &str,
    ) -> Result<IndexMap<String, String>, ProviderClientError>;

    /// Guest watch info for the modern path; `signature` is the watch
    /// signature the embed metadata offered.
    async fn fetch_guest_watch_info(
        &self,
        id: &ContentId,
        info: &VideoInfo,
        signature: &str,
        action_track_id: &ServiceUserId,
    ) -> Result<GuestWatchInfo, ProviderClientError>;

    /// Open a media session. `Ok(None)` means the platform answered without
    /// session data.
    async fn create_session(
        &self,
        guest: &GuestWatchInfo,
        request: &Value,
    ) -> Result<Option<MediaSession>, ProviderClientError>;

    /// Re-submit the full session descriptor to keep the session alive.
    /// A non-2xx answer is an error; `Ok(None)` means no session data came back.
    async fn update_session(
        &self,
        guest: &GuestWatchInfo,
        session: &MediaSession,
    ) -> Result<Option<MediaSession>, ProviderClientError>;
}
