//! niconico API Data Structures

use std::fmt;

use rand::seq::SliceRandom;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};

use crate::error::ProviderClientError;

/// Alphabet the service user id is drawn from.
const CHARACTER_SET: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
const SERVICE_USER_ID_CHARS: usize = 10;

/// Heartbeat lifetime announced when opening a session.
pub const HEARTBEAT_LIFETIME_MS: u64 = 120_000;

/// Video id on the platform (e.g. `sm9`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentId(String);

impl ContentId {
    /// Trim and validate a user-supplied id.
    pub fn parse(id: &str) -> Result<Self, ProviderClientError> {
        let id = id.trim();
        if id.is_empty() {
            return Err(ProviderClientError::InvalidInput(
                "content id must not be empty".to_string(),
            ));
        }
        Ok(Self(id.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-negotiation client token: 10 shuffled letters, `_`, unix millis.
///
/// Best-effort nonce only; nothing guarantees uniqueness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceUserId(String);

impl ServiceUserId {
    #[must_use]
    pub fn generate() -> Self {
        let mut chars: Vec<char> = CHARACTER_SET.chars().collect();
        chars.shuffle(&mut rand::rng());
        let prefix: String = chars.into_iter().take(SERVICE_USER_ID_CHARS).collect();
        let time = chrono::Utc::now().timestamp_millis();
        Self(format!("{prefix}_{time}"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceUserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// API Response Types
// ============================================================================

/// Embed metadata (`/play/{id}`)
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoInfo {
    #[serde(default)]
    pub content_id: String,
    /// Present for older content served through the legacy watch path
    #[serde(default)]
    pub thumb_watch_play_key: Option<String>,
    /// Present for content served through DMC sessions
    #[serde(default)]
    pub watch_api_signature: Option<String>,
    #[serde(default, deserialize_with = "lenient_string_vec")]
    pub videos: Vec<String>,
    #[serde(default, deserialize_with = "lenient_string_vec")]
    pub audios: Vec<String>,
    #[serde(default, deserialize_with = "lenient_string_vec")]
    pub skips: Vec<String>,
    #[serde(default)]
    pub content_key_timeout: u64,
    #[serde(default)]
    pub service_user_id: String,
}

/// Which negotiation a [`VideoInfo`] asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiationPath {
    Legacy { play_key: String },
    Modern { signature: String },
    Unrecognized,
}

impl VideoInfo {
    /// Decide the negotiation path. A legacy play key wins over a signature;
    /// empty strings count as absent.
    #[must_use]
    pub fn negotiation_path(&self) -> NegotiationPath {
        let non_empty = |v: &Option<String>| v.as_deref().filter(|s| !s.is_empty()).map(str::to_string);

        if let Some(play_key) = non_empty(&self.thumb_watch_play_key) {
            NegotiationPath::Legacy { play_key }
        } else if let Some(signature) = non_empty(&self.watch_api_signature) {
            NegotiationPath::Modern { signature }
        } else {
            NegotiationPath::Unrecognized
        }
    }
}

/// `data` of the guest watch response
#[derive(Debug, Clone, Deserialize)]
pub struct GuestWatchInfo {
    pub session_api: SessionApi,
    pub thread: ThreadInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionApi {
    pub recipe_id: String,
    #[serde(default)]
    pub player_id: String,
    #[serde(default)]
    pub service_user_id: String,
    pub token: String,
    pub signature: String,
    #[serde(default)]
    pub auth_types: AuthTypes,
    #[serde(default)]
    pub api_urls: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthTypes {
    #[serde(default)]
    pub http: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThreadInfo {
    #[serde(default)]
    pub server_url: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub thread_id: String,
}

impl GuestWatchInfo {
    /// Base URL of the session API (first entry of `api_urls`).
    pub fn session_api_url(&self) -> Result<&str, ProviderClientError> {
        self.session_api
            .api_urls
            .first()
            .map(String::as_str)
            .ok_or_else(|| ProviderClientError::InvalidConfig("guest watch info has no session api url".to_string()))
    }

    #[must_use]
    pub fn thread_locator(&self) -> CommentThreadLocator {
        CommentThreadLocator {
            server_url: self.thread.server_url.clone(),
            thread_id: self.thread.thread_id.clone(),
        }
    }
}

/// JSON envelope shared by guest watch and session responses.
#[derive(Debug, Clone, Deserialize)]
pub struct DataEnvelope<T> {
    pub data: Option<T>,
}

/// A live DMC session.
///
/// `descriptor` is the full `data` payload as returned by the platform and is
/// what renewal re-submits.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaSession {
    pub id: String,
    pub content_uri: String,
    pub descriptor: Value,
}

impl MediaSession {
    /// Build from a response `data` payload. Null or empty payloads yield `None`.
    pub fn from_data(data: Value) -> Result<Option<Self>, ProviderClientError> {
        let is_empty = match &data {
            Value::Null => true,
            Value::Object(map) => map.is_empty(),
            _ => false,
        };
        if is_empty {
            return Ok(None);
        }

        let session = data
            .get("session")
            .ok_or_else(|| ProviderClientError::Parse("session data has no `session` object".to_string()))?;
        let id = session
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderClientError::Parse("session has no id".to_string()))?
            .to_string();
        let content_uri = session
            .get("content_uri")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        Ok(Some(Self {
            id,
            content_uri,
            descriptor: data,
        }))
    }
}

/// Build the session-open request body.
#[must_use]
pub fn build_session_request(info: &VideoInfo, guest: &GuestWatchInfo, heartbeat_lifetime_ms: u64) -> Value {
    let api = &guest.session_api;
    json!({
        "session": {
            "recipe_id": api.recipe_id,
            "content_id": info.content_id,
            "content_type": "movie",
            "content_src_id_sets": [{
                "content_src_ids": [{
                    "src_id_to_mux": {
                        "video_src_ids": info.videos,
                        "audio_src_ids": info.audios,
                    }
                }]
            }],
            "timing_constraint": "unlimited",
            "keep_method": {
                "heartbeat": { "lifetime": heartbeat_lifetime_ms }
            },
            "protocol": {
                "name": "http",
                "parameters": {
                    "http_parameters": {
                        "parameters": { "http_output_download_parameters": {} }
                    }
                }
            },
            "content_uri": "",
            "session_operation_auth": {
                "session_operation_auth_by_signature": {
                    "token": api.token,
                    "signature": api.signature,
                }
            },
            "content_auth": {
                "auth_type": api.auth_types.http,
                "content_key_timeout": 0,
                "service_id": "nicovideo",
                "service_user_id": api.service_user_id,
            },
            "client_info": { "player_id": api.player_id },
            "priority": 0,
        }
    })
}

// ============================================================================
// Negotiation results
// ============================================================================

/// Server URL + thread id for fetching overlay comments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommentThreadLocator {
    pub server_url: String,
    pub thread_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    /// Static URL from the legacy watch path; nothing to renew
    Legacy,
    /// DMC session kept alive by the renewal task
    Modern,
}

/// What `acquire_session` hands to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlayableSession {
    pub kind: SessionKind,
    pub url: String,
    pub thread: CommentThreadLocator,
}

// ============================================================================
// Comments
// ============================================================================

/// One entry of the comment thread response. Only `chat` entries are kept.
#[derive(Debug, Clone, Deserialize)]
pub struct ThreadPacket {
    #[serde(default)]
    pub chat: Option<Chat>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Chat {
    #[serde(default)]
    pub no: u64,
    /// Playback position in 1/100 s
    #[serde(default)]
    pub vpos: i64,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub mail: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub date: Option<i64>,
}

// ============================================================================
// Lenient field decoding
// ============================================================================

/// The platform sends ids as strings or numbers depending on the endpoint.
#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    String(String),
    Number(serde_json::Number),
}

impl From<StringOrNumber> for String {
    fn from(v: StringOrNumber) -> Self {
        match v {
            StringOrNumber::String(s) => s,
            StringOrNumber::Number(n) => n.to_string(),
        }
    }
}

fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Option::<StringOrNumber>::deserialize(deserializer).map(|v| v.map(Into::into).unwrap_or_default())
}

fn lenient_string_vec<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    let values = Option::<Vec<StringOrNumber>>::deserialize(deserializer)?;
    Ok(values.unwrap_or_default().into_iter().map(Into::into).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guest() -> GuestWatchInfo {
        serde_json::from_value(json!({
            "session_api": {
                "recipe_id": "nicovideo-sm9",
                "player_id": "nicovideo-6-abc",
                "service_user_id": "suid",
                "token": "{\"service_id\":\"nicovideo\"}",
                "signature": "sig",
                "auth_types": { "http": "ht2" },
                "api_urls": ["https://api.dmc.nico/api/sessions"]
            },
            "thread": { "server_url": "https://nmsg.nicovideo.jp/api/", "thread_id": 1173108780 }
        }))
        .unwrap()
    }

    #[test]
    fn test_content_id_parse() {
        assert_eq!(ContentId::parse("  sm9 ").unwrap().as_str(), "sm9");
        assert!(matches!(ContentId::parse("   "), Err(ProviderClientError::InvalidInput(_))));
        assert!(ContentId::parse("").is_err());
    }

    #[test]
    fn test_service_user_id_shape() {
        let id = ServiceUserId::generate();
        let (prefix, time) = id.as_str().split_once('_').unwrap();
        assert_eq!(prefix.len(), 10);
        assert!(prefix.chars().all(|c| c.is_ascii_alphabetic()));
        let unique: std::collections::HashSet<char> = prefix.chars().collect();
        assert_eq!(unique.len(), 10, "drawn from a shuffle, so no repeats");
        assert!(time.parse::<i64>().unwrap() > 1_500_000_000_000);
    }

    #[test]
    fn test_negotiation_path() {
        let legacy = VideoInfo {
            thumb_watch_play_key: Some("key".to_string()),
            watch_api_signature: Some("sig".to_string()),
            ..VideoInfo::default()
        };
        assert_eq!(legacy.negotiation_path(), NegotiationPath::Legacy { play_key: "key".to_string() });

        let modern = VideoInfo {
            thumb_watch_play_key: Some(String::new()),
            watch_api_signature: Some("sig".to_string()),
            ..VideoInfo::default()
        };
        assert_eq!(modern.negotiation_path(), NegotiationPath::Modern { signature: "sig".to_string() });

        assert_eq!(VideoInfo::default().negotiation_path(), NegotiationPath::Unrecognized);
    }

    #[test]
    fn test_video_info_deserialize() {
        let info: VideoInfo = serde_json::from_value(json!({
            "contentId": "sm9",
            "watchApiSignature": "sig",
            "videos": ["archive_h264_360p"],
            "audios": ["archive_aac_64kbps"],
            "skips": [0, 5],
            "contentKeyTimeout": 600000,
            "serviceUserId": "abc_1"
        }))
        .unwrap();
        assert_eq!(info.content_id, "sm9");
        assert_eq!(info.skips, vec!["0".to_string(), "5".to_string()]);
        assert_eq!(info.content_key_timeout, 600_000);
        assert!(info.thumb_watch_play_key.is_none());
    }

    #[test]
    fn test_thread_id_accepts_number() {
        let g = guest();
        assert_eq!(g.thread.thread_id, "1173108780");
        assert_eq!(g.session_api_url().unwrap(), "https://api.dmc.nico/api/sessions");
    }

    #[test]
    fn test_build_session_request() {
        let info = VideoInfo {
            content_id: "sm9".to_string(),
            videos: vec!["v1".to_string()],
            audios: vec!["a1".to_string()],
            ..VideoInfo::default()
        };
        let body = build_session_request(&info, &guest(), HEARTBEAT_LIFETIME_MS);
        let session = &body["session"];
        assert_eq!(session["recipe_id"], "nicovideo-sm9");
        assert_eq!(session["content_id"], "sm9");
        assert_eq!(session["content_type"], "movie");
        let mux = &session["content_src_id_sets"][0]["content_src_ids"][0]["src_id_to_mux"];
        assert_eq!(mux["video_src_ids"], json!(["v1"]));
        assert_eq!(mux["audio_src_ids"], json!(["a1"]));
        assert_eq!(session["timing_constraint"], "unlimited");
        assert_eq!(session["keep_method"]["heartbeat"]["lifetime"], 120_000);
        assert_eq!(session["protocol"]["name"], "http");
        assert_eq!(
            session["session_operation_auth"]["session_operation_auth_by_signature"]["signature"],
            "sig"
        );
        assert_eq!(session["content_auth"]["auth_type"], "ht2");
        assert_eq!(session["content_auth"]["service_id"], "nicovideo");
        assert_eq!(session["content_auth"]["service_user_id"], "suid");
        assert_eq!(session["client_info"]["player_id"], "nicovideo-6-abc");
        assert_eq!(session["priority"], 0);
    }

    #[test]
    fn test_media_session_from_data() {
        assert!(MediaSession::from_data(Value::Null).unwrap().is_none());
        assert!(MediaSession::from_data(json!({})).unwrap().is_none());

        let data = json!({ "session": { "id": "s1", "content_uri": "https://dmc/stream.mp4" } });
        let session = MediaSession::from_data(data.clone()).unwrap().unwrap();
        assert_eq!(session.id, "s1");
        assert_eq!(session.content_uri, "https://dmc/stream.mp4");
        assert_eq!(session.descriptor, data);

        assert!(MediaSession::from_data(json!({ "session": {} })).is_err());
    }
}
