//! niconico HTTP Client

use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use reqwest::{header::{CONTENT_TYPE, ORIGIN}, Client};
use serde_json::Value;
use url::Url;

use super::api::NicovideoApi;
use super::form::parse_form_body;
use super::types::{
    Chat, CommentThreadLocator, ContentId, DataEnvelope, GuestWatchInfo, MediaSession, ServiceUserId,
    ThreadPacket, VideoInfo,
};
use crate::error::{check_response, json_with_limit, text_with_limit, ProviderClientError};

/// `parent` query value identifying this player to the embed API.
const PARENT: &str = "nicotb";
const DEVICE: &str = "html5_watch";
const FRONTEND_ID: &str = "70";
const COMMENT_API_VERSION: &str = "20090904";

const EMBED_BASE: &str = "http://embed.nicovideo.jp";
const EXT_BASE: &str = "http://ext.nicovideo.jp";
const WWW_BASE: &str = "http://www.nicovideo.jp";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Base URLs of the platform endpoints.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub embed_base: Url,
    pub ext_base: Url,
    pub www_base: Url,
    pub connect_timeout: Duration,
    pub timeout: Duration,
}

impl Endpoints {
    /// Build from base URL strings with the default timeouts.
    pub fn new(embed_base: &str, ext_base: &str, www_base: &str) -> Result<Self, ProviderClientError> {
        Ok(Self {
            embed_base: Url::parse(embed_base)?,
            ext_base: Url::parse(ext_base)?,
            www_base: Url::parse(www_base)?,
            connect_timeout: CONNECT_TIMEOUT,
            timeout: REQUEST_TIMEOUT,
        })
    }

    /// The public niconico hosts.
    pub fn nicovideo() -> Result<Self, ProviderClientError> {
        Self::new(EMBED_BASE, EXT_BASE, WWW_BASE)
    }

    /// All three APIs rooted at the same base (useful against a mock server).
    pub fn with_base(base: &str) -> Result<Self, ProviderClientError> {
        Self::new(base, base, base)
    }
}

/// niconico HTTP Client
#[derive(Debug, Clone)]
pub struct NicovideoClient {
    client: Client,
    endpoints: Endpoints,
}

impl NicovideoClient {
    /// Create a new client. Cookies are kept across calls, as the watch APIs
    /// expect the embed cookies on follow-up requests.
    pub fn new(endpoints: Endpoints) -> Result<Self, ProviderClientError> {
        let client = Client::builder()
            .cookie_store(true)
            .connect_timeout(endpoints.connect_timeout)
            .timeout(endpoints.timeout)
            .pool_max_idle_per_host(10)
            .build()?;
        Ok(Self { client, endpoints })
    }

    /// Fetch the overlay comments of a thread, ordered by `vpos`.
    ///
    /// `res_from` is negative to ask for the latest N comments.
    pub async fn fetch_comments(
        &self,
        locator: &CommentThreadLocator,
        res_from: i64,
    ) -> Result<Vec<Chat>, ProviderClientError> {
        let base = locator.server_url.replace("/api/", "/api.json/");
        let url = format!("{}/thread", base.trim_end_matches('/'));
        tracing::debug!(url = %url, thread_id = %locator.thread_id, "Fetching comments");

        let res_from = res_from.to_string();
        let req = self.client.get(&url).query(&[
            ("thread", locator.thread_id.as_str()),
            ("version", COMMENT_API_VERSION),
            ("res_from", res_from.as_str()),
        ]);

        let resp = check_response(req.send().await?)?;
        let packets: Vec<ThreadPacket> = json_with_limit(resp).await?;

        let mut chats: Vec<Chat> = packets.into_iter().filter_map(|p| p.chat).collect();
        chats.sort_by_key(|c| c.vpos);
        Ok(chats)
    }

    /// Session API URL with `extra` appended as path segments.
    fn session_url(guest: &GuestWatchInfo, extra: &[&str]) -> Result<Url, ProviderClientError> {
        let mut url = Url::parse(guest.session_api_url()?)?;
        if !extra.is_empty() {
            endpoint_segments(&mut url, extra)?;
        }
        Ok(url)
    }

    /// Decode a session-open response.
    ///
    /// The session API answers refusals with a 4xx status and a JSON body
    /// that lacks `data`; that is reported as `Ok(None)`.
    async fn session_open_response(resp: reqwest::Response) -> Result<Option<MediaSession>, ProviderClientError> {
        let status = resp.status();
        let url = resp.url().to_string();
        if status.is_server_error() {
            return Err(ProviderClientError::Http { status, url });
        }

        match json_with_limit::<DataEnvelope<Value>>(resp).await {
            Ok(envelope) => match envelope.data {
                Some(data) => MediaSession::from_data(data),
                None => Ok(None),
            },
            Err(ProviderClientError::Parse(_)) if !status.is_success() => {
                Err(ProviderClientError::Http { status, url })
            }
            Err(e) => Err(e),
        }
    }
}

/// Push `segments` onto the path of `url`.
fn endpoint_segments(url: &mut Url, segments: &[&str]) -> Result<(), ProviderClientError> {
    let display = url.to_string();
    url.path_segments_mut()
        .map_err(|()| ProviderClientError::InvalidConfig(format!("URL cannot be a base: {display}")))?
        .pop_if_empty()
        .extend(segments);
    Ok(())
}

fn endpoint(base: &Url, segments: &[&str]) -> Result<Url, ProviderClientError> {
    let mut url = base.clone();
    endpoint_segments(&mut url, segments)?;
    Ok(url)
}

#[async_trait]
impl NicovideoApi for NicovideoClient {
    async fn fetch_video_info(
        &self,
        id: &ContentId,
        service_user_id: &ServiceUserId,
    ) -> Result<VideoInfo, ProviderClientError> {
        let url = endpoint(&self.endpoints.embed_base, &["play", id.as_str()])?;
        tracing::debug!(url = %url, "Fetching embed video info");

        let req = self
            .client
            .get(url)
            .query(&[("parent", PARENT), ("serviceUserId", service_user_id.as_str())]);

        let resp = check_response(req.send().await?)?;
        json_with_limit(resp).await
    }

    async fn fetch_thumb_watch_info(
        &self,
        id: &ContentId,
        play_key: &str,
    ) -> Result<IndexMap<String, String>, ProviderClientError> {
        let url = endpoint(&self.endpoints.ext_base, &["thumb_watch", id.as_str()])?;
        tracing::debug!(url = %url, "Fetching legacy watch info");

        let req = self.client.get(url).query(&[("k", play_key), ("device", DEVICE)]);

        let resp = check_response(req.send().await?)?;
        let body = text_with_limit(resp).await?;
        Ok(parse_form_body(&body))
    }

    async fn fetch_guest_watch_info(
        &self,
        id: &ContentId,
        info: &VideoInfo,
        signature: &str,
        action_track_id: &ServiceUserId,
    ) -> Result<GuestWatchInfo, ProviderClientError> {
        let url = endpoint(&self.endpoints.www_base, &["api", "guest_watch", id.as_str()])?;
        tracing::debug!(url = %url, "Fetching guest watch info");

        let videos = info.videos.join(",");
        let audios = info.audios.join(",");
        let skips = info.skips.join(",");
        let content_key_timeout = info.content_key_timeout.to_string();

        let req = self.client.get(url).query(&[
            ("frontend_id", FRONTEND_ID),
            ("device", DEVICE),
            ("videos", videos.as_str()),
            ("audios", audios.as_str()),
            ("protocols", "http"),
            ("skips", skips.as_str()),
            ("content_key_timeout", content_key_timeout.as_str()),
            ("signature", signature),
            ("action_track_id", action_track_id.as_str()),
            ("increment_view_counter", "true"),
            ("ver", "1"),
            ("service_user_id", info.service_user_id.as_str()),
        ]);

        let resp = check_response(req.send().await?)?;
        let envelope: DataEnvelope<GuestWatchInfo> = json_with_limit(resp).await?;
        envelope
            .data
            .ok_or_else(|| ProviderClientError::Parse("Missing guest watch data".to_string()))
    }

    async fn create_session(
        &self,
        guest: &GuestWatchInfo,
        request: &Value,
    ) -> Result<Option<MediaSession>, ProviderClientError> {
        let url = Self::session_url(guest, &[])?;
        tracing::debug!(url = %url, "Opening media session");

        let origin = self.endpoints.embed_base.origin().ascii_serialization();
        let req = self
            .client
            .post(url)
            .query(&[("_format", "json")])
            .header(ORIGIN, origin)
            .header(CONTENT_TYPE, "application/json")
            .body(serde_json::to_vec(request)?);

        Self::session_open_response(req.send().await?).await
    }

    async fn update_session(
        &self,
        guest: &GuestWatchInfo,
        session: &MediaSession,
    ) -> Result<Option<MediaSession>, ProviderClientError> {
        let url = Self::session_url(guest, &[session.id.as_str()])?;
        tracing::debug!(url = %url, session_id = %session.id, "Renewing media session");

        let req = self
            .client
            .post(url)
            .query(&[("_format", "json"), ("_method", "PUT")])
            .header(CONTENT_TYPE, "application/json")
            .body(serde_json::to_vec(&session.descriptor)?);

        // Any non-2xx here means the session is gone.
        let resp = check_response(req.send().await?)?;
        let envelope: DataEnvelope<Value> = json_with_limit(resp).await?;
        match envelope.data {
            Some(data) => MediaSession::from_data(data),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_segments() {
        let base = Url::parse("http://embed.nicovideo.jp").unwrap();
        assert_eq!(endpoint(&base, &["play", "sm9"]).unwrap().as_str(), "http://embed.nicovideo.jp/play/sm9");

        let nested = Url::parse("http://127.0.0.1:8080/mock/").unwrap();
        assert_eq!(
            endpoint(&nested, &["api", "guest_watch", "sm9"]).unwrap().as_str(),
            "http://127.0.0.1:8080/mock/api/guest_watch/sm9"
        );
    }

    #[test]
    fn test_endpoint_escapes_id() {
        let base = Url::parse("http://embed.nicovideo.jp").unwrap();
        let url = endpoint(&base, &["play", "sm9/../x?y"]).unwrap();
        assert_eq!(url.as_str(), "http://embed.nicovideo.jp/play/sm9%2F..%2Fx%3Fy");
    }

    #[test]
    fn test_nicovideo_endpoints() {
        let endpoints = Endpoints::nicovideo().unwrap();
        assert_eq!(endpoints.embed_base.origin().ascii_serialization(), "http://embed.nicovideo.jp");
        assert_eq!(endpoints.www_base.as_str(), "http://www.nicovideo.jp/");
        assert_eq!(endpoints.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_endpoints_reject_bad_base() {
        let err = Endpoints::new("http://embed.nicovideo.jp", "not a url", "http://www.nicovideo.jp").unwrap_err();
        assert!(matches!(err, ProviderClientError::InvalidConfig(_)));
    }
}
