//! Session negotiation and keep-alive
//!
//! Turns a [`ContentId`] into a playable URL through one of two paths:
//!
//! 1. Legacy: the embed metadata carries a play key, the legacy watch
//!    endpoint returns a static URL. Nothing to keep alive.
//! 2. Modern: the embed metadata carries a watch signature, guest watch info
//!    is fetched, a DMC session is opened and re-submitted on a fixed interval
//!    until the negotiator is stopped or a new negotiation starts.
//!
//! Each negotiator owns at most one renewal task.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::api::NicovideoApi;
use super::types::{
    build_session_request, CommentThreadLocator, ContentId, GuestWatchInfo, MediaSession, NegotiationPath,
    PlayableSession, ServiceUserId, SessionKind, HEARTBEAT_LIFETIME_MS,
};
use crate::error::ProviderClientError;

/// Negotiator tuning
#[derive(Debug, Clone)]
pub struct NegotiatorConfig {
    /// Delay between session renewals
    pub renewal_interval: Duration,
    /// Heartbeat lifetime announced in the session descriptor
    pub heartbeat_lifetime_ms: u64,
    /// Buffered renewal events per subscriber
    pub event_capacity: usize,
}

impl Default for NegotiatorConfig {
    fn default() -> Self {
        Self {
            renewal_interval: Duration::from_millis(10_000),
            heartbeat_lifetime_ms: HEARTBEAT_LIFETIME_MS,
            event_capacity: 16,
        }
    }
}

/// Outcome of one renewal attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RenewalEvent {
    Renewed { session_id: String },
    Failed { session_id: String, error: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiatorState {
    Idle,
    /// Static legacy URL handed out; no renewal
    LegacyReady,
    Renewing { session_id: String },
}

struct RenewalTask {
    session_id: String,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl RenewalTask {
    /// Signal the loop to stop; it issues no further renewal once signalled.
    fn cancel(&self) {
        self.cancel.cancel();
        tracing::debug!(session_id = %self.session_id, "Renewal task cancelled");
    }

    /// Cancel and wait for the loop to exit, dropping any in-flight request.
    async fn shutdown(self) {
        self.cancel();
        if let Err(e) = self.handle.await {
            if e.is_panic() {
                tracing::error!(session_id = %self.session_id, "Renewal task panicked");
            }
        }
    }
}

/// Acquires playable sessions and keeps modern sessions alive.
pub struct SessionNegotiator {
    api: Arc<dyn NicovideoApi>,
    config: NegotiatorConfig,
    renewal: Mutex<Option<RenewalTask>>,
    state: Mutex<NegotiatorState>,
    events: broadcast::Sender<RenewalEvent>,
}

impl SessionNegotiator {
    #[must_use]
    pub fn new(api: Arc<dyn NicovideoApi>, config: NegotiatorConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            api,
            config,
            renewal: Mutex::new(None),
            state: Mutex::new(NegotiatorState::Idle),
            events,
        }
    }

    /// Subscribe to renewal outcomes.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RenewalEvent> {
        self.events.subscribe()
    }

    #[must_use]
    pub fn state(&self) -> NegotiatorState {
        self.state.lock().clone()
    }

    #[must_use]
    pub fn is_renewing(&self) -> bool {
        self.renewal.lock().is_some()
    }

    /// Negotiate a playable session for `id`.
    ///
    /// Any renewal task from a previous negotiation is cancelled first. On
    /// failure the negotiator is left idle.
    pub async fn acquire_session(&self, id: &ContentId) -> Result<PlayableSession, ProviderClientError> {
        let previous = {
            let mut slot = self.renewal.lock();
            *self.state.lock() = NegotiatorState::Idle;
            slot.take()
        };
        if let Some(task) = previous {
            task.shutdown().await;
        }

        let service_user_id = ServiceUserId::generate();
        let mut info = self.api.fetch_video_info(id, &service_user_id).await?;
        if info.content_id.is_empty() {
            info.content_id = id.as_str().to_string();
        }
        if info.service_user_id.is_empty() {
            info.service_user_id = service_user_id.as_str().to_string();
        }

        match info.negotiation_path() {
            NegotiationPath::Legacy { play_key } => {
                tracing::info!(content_id = %id, "Negotiating legacy watch session");
                let fields = self.api.fetch_thumb_watch_info(id, &play_key).await?;
                let url = fields
                    .get("url")
                    .filter(|u| !u.is_empty())
                    .cloned()
                    .ok_or_else(|| ProviderClientError::Parse("legacy watch info has no url".to_string()))?;
                let field = |name: &str| fields.get(name).cloned().unwrap_or_default();

                *self.state.lock() = NegotiatorState::LegacyReady;
                Ok(PlayableSession {
                    kind: SessionKind::Legacy,
                    url,
                    thread: CommentThreadLocator {
                        server_url: field("ms"),
                        thread_id: field("thread_id"),
                    },
                })
            }
            NegotiationPath::Modern { signature } => {
                tracing::info!(content_id = %id, "Negotiating DMC session");
                let action_track_id = ServiceUserId::generate();
                let guest = self
                    .api
                    .fetch_guest_watch_info(id, &info, &signature, &action_track_id)
                    .await?;

                let request = build_session_request(&info, &guest, self.config.heartbeat_lifetime_ms);
                let session = self
                    .api
                    .create_session(&guest, &request)
                    .await?
                    .ok_or_else(|| ProviderClientError::Forbidden(format!("session for {id} was refused")))?;

                tracing::info!(content_id = %id, session_id = %session.id, "Media session opened");
                let result = PlayableSession {
                    kind: SessionKind::Modern,
                    url: session.content_uri.clone(),
                    thread: guest.thread_locator(),
                };
                self.arm_renewal(guest, session);
                Ok(result)
            }
            NegotiationPath::Unrecognized => {
                tracing::info!(content_id = %id, "No negotiation path offered");
                Err(ProviderClientError::NotFound(format!("no playable session for {id}")))
            }
        }
    }

    /// Cancel the active renewal task, if any.
    pub fn stop(&self) {
        let mut slot = self.renewal.lock();
        if let Some(task) = slot.take() {
            task.cancel();
        }
        *self.state.lock() = NegotiatorState::Idle;
    }

    fn arm_renewal(&self, guest: GuestWatchInfo, session: MediaSession) {
        let mut slot = self.renewal.lock();
        // A concurrent acquire may have armed one in between.
        if let Some(previous) = slot.take() {
            previous.cancel();
        }

        let session_id = session.id.clone();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(renewal_loop(
            self.api.clone(),
            guest,
            session,
            self.config.renewal_interval,
            cancel.clone(),
            self.events.clone(),
        ));

        *self.state.lock() = NegotiatorState::Renewing {
            session_id: session_id.clone(),
        };
        *slot = Some(RenewalTask {
            session_id,
            cancel,
            handle,
        });
    }
}

impl Drop for SessionNegotiator {
    fn drop(&mut self) {
        if let Some(task) = self.renewal.get_mut().take() {
            task.cancel();
        }
    }
}

async fn renewal_loop(
    api: Arc<dyn NicovideoApi>,
    guest: GuestWatchInfo,
    mut session: MediaSession,
    period: Duration,
    cancel: CancellationToken,
    events: broadcast::Sender<RenewalEvent>,
) {
    let mut timer = interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            _ = timer.tick() => {}
        }

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            result = api.update_session(&guest, &session) => result,
        };

        let session_id = session.id.clone();
        let outcome = result.and_then(|renewed| {
            renewed.ok_or_else(|| ProviderClientError::Forbidden("renewal returned no session data".to_string()))
        });
        let event = match outcome {
            Ok(renewed) => {
                session.descriptor = renewed.descriptor;
                tracing::debug!(session_id = %session_id, "Media session renewed");
                RenewalEvent::Renewed { session_id }
            }
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "Media session renewal failed");
                RenewalEvent::Failed {
                    session_id,
                    error: e.to_string(),
                }
            }
        };
        // No subscribers is fine.
        let _ = events.send(event);
    }
}
