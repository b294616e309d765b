// nicotb Provider Clients
//
// This crate contains the HTTP client for the niconico video platform and the
// session negotiator that turns a content id into a playable stream URL.
//
// Architecture:
// - nicovideo::client: pure HTTP client (one method per remote endpoint)
// - nicovideo::api: the NicovideoApi seam the negotiator talks through
// - nicovideo::negotiator: legacy/modern session negotiation + renewal task

// Shared error types
pub mod error;

// HTTP clients
pub mod nicovideo;

// Re-export client types for convenience
pub use error::ProviderClientError;
pub use nicovideo::{NicovideoApi, NicovideoClient, SessionNegotiator};
