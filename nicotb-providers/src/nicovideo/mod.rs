//! niconico Provider Client
//!
//! HTTP client for the niconico embed/watch APIs plus the session negotiator
//! that keeps a modern (DMC) media session alive.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use nicotb_providers::nicovideo::{
//!     ContentId, Endpoints, NegotiatorConfig, NicovideoClient, SessionNegotiator,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = NicovideoClient::new(Endpoints::nicovideo()?)?;
//! let negotiator = SessionNegotiator::new(Arc::new(client), NegotiatorConfig::default());
//! let session = negotiator.acquire_session(&ContentId::parse("sm9")?).await?;
//! println!("{}", session.url);
//! negotiator.stop();
//! # Ok(())
//! # }
//! ```

pub mod api;
mod client;
pub mod form;
pub mod negotiator;
pub mod types;

pub use api::NicovideoApi;
pub use client::{Endpoints, NicovideoClient};
pub use form::parse_form_body;
pub use negotiator::{NegotiatorConfig, NegotiatorState, RenewalEvent, SessionNegotiator};
pub use types::*;
