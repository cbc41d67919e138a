//! Core types, configuration, and errors for busrelay.
//!
//! This crate provides the building blocks shared by the signing engine, the
//! credential lifecycle manager and the dispatch orchestrator: the immutable
//! [`RelayConfig`] loaded once at startup, the per-destination
//! [`DestinationConfig`], and the [`Credentials`] value issued by the
//! credential exchange.

mod config;
mod error;
mod types;

pub use config::{
    CredentialSettings, DeliverySettings, DestinationConfig, EnvelopeSettings, ExchangeProfile,
    LogFormat, RelayConfig, ValidationSettings,
};
pub use error::{RelayError, RelayResult};
pub use types::{Credentials, DestinationId};
