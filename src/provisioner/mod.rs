// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Stream provisioning on the encoder.
//!
//! Every claimed device gets an encrypted stream on the encoder, which
//! subscribes to the device topic on the broker and encrypts readings for
//! the owning user. The registrar talks to the encoder through the
//! [`StreamProvisioner`] trait; [`EncoderClient`] is the HTTP implementation.
//!
//! Calls are synchronous and single-attempt. Any error is terminal for the
//! workflow that issued it.

pub mod encoder;

#[cfg(test)]
pub mod testing;

pub use encoder::EncoderClient;

use serde::Serialize;

use crate::models::{Disposition, Location};

/// Topic a device publishes its readings on.
pub fn device_topic(device_token: &str) -> String {
    format!("device/sck/{device_token}/readings")
}

#[derive(Debug, thiserror::Error)]
pub enum ProvisionerError {
    #[error("encoder request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid encoder endpoint: {0}")]
    Endpoint(#[from] url::ParseError),

    #[error("encoder returned {code}: {msg}")]
    Rejected { code: String, msg: String },

    #[error("encoder response was invalid: {0}")]
    InvalidResponse(String),
}

/// Parameters of a new stream.
///
/// Serializes to the encoder's `CreateStreamRequest` JSON message.
#[derive(Debug, Clone, Serialize)]
pub struct CreateStreamRequest<'a> {
    pub broker_address: &'a str,
    pub device_topic: String,
    pub device_private_key: &'a str,
    pub recipient_public_key: &'a str,
    pub user_uid: &'a str,
    pub location: Location,
    pub disposition: Disposition,
}

/// Creates and deletes encrypted streams on a remote encoder.
pub trait StreamProvisioner: Send + Sync {
    /// Create a stream, returning the encoder-assigned stream uid.
    fn create_stream(&self, request: &CreateStreamRequest<'_>) -> Result<String, ProvisionerError>;

    fn delete_stream(&self, stream_uid: &str) -> Result<(), ProvisionerError>;
}
