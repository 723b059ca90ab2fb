// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # API Data Models
//!
//! Request and response messages of the `DeviceRegistration` service. Field
//! names follow the snake_case JSON mapping of the protobuf messages, and
//! every field defaults to its zero value when omitted so that validation,
//! not deserialization, reports missing arguments.

use std::fmt;

use serde::de::{self, Deserializer, Unexpected, Visitor};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

// =============================================================================
// Shared Types
// =============================================================================

/// Where a device is placed.
///
/// Serialized as the enum name. Decoding also accepts the enum numbers
/// (`0` for `INDOOR`, `1` for `OUTDOOR`), as protobuf JSON parsers do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Disposition {
    #[default]
    Indoor,
    Outdoor,
}

impl Disposition {
    /// Lowercase form stored alongside the device.
    pub fn as_str(self) -> &'static str {
        match self {
            Disposition::Indoor => "indoor",
            Disposition::Outdoor => "outdoor",
        }
    }

    /// Enum name used on the wire.
    pub fn wire_name(self) -> &'static str {
        match self {
            Disposition::Indoor => "INDOOR",
            Disposition::Outdoor => "OUTDOOR",
        }
    }
}

impl<'de> Deserialize<'de> for Disposition {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(DispositionVisitor)
    }
}

struct DispositionVisitor;

const DISPOSITION_NAMES: &[&str] = &["INDOOR", "OUTDOOR"];

impl Visitor<'_> for DispositionVisitor {
    type Value = Disposition;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("\"INDOOR\", \"OUTDOOR\", 0 or 1")
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<Disposition, E> {
        match value {
            "INDOOR" => Ok(Disposition::Indoor),
            "OUTDOOR" => Ok(Disposition::Outdoor),
            other => Err(E::unknown_variant(other, DISPOSITION_NAMES)),
        }
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<Disposition, E> {
        match value {
            0 => Ok(Disposition::Indoor),
            1 => Ok(Disposition::Outdoor),
            other => Err(E::invalid_value(Unexpected::Unsigned(other), &self)),
        }
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<Disposition, E> {
        match u64::try_from(value) {
            Ok(value) => self.visit_u64(value),
            Err(_) => Err(E::invalid_value(Unexpected::Signed(value), &self)),
        }
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Geographic position of a device in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct Location {
    pub longitude: f64,
    pub latitude: f64,
}

// =============================================================================
// ClaimDevice
// =============================================================================

/// Request to claim a device on behalf of a user.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct ClaimDeviceRequest {
    /// Unique token identifying the physical device.
    pub device_token: String,
    /// Stable external identifier of the claiming user.
    pub user_uid: String,
    /// Where the device is installed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    pub disposition: Disposition,
    /// MQTT broker the device publishes to.
    pub broker: String,
}

/// Key material returned after a successful claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ClaimDeviceResponse {
    pub user_private_key: String,
    pub user_public_key: String,
    pub device_public_key: String,
}

// =============================================================================
// RevokeDevice
// =============================================================================

/// Request to revoke a previously claimed device.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct RevokeDeviceRequest {
    pub device_token: String,
    /// Public key of the owning user, proving ownership.
    pub user_public_key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RevokeDeviceResponse {}
