// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Device Registration - IoT device claim/revoke service
//!
//! Registers ownership claims on physical devices on behalf of users,
//! generates key material for both, and provisions an encrypted stream on
//! the encoder for every claimed device.
//!
//! ## Modules
//!
//! - `api` - HTTP API handlers (Axum)
//! - `registrar` - Claim and revoke workflows
//! - `storage` - Transactional device store (redb)
//! - `provisioner` - Encoder stream client
//! - `crypto` - Key pair generation

pub mod api;
pub mod config;
pub mod crypto;
pub mod error;
pub mod models;
pub mod provisioner;
pub mod registrar;
pub mod server;
pub mod state;
pub mod storage;
pub mod telemetry;
