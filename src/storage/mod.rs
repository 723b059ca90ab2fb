// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Device Store
//!
//! Persistent state of the registration service: users, their devices, and
//! the encoder streams provisioned for each device.
//!
//! ## Model
//!
//! ```text
//! users   1 ── N devices      (devices.user_id → users.id)
//! devices 1 ── N streams      (streams.device_id → devices.id, cascade)
//! ```
//!
//! Unique constraints: `users.uid`, `devices.token`, `streams.uid`.
//!
//! ## Transactions
//!
//! All writes happen through a [`StoreTransaction`] obtained from
//! [`DeviceStore::begin`]. Calling [`StoreTransaction::commit`] is the only
//! way to make changes durable. Dropping a transaction without committing
//! discards every write made through it, so an early return with `?`
//! always rolls back.

pub mod cipher;
pub mod redb_store;

pub use cipher::{CipherError, KeyCipher};
pub use redb_store::RedbDeviceStore;

use crate::crypto::KeyPair;
use crate::models::{Disposition, Location};

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("key column error: {0}")]
    Cipher(#[from] CipherError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("duplicate key value violates unique constraint {0:?}")]
    UniqueViolation(&'static str),

    #[error("foreign key constraint {0:?} violated")]
    ForeignKeyViolation(&'static str),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("encryption password does not match the one this database was created with")]
    PasswordMismatch,
}

pub type StoreResult<T> = Result<T, StoreError>;

// =============================================================================
// Records
// =============================================================================

/// A user as returned from the store, with its private key decrypted.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: u64,
    pub uid: String,
    pub keys: KeyPair,
}

/// A claimed device, with its private key decrypted.
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub id: u64,
    pub token: String,
    pub user_id: u64,
    pub keys: KeyPair,
    pub location: Location,
    pub disposition: Disposition,
}

/// A provisioned encoder stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stream {
    pub id: u64,
    pub uid: String,
    pub device_id: u64,
}

/// Values needed to insert a device.
#[derive(Debug, Clone, Copy)]
pub struct NewDevice<'a> {
    pub token: &'a str,
    pub user_id: u64,
    pub keys: &'a KeyPair,
    pub location: Location,
    pub disposition: Disposition,
}

/// Outcome of deleting a device: its owner and the streams removed with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovedDevice {
    pub device_id: u64,
    pub user_id: u64,
    pub streams: Vec<Stream>,
}

/// Row totals, used by health checks and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RowCounts {
    pub users: u64,
    pub devices: u64,
    pub streams: u64,
}

// =============================================================================
// Capability Traits
// =============================================================================

/// Transactional store of users, devices, and streams.
pub trait DeviceStore: Send + Sync {
    type Tx<'a>: StoreTransaction
    where
        Self: 'a;

    /// Open a write transaction.
    fn begin(&self) -> StoreResult<Self::Tx<'_>>;

    /// Cheap round-trip proving the store is usable.
    fn ping(&self) -> StoreResult<()>;

    fn counts(&self) -> StoreResult<RowCounts>;
}

/// Record-level operations within one transaction.
///
/// Any error leaves the transaction unusable for further writes; callers
/// are expected to drop it (rolling back) and report the failure.
pub trait StoreTransaction {
    /// Insert a user keyed by `uid`, or return the existing one.
    ///
    /// When the user already exists its stored key pair is kept and
    /// `keys` is ignored.
    fn upsert_user(&mut self, uid: &str, keys: &KeyPair) -> StoreResult<User>;

    /// Insert a device. Fails with a unique violation on a known token.
    fn insert_device(&mut self, device: NewDevice<'_>) -> StoreResult<Device>;

    /// Record a remote stream against a device.
    fn insert_stream(&mut self, device_id: u64, stream_uid: &str) -> StoreResult<Stream>;

    fn streams_for_device(&mut self, device_id: u64) -> StoreResult<Vec<Stream>>;

    /// Delete the device with `token` whose owner has `public_key`.
    ///
    /// An unknown token and a key belonging to someone else are
    /// indistinguishable: both report the device as not found. Streams of
    /// the device are removed with it and returned.
    fn delete_device_by_token_and_owner_key(
        &mut self,
        token: &str,
        public_key: &str,
    ) -> StoreResult<RemovedDevice>;

    fn count_devices_for_user(&mut self, user_id: u64) -> StoreResult<u64>;

    /// Delete a user that no longer owns any device.
    fn delete_user(&mut self, user_id: u64) -> StoreResult<()>;

    fn commit(self) -> StoreResult<()>;

    fn rollback(self) -> StoreResult<()>;
}
