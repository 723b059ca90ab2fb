// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Device store backed by redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! - `users`: id → serialized user row
//! - `users_by_uid`: external uid → id (unique)
//! - `devices`: id → serialized device row
//! - `devices_by_token`: device token → id (unique)
//! - `user_devices`: (user_id, device_id) → ()
//! - `streams`: id → serialized stream row
//! - `streams_by_uid`: encoder stream uid → id (unique)
//! - `device_streams`: (device_id, stream_id) → ()
//! - `sequences`: table name → last issued id
//! - `meta`: key → value (schema version, KDF salt, password check)
//!
//! Private keys are sealed with [`KeyCipher`] before they reach a row.

use std::path::Path;

use base64ct::{Base64, Encoding};
use chrono::{DateTime, Utc};
use redb::{
    Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition,
    WriteTransaction,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::{
    Device, DeviceStore, KeyCipher, NewDevice, RemovedDevice, RowCounts, StoreError,
    StoreResult, StoreTransaction, Stream, User,
};
use crate::crypto::KeyPair;
use crate::models::{Disposition, Location};

// =============================================================================
// Table Definitions
// =============================================================================

const USERS: TableDefinition<u64, &[u8]> = TableDefinition::new("users");
const USERS_BY_UID: TableDefinition<&str, u64> = TableDefinition::new("users_by_uid");

const DEVICES: TableDefinition<u64, &[u8]> = TableDefinition::new("devices");
const DEVICES_BY_TOKEN: TableDefinition<&str, u64> = TableDefinition::new("devices_by_token");
const USER_DEVICES: TableDefinition<(u64, u64), ()> = TableDefinition::new("user_devices");

const STREAMS: TableDefinition<u64, &[u8]> = TableDefinition::new("streams");
const STREAMS_BY_UID: TableDefinition<&str, u64> = TableDefinition::new("streams_by_uid");
const DEVICE_STREAMS: TableDefinition<(u64, u64), ()> = TableDefinition::new("device_streams");

const SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new("sequences");
const META: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");

const SCHEMA_VERSION: u64 = 1;
const SCHEMA_VERSION_KEY: &str = "schema_version";
const KDF_SALT_KEY: &str = "kdf_salt";
const PASSWORD_CHECK_KEY: &str = "password_check";
const PASSWORD_CHECK_PLAINTEXT: &[u8] = b"devicereg";

const USER_KEY_COLUMN: &str = "users.private_key";
const DEVICE_KEY_COLUMN: &str = "devices.private_key";

// =============================================================================
// Rows
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct UserRow {
    id: u64,
    uid: String,
    #[serde(with = "sealed")]
    private_key: Vec<u8>,
    public_key: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct DeviceRow {
    id: u64,
    token: String,
    user_id: u64,
    #[serde(with = "sealed")]
    private_key: Vec<u8>,
    public_key: String,
    longitude: f64,
    latitude: f64,
    disposition: Disposition,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StreamRow {
    id: u64,
    uid: String,
    device_id: u64,
    created_at: DateTime<Utc>,
}

impl From<StreamRow> for Stream {
    fn from(row: StreamRow) -> Self {
        Stream {
            id: row.id,
            uid: row.uid,
            device_id: row.device_id,
        }
    }
}

/// Sealed key columns are kept as base64 inside the JSON rows.
mod sealed {
    use super::{Base64, Encoding};
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&Base64::encode_string(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        Base64::decode_vec(&encoded).map_err(D::Error::custom)
    }
}

// =============================================================================
// Row Helpers
// =============================================================================

fn get_row<T: DeserializeOwned>(
    txn: &WriteTransaction,
    table: TableDefinition<'_, u64, &'static [u8]>,
    id: u64,
) -> StoreResult<Option<T>> {
    let table = txn.open_table(table)?;
    let row = match table.get(id)? {
        Some(value) => Some(serde_json::from_slice(value.value())?),
        None => None,
    };
    Ok(row)
}

fn put_row<T: Serialize>(
    txn: &WriteTransaction,
    table: TableDefinition<'_, u64, &'static [u8]>,
    id: u64,
    row: &T,
) -> StoreResult<()> {
    let json = serde_json::to_vec(row)?;
    let mut table = txn.open_table(table)?;
    table.insert(id, json.as_slice())?;
    Ok(())
}

/// Issue the next id for `sequence`, starting at 1.
fn next_id(txn: &WriteTransaction, sequence: &str) -> StoreResult<u64> {
    let mut table = txn.open_table(SEQUENCES)?;
    let current = table.get(sequence)?.map(|v| v.value()).unwrap_or(0);
    let next = current + 1;
    table.insert(sequence, next)?;
    Ok(next)
}

fn lookup_id(
    txn: &WriteTransaction,
    index: TableDefinition<'_, &'static str, u64>,
    key: &str,
) -> StoreResult<Option<u64>> {
    let table = txn.open_table(index)?;
    let id = table.get(key)?.map(|v| v.value());
    Ok(id)
}

// =============================================================================
// RedbDeviceStore
// =============================================================================

/// Embedded ACID device store.
pub struct RedbDeviceStore {
    db: Database,
    cipher: KeyCipher,
}

impl RedbDeviceStore {
    /// Open (or create) the store at `path`, sealing keys under `password`.
    ///
    /// A fresh database gets a random KDF salt and a sealed check value.
    /// Reopening an existing database with a different password fails with
    /// [`StoreError::PasswordMismatch`].
    pub fn open(path: &Path, password: &str) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = Database::create(path)?;

        let write_txn = db.begin_write()?;
        let salt = {
            // Pre-create all tables so later read transactions don't fail
            let _ = write_txn.open_table(USERS)?;
            let _ = write_txn.open_table(USERS_BY_UID)?;
            let _ = write_txn.open_table(DEVICES)?;
            let _ = write_txn.open_table(DEVICES_BY_TOKEN)?;
            let _ = write_txn.open_table(USER_DEVICES)?;
            let _ = write_txn.open_table(STREAMS)?;
            let _ = write_txn.open_table(STREAMS_BY_UID)?;
            let _ = write_txn.open_table(DEVICE_STREAMS)?;
            let _ = write_txn.open_table(SEQUENCES)?;

            let mut meta = write_txn.open_table(META)?;
            meta.insert(SCHEMA_VERSION_KEY, SCHEMA_VERSION.to_be_bytes().as_slice())?;

            let existing = meta.get(KDF_SALT_KEY)?.map(|v| v.value().to_vec());
            match existing {
                Some(salt) => salt,
                None => {
                    let salt = KeyCipher::generate_salt()?.to_vec();
                    meta.insert(KDF_SALT_KEY, salt.as_slice())?;
                    salt
                }
            }
        };

        let cipher = KeyCipher::derive(password.as_bytes(), &salt)?;

        {
            let mut meta = write_txn.open_table(META)?;
            let check = meta.get(PASSWORD_CHECK_KEY)?.map(|v| v.value().to_vec());
            match check {
                Some(sealed) => {
                    cipher
                        .open(PASSWORD_CHECK_KEY, &sealed)
                        .map_err(|_| StoreError::PasswordMismatch)?;
                }
                None => {
                    let sealed = cipher.seal(PASSWORD_CHECK_KEY, PASSWORD_CHECK_PLAINTEXT)?;
                    meta.insert(PASSWORD_CHECK_KEY, sealed.as_slice())?;
                }
            }
        }
        write_txn.commit()?;

        tracing::info!(path = %path.display(), "Device store opened");

        Ok(Self { db, cipher })
    }
}

impl DeviceStore for RedbDeviceStore {
    type Tx<'a> = RedbTransaction<'a>;

    fn begin(&self) -> StoreResult<RedbTransaction<'_>> {
        Ok(RedbTransaction {
            txn: self.db.begin_write()?,
            cipher: &self.cipher,
        })
    }

    fn ping(&self) -> StoreResult<()> {
        let read_txn = self.db.begin_read()?;
        let meta = read_txn.open_table(META)?;
        meta.get(SCHEMA_VERSION_KEY)?
            .ok_or(StoreError::NotFound("schema version"))?;
        Ok(())
    }

    fn counts(&self) -> StoreResult<RowCounts> {
        let read_txn = self.db.begin_read()?;
        Ok(RowCounts {
            users: read_txn.open_table(USERS)?.len()?,
            devices: read_txn.open_table(DEVICES)?.len()?,
            streams: read_txn.open_table(STREAMS)?.len()?,
        })
    }
}

// =============================================================================
// RedbTransaction
// =============================================================================

/// A redb write transaction. Dropping it without [`commit`] aborts it.
///
/// redb admits one write transaction at a time, so [`DeviceStore::begin`]
/// blocks until any other open transaction finishes.
///
/// [`commit`]: StoreTransaction::commit
pub struct RedbTransaction<'a> {
    txn: WriteTransaction,
    cipher: &'a KeyCipher,
}

impl RedbTransaction<'_> {
    fn device_stream_ids(&self, device_id: u64) -> StoreResult<Vec<u64>> {
        let index = self.txn.open_table(DEVICE_STREAMS)?;
        let mut ids = Vec::new();
        for entry in index.range((device_id, 0)..=(device_id, u64::MAX))? {
            let (key, _) = entry?;
            ids.push(key.value().1);
        }
        Ok(ids)
    }
}

impl StoreTransaction for RedbTransaction<'_> {
    fn upsert_user(&mut self, uid: &str, keys: &KeyPair) -> StoreResult<User> {
        let now = Utc::now();

        if let Some(id) = lookup_id(&self.txn, USERS_BY_UID, uid)? {
            let mut row: UserRow =
                get_row(&self.txn, USERS, id)?.ok_or(StoreError::NotFound("user"))?;
            row.updated_at = now;
            put_row(&self.txn, USERS, id, &row)?;

            let private_key = self.cipher.open_string(USER_KEY_COLUMN, &row.private_key)?;
            return Ok(User {
                id,
                uid: row.uid,
                keys: KeyPair {
                    private_key,
                    public_key: row.public_key,
                },
            });
        }

        let id = next_id(&self.txn, "users")?;
        let row = UserRow {
            id,
            uid: uid.to_string(),
            private_key: self.cipher.seal_str(USER_KEY_COLUMN, &keys.private_key)?,
            public_key: keys.public_key.clone(),
            created_at: now,
            updated_at: now,
        };
        put_row(&self.txn, USERS, id, &row)?;
        {
            let mut by_uid = self.txn.open_table(USERS_BY_UID)?;
            by_uid.insert(uid, id)?;
        }

        Ok(User {
            id,
            uid: row.uid,
            keys: keys.clone(),
        })
    }

    fn insert_device(&mut self, device: NewDevice<'_>) -> StoreResult<Device> {
        if lookup_id(&self.txn, DEVICES_BY_TOKEN, device.token)?.is_some() {
            return Err(StoreError::UniqueViolation("devices.token"));
        }
        if get_row::<UserRow>(&self.txn, USERS, device.user_id)?.is_none() {
            return Err(StoreError::ForeignKeyViolation("devices.user_id"));
        }

        let id = next_id(&self.txn, "devices")?;
        let row = DeviceRow {
            id,
            token: device.token.to_string(),
            user_id: device.user_id,
            private_key: self
                .cipher
                .seal_str(DEVICE_KEY_COLUMN, &device.keys.private_key)?,
            public_key: device.keys.public_key.clone(),
            longitude: device.location.longitude,
            latitude: device.location.latitude,
            disposition: device.disposition,
            created_at: Utc::now(),
        };
        put_row(&self.txn, DEVICES, id, &row)?;
        {
            let mut by_token = self.txn.open_table(DEVICES_BY_TOKEN)?;
            by_token.insert(device.token, id)?;
            let mut user_devices = self.txn.open_table(USER_DEVICES)?;
            user_devices.insert((device.user_id, id), ())?;
        }

        Ok(Device {
            id,
            token: row.token,
            user_id: row.user_id,
            keys: device.keys.clone(),
            location: device.location,
            disposition: device.disposition,
        })
    }

    fn insert_stream(&mut self, device_id: u64, stream_uid: &str) -> StoreResult<Stream> {
        if lookup_id(&self.txn, STREAMS_BY_UID, stream_uid)?.is_some() {
            return Err(StoreError::UniqueViolation("streams.uid"));
        }
        if get_row::<DeviceRow>(&self.txn, DEVICES, device_id)?.is_none() {
            return Err(StoreError::ForeignKeyViolation("streams.device_id"));
        }

        let id = next_id(&self.txn, "streams")?;
        let row = StreamRow {
            id,
            uid: stream_uid.to_string(),
            device_id,
            created_at: Utc::now(),
        };
        put_row(&self.txn, STREAMS, id, &row)?;
        {
            let mut by_uid = self.txn.open_table(STREAMS_BY_UID)?;
            by_uid.insert(stream_uid, id)?;
            let mut device_streams = self.txn.open_table(DEVICE_STREAMS)?;
            device_streams.insert((device_id, id), ())?;
        }

        Ok(row.into())
    }

    fn streams_for_device(&mut self, device_id: u64) -> StoreResult<Vec<Stream>> {
        let ids = self.device_stream_ids(device_id)?;
        let mut streams = Vec::with_capacity(ids.len());
        for id in ids {
            let row: StreamRow =
                get_row(&self.txn, STREAMS, id)?.ok_or(StoreError::NotFound("stream"))?;
            streams.push(row.into());
        }
        Ok(streams)
    }

    fn delete_device_by_token_and_owner_key(
        &mut self,
        token: &str,
        public_key: &str,
    ) -> StoreResult<RemovedDevice> {
        let device_id =
            lookup_id(&self.txn, DEVICES_BY_TOKEN, token)?.ok_or(StoreError::NotFound("device"))?;
        let device: DeviceRow =
            get_row(&self.txn, DEVICES, device_id)?.ok_or(StoreError::NotFound("device"))?;
        let owner: UserRow =
            get_row(&self.txn, USERS, device.user_id)?.ok_or(StoreError::NotFound("device"))?;
        if owner.public_key != public_key {
            return Err(StoreError::NotFound("device"));
        }

        let streams = self.streams_for_device(device_id)?;
        {
            let mut rows = self.txn.open_table(STREAMS)?;
            let mut by_uid = self.txn.open_table(STREAMS_BY_UID)?;
            let mut device_streams = self.txn.open_table(DEVICE_STREAMS)?;
            for stream in &streams {
                rows.remove(stream.id)?;
                by_uid.remove(stream.uid.as_str())?;
                device_streams.remove((device_id, stream.id))?;
            }
        }
        {
            let mut rows = self.txn.open_table(DEVICES)?;
            rows.remove(device_id)?;
            let mut by_token = self.txn.open_table(DEVICES_BY_TOKEN)?;
            by_token.remove(token)?;
            let mut user_devices = self.txn.open_table(USER_DEVICES)?;
            user_devices.remove((device.user_id, device_id))?;
        }

        Ok(RemovedDevice {
            device_id,
            user_id: device.user_id,
            streams,
        })
    }

    fn count_devices_for_user(&mut self, user_id: u64) -> StoreResult<u64> {
        let index = self.txn.open_table(USER_DEVICES)?;
        let mut count = 0;
        for entry in index.range((user_id, 0)..=(user_id, u64::MAX))? {
            entry?;
            count += 1;
        }
        Ok(count)
    }

    fn delete_user(&mut self, user_id: u64) -> StoreResult<()> {
        if self.count_devices_for_user(user_id)? > 0 {
            return Err(StoreError::ForeignKeyViolation("devices.user_id"));
        }
        let row: UserRow = get_row(&self.txn, USERS, user_id)?.ok_or(StoreError::NotFound("user"))?;

        let mut users = self.txn.open_table(USERS)?;
        users.remove(user_id)?;
        let mut by_uid = self.txn.open_table(USERS_BY_UID)?;
        by_uid.remove(row.uid.as_str())?;
        Ok(())
    }

    fn commit(self) -> StoreResult<()> {
        self.txn.commit()?;
        Ok(())
    }

    fn rollback(self) -> StoreResult<()> {
        self.txn.abort()?;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
