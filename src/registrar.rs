// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Device Registrar
//!
//! Claim and revoke workflows. Each workflow keeps the local store and the
//! encoder in step as far as two independent systems allow:
//!
//! - **Claim** commits the user and device in a short transaction, creates
//!   the remote stream with no transaction open, then records the stream in
//!   a second transaction. If the remote call or the stream insert fails,
//!   the device (and a user left with no devices) is deleted again, so a
//!   failed claim leaves no rows behind. A local failure after the remote
//!   call succeeded leaves an orphaned remote stream, which is logged.
//! - **Revoke** deletes the device (and its owner, when it was the last
//!   device) and commits, then deletes the remote streams one by one. The
//!   first remote failure stops the loop and is reported even though the
//!   local rows are already gone.
//!
//! Both workflows block the calling thread on store and encoder I/O. No
//! write transaction is held across an encoder call, so a slow encoder
//! never stalls other requests on the store.

use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use crate::crypto::{KeyGenError, KeyGenerator, KeyPair};
use crate::models::{
    ClaimDeviceRequest, ClaimDeviceResponse, Location, RevokeDeviceRequest, RevokeDeviceResponse,
};
use crate::provisioner::{device_topic, CreateStreamRequest, ProvisionerError, StreamProvisioner};
use crate::storage::{
    Device, DeviceStore, NewDevice, RemovedDevice, StoreError, StoreTransaction, User,
};
use crate::telemetry::{CallStatus, MetricsSnapshot, ProvisionerMetrics, RpcMethod};

// =============================================================================
// Errors
// =============================================================================

type BoxError = Box<dyn StdError + Send + Sync>;

/// Failure of a claim or revoke call.
#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    /// The request is unusable; nothing was written.
    #[error("{message}")]
    InvalidArgument {
        argument: &'static str,
        message: String,
    },

    /// Anything else: store, encoder, key generation, not found, conflicts.
    #[error("{0}")]
    Internal(BoxError),
}

impl RegistrationError {
    pub fn required(argument: &'static str) -> Self {
        Self::InvalidArgument {
            argument,
            message: format!("{argument} is required"),
        }
    }

    pub fn invalid(argument: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            argument,
            message: message.into(),
        }
    }

    pub fn internal(err: impl Into<BoxError>) -> Self {
        Self::Internal(err.into())
    }

    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument { .. })
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{context}: {source}")]
struct Contextual {
    context: &'static str,
    source: BoxError,
}

/// Map an error into `Internal`, prefixed with what was being attempted.
fn context<E>(context: &'static str) -> impl FnOnce(E) -> RegistrationError
where
    E: StdError + Send + Sync + 'static,
{
    move |source| {
        RegistrationError::Internal(Box::new(Contextual {
            context,
            source: Box::new(source),
        }))
    }
}

// =============================================================================
// Validation
// =============================================================================

/// Check a claim request, returning its location on success.
///
/// Zero coordinates count as missing, matching the zero-value semantics of
/// the wire format.
pub fn validate_claim(request: &ClaimDeviceRequest) -> Result<Location, RegistrationError> {
    if request.device_token.is_empty() {
        return Err(RegistrationError::required("device_token"));
    }
    if request.broker.is_empty() {
        return Err(RegistrationError::required("broker"));
    }
    if request.user_uid.is_empty() {
        return Err(RegistrationError::required("user_uid"));
    }
    let location = request
        .location
        .ok_or_else(|| RegistrationError::required("location"))?;
    if location.longitude == 0.0 {
        return Err(RegistrationError::required("longitude"));
    }
    if location.latitude == 0.0 {
        return Err(RegistrationError::required("latitude"));
    }
    if !location.longitude.is_finite() || !(-180.0..=180.0).contains(&location.longitude) {
        return Err(RegistrationError::invalid(
            "longitude",
            "longitude must be between -180 and 180 degrees",
        ));
    }
    if !location.latitude.is_finite() || !(-90.0..=90.0).contains(&location.latitude) {
        return Err(RegistrationError::invalid(
            "latitude",
            "latitude must be between -90 and 90 degrees",
        ));
    }
    Ok(location)
}

pub fn validate_revoke(request: &RevokeDeviceRequest) -> Result<(), RegistrationError> {
    if request.device_token.is_empty() {
        return Err(RegistrationError::required("device_token"));
    }
    if request.user_public_key.is_empty() {
        return Err(RegistrationError::required("user_public_key"));
    }
    Ok(())
}

// =============================================================================
// Service Seam
// =============================================================================

/// What the HTTP layer needs from the registrar.
pub trait RegistrationService: Send + Sync + 'static {
    fn claim_device(
        &self,
        request: &ClaimDeviceRequest,
    ) -> Result<ClaimDeviceResponse, RegistrationError>;

    fn revoke_device(
        &self,
        request: &RevokeDeviceRequest,
    ) -> Result<RevokeDeviceResponse, RegistrationError>;

    /// Whether the backing store answers.
    fn check_ready(&self) -> Result<(), RegistrationError>;

    fn metrics(&self) -> MetricsSnapshot;
}

// =============================================================================
// Registrar
// =============================================================================

pub struct DeviceRegistrar<S, P, K> {
    store: S,
    provisioner: P,
    keys: K,
    metrics: Arc<ProvisionerMetrics>,
    verbose: bool,
}

impl<S, P, K> DeviceRegistrar<S, P, K>
where
    S: DeviceStore,
    P: StreamProvisioner,
    K: KeyGenerator,
{
    pub fn new(store: S, provisioner: P, keys: K, metrics: Arc<ProvisionerMetrics>) -> Self {
        Self {
            store,
            provisioner,
            keys,
            metrics,
            verbose: false,
        }
    }

    /// Log every claim and revoke at info level.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn provisioner(&self) -> &P {
        &self.provisioner
    }

    fn timed<T>(
        &self,
        method: RpcMethod,
        call: impl FnOnce() -> Result<T, ProvisionerError>,
    ) -> Result<T, ProvisionerError> {
        let start = Instant::now();
        let result = call();
        self.metrics
            .observe(method, CallStatus::of(&result), start.elapsed());
        result
    }

    /// Claim a device for a user and provision its stream.
    pub fn claim_device(
        &self,
        request: &ClaimDeviceRequest,
    ) -> Result<ClaimDeviceResponse, RegistrationError> {
        let location = validate_claim(request)?;

        if self.verbose {
            info!(
                method = "ClaimDevice",
                device_token = %request.device_token,
                broker = %request.broker,
                disposition = request.disposition.wire_name(),
                "claiming device"
            );
        }

        // The user pair is only stored when the user is new.
        let user_keys = self
            .keys
            .generate()
            .map_err(context::<KeyGenError>("failed to generate user key pair"))?;
        let device_keys = self
            .keys
            .generate()
            .map_err(context::<KeyGenError>("failed to generate device key pair"))?;

        let (user, device) = self.register(request, location, &user_keys, &device_keys)?;

        let stream_request = CreateStreamRequest {
            broker_address: &request.broker,
            device_topic: device_topic(&request.device_token),
            device_private_key: &device.keys.private_key,
            recipient_public_key: &user.keys.public_key,
            user_uid: &request.user_uid,
            location,
            disposition: request.disposition,
        };

        let created = self.timed(RpcMethod::CreateStream, || {
            self.provisioner.create_stream(&stream_request)
        });
        let stream_uid = match created {
            Ok(uid) => uid,
            Err(err) => {
                self.undo_claim(&request.device_token, &user.keys.public_key);
                return Err(context::<ProvisionerError>("failed to create stream")(err));
            }
        };

        if let Err(err) = self.record_stream(device.id, &stream_uid) {
            warn!(
                stream_uid = %stream_uid,
                device_token = %request.device_token,
                error = %err,
                "claim undone after stream creation; remote stream is orphaned"
            );
            self.undo_claim(&request.device_token, &user.keys.public_key);
            return Err(err);
        }

        Ok(ClaimDeviceResponse {
            user_private_key: user.keys.private_key,
            user_public_key: user.keys.public_key,
            device_public_key: device.keys.public_key,
        })
    }

    /// Upsert the user and insert the device in one committed transaction.
    fn register(
        &self,
        request: &ClaimDeviceRequest,
        location: Location,
        user_keys: &KeyPair,
        device_keys: &KeyPair,
    ) -> Result<(User, Device), RegistrationError> {
        let mut tx = self
            .store
            .begin()
            .map_err(context::<StoreError>("failed to start transaction"))?;

        let user = tx
            .upsert_user(&request.user_uid, user_keys)
            .map_err(context::<StoreError>("failed to upsert user"))?;

        let device = tx
            .insert_device(NewDevice {
                token: &request.device_token,
                user_id: user.id,
                keys: device_keys,
                location,
                disposition: request.disposition,
            })
            .map_err(context::<StoreError>("failed to insert device"))?;

        tx.commit()
            .map_err(context::<StoreError>("failed to commit claim"))?;
        Ok((user, device))
    }

    fn record_stream(&self, device_id: u64, stream_uid: &str) -> Result<(), RegistrationError> {
        let mut tx = self
            .store
            .begin()
            .map_err(context::<StoreError>("failed to start transaction"))?;
        tx.insert_stream(device_id, stream_uid)
            .map_err(context::<StoreError>("failed to record stream"))?;
        tx.commit()
            .map_err(context::<StoreError>("failed to commit stream"))
    }

    /// Delete a device and, when it was the last one, its owner.
    fn remove_device(
        &self,
        token: &str,
        user_public_key: &str,
    ) -> Result<RemovedDevice, RegistrationError> {
        let mut tx = self
            .store
            .begin()
            .map_err(context::<StoreError>("failed to start transaction"))?;

        let removed = tx
            .delete_device_by_token_and_owner_key(token, user_public_key)
            .map_err(context::<StoreError>("failed to delete device"))?;

        let remaining = tx
            .count_devices_for_user(removed.user_id)
            .map_err(context::<StoreError>("failed to count remaining devices"))?;

        if remaining == 0 {
            tx.delete_user(removed.user_id)
                .map_err(context::<StoreError>("failed to delete user"))?;
        }

        tx.commit()
            .map_err(context::<StoreError>("failed to commit revoke"))?;
        Ok(removed)
    }

    /// Remove the rows of a claim whose stream could not be set up.
    fn undo_claim(&self, token: &str, user_public_key: &str) {
        if let Err(err) = self.remove_device(token, user_public_key) {
            warn!(
                device_token = %token,
                error = %err,
                "failed to undo claim; device row left without a stream"
            );
        }
    }

    /// Revoke a device owned by the holder of `user_public_key`.
    pub fn revoke_device(
        &self,
        request: &RevokeDeviceRequest,
    ) -> Result<RevokeDeviceResponse, RegistrationError> {
        validate_revoke(request)?;

        if self.verbose {
            info!(
                method = "RevokeDevice",
                device_token = %request.device_token,
                "revoking device"
            );
        }

        let removed = self.remove_device(&request.device_token, &request.user_public_key)?;

        for (done, stream) in removed.streams.iter().enumerate() {
            let result = self.timed(RpcMethod::DeleteStream, || {
                self.provisioner.delete_stream(&stream.uid)
            });

            if let Err(err) = result {
                let abandoned: Vec<&str> = removed.streams[done..]
                    .iter()
                    .map(|s| s.uid.as_str())
                    .collect();
                warn!(
                    device_token = %request.device_token,
                    ?abandoned,
                    error = %err,
                    "device revoked locally but remote streams were not deleted"
                );
                return Err(context::<ProvisionerError>("failed to delete stream")(err));
            }
        }

        Ok(RevokeDeviceResponse {})
    }
}

impl<S, P, K> RegistrationService for DeviceRegistrar<S, P, K>
where
    S: DeviceStore + 'static,
    P: StreamProvisioner + 'static,
    K: KeyGenerator + 'static,
{
    fn claim_device(
        &self,
        request: &ClaimDeviceRequest,
    ) -> Result<ClaimDeviceResponse, RegistrationError> {
        DeviceRegistrar::claim_device(self, request)
    }

    fn revoke_device(
        &self,
        request: &RevokeDeviceRequest,
    ) -> Result<RevokeDeviceResponse, RegistrationError> {
        DeviceRegistrar::revoke_device(self, request)
    }

    fn check_ready(&self) -> Result<(), RegistrationError> {
        self.store
            .ping()
            .map_err(context::<StoreError>("store is not reachable"))
    }

    fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}
