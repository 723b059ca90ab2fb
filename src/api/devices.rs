// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! `DeviceRegistration` RPC endpoints.
//!
//! Both methods are Twirp-style JSON RPCs: `POST` to
//! `/twirp/decode.iot.devicereg.DeviceRegistration/{Method}` with a JSON
//! body. The workflows block on store and encoder I/O, so each one runs on
//! a blocking worker thread.

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use tracing::error;

use crate::{
    error::ApiError,
    models::{ClaimDeviceRequest, ClaimDeviceResponse, RevokeDeviceRequest, RevokeDeviceResponse},
    registrar::RegistrationError,
    state::AppState,
};

fn reject_body(rejection: JsonRejection) -> ApiError {
    ApiError::malformed(format!(
        "the json request could not be decoded: {}",
        rejection.body_text()
    ))
}

fn report(method: &'static str, err: RegistrationError) -> ApiError {
    if !err.is_invalid_argument() {
        error!(method, error = %err, "request failed");
    }
    ApiError::from(err)
}

/// Claim a device on behalf of a user.
///
/// Creates the user on first use, generates key pairs, and provisions an
/// encrypted stream for the device on the encoder.
#[utoipa::path(
    post,
    path = "/twirp/decode.iot.devicereg.DeviceRegistration/ClaimDevice",
    tag = "DeviceRegistration",
    request_body = ClaimDeviceRequest,
    responses(
        (status = 200, description = "Device claimed", body = ClaimDeviceResponse),
        (status = 400, description = "Invalid or malformed request", body = crate::error::ErrorBody),
        (status = 500, description = "Claim failed", body = crate::error::ErrorBody)
    )
)]
pub async fn claim_device(
    State(state): State<AppState>,
    payload: Result<Json<ClaimDeviceRequest>, JsonRejection>,
) -> Result<Json<ClaimDeviceResponse>, ApiError> {
    let Json(request) = payload.map_err(reject_body)?;
    let registrar = state.registrar.clone();

    let response = tokio::task::spawn_blocking(move || registrar.claim_device(&request))
        .await
        .map_err(|e| ApiError::internal(format!("claim worker failed: {e}")))?
        .map_err(|e| report("ClaimDevice", e))?;

    Ok(Json(response))
}

/// Revoke a device, proving ownership with the user's public key.
///
/// Deletes the device (and the user, when it was their last device), then
/// deletes the device's streams on the encoder.
#[utoipa::path(
    post,
    path = "/twirp/decode.iot.devicereg.DeviceRegistration/RevokeDevice",
    tag = "DeviceRegistration",
    request_body = RevokeDeviceRequest,
    responses(
        (status = 200, description = "Device revoked", body = RevokeDeviceResponse),
        (status = 400, description = "Invalid or malformed request", body = crate::error::ErrorBody),
        (status = 500, description = "Revoke failed", body = crate::error::ErrorBody)
    )
)]
pub async fn revoke_device(
    State(state): State<AppState>,
    payload: Result<Json<RevokeDeviceRequest>, JsonRejection>,
) -> Result<Json<RevokeDeviceResponse>, ApiError> {
    let Json(request) = payload.map_err(reject_body)?;
    let registrar = state.registrar.clone();

    let response = tokio::task::spawn_blocking(move || registrar.revoke_device(&request))
        .await
        .map_err(|e| ApiError::internal(format!("revoke worker failed: {e}")))?
        .map_err(|e| report("RevokeDevice", e))?;

    Ok(Json(response))
}
