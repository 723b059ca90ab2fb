// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! HTTP error responses.
//!
//! Errors are rendered in the Twirp JSON error shape so existing Twirp
//! clients of the registration service can decode them:
//!
//! ```json
//! {"code":"invalid_argument","msg":"device_token is required","meta":{"argument":"device_token"}}
//! ```

use std::collections::BTreeMap;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::registrar::RegistrationError;

/// Twirp error codes used by this service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidArgument,
    Malformed,
    BadRoute,
    Internal,
}

impl ErrorCode {
    pub fn status(self) -> StatusCode {
        match self {
            ErrorCode::InvalidArgument | ErrorCode::Malformed => StatusCode::BAD_REQUEST,
            ErrorCode::BadRoute => StatusCode::NOT_FOUND,
            ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    pub meta: BTreeMap<String, String>,
}

/// Wire representation of an error.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub msg: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, String>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            meta: BTreeMap::new(),
        }
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    pub fn invalid_argument(argument: &str, message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidArgument, message).with_meta("argument", argument)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Malformed, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    pub fn status(&self) -> StatusCode {
        self.code.status()
    }
}

impl From<RegistrationError> for ApiError {
    fn from(err: RegistrationError) -> Self {
        match err {
            RegistrationError::InvalidArgument { argument, message } => {
                ApiError::invalid_argument(argument, message)
            }
            RegistrationError::Internal(source) => ApiError::internal(source.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(ErrorBody {
            code: self.code,
            msg: self.message,
            meta: self.meta,
        });
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[test]
    fn constructors_set_code_and_message() {
        let bad = ApiError::invalid_argument("broker", "broker is required");
        assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
        assert_eq!(bad.message, "broker is required");
        assert_eq!(bad.meta.get("argument").map(String::as_str), Some("broker"));

        let malformed = ApiError::malformed("bad json");
        assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);

        let internal = ApiError::internal("boom");
        assert_eq!(internal.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(internal.meta.is_empty());
    }

    #[test]
    fn registration_errors_map_to_twirp_codes() {
        let invalid: ApiError = RegistrationError::required("user_uid").into();
        assert_eq!(invalid.code, ErrorCode::InvalidArgument);
        assert_eq!(invalid.message, "user_uid is required");

        let internal: ApiError =
            RegistrationError::internal(std::io::Error::other("disk gone")).into();
        assert_eq!(internal.code, ErrorCode::Internal);
        assert_eq!(internal.message, "disk gone");
    }

    #[tokio::test]
    async fn into_response_returns_twirp_body() {
        let response = ApiError::invalid_argument("device_token", "device_token is required")
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body_bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(body_bytes.to_vec()).unwrap();
        assert_eq!(
            body,
            r#"{"code":"invalid_argument","msg":"device_token is required","meta":{"argument":"device_token"}}"#
        );
    }

    #[tokio::test]
    async fn internal_body_omits_meta() {
        let response = ApiError::internal("failed to delete device").into_response();
        let body_bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(body_bytes.to_vec()).unwrap();
        assert_eq!(body, r#"{"code":"internal","msg":"failed to delete device"}"#);
    }
}
