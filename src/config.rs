// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! This module defines environment variable names and default values used
//! throughout the application. Configuration is loaded from the environment
//! at startup.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `DEVICEREG_ADDR` | Server bind address | `0.0.0.0:8080` |
//! | `DEVICEREG_ENCODER_URL` | Base URL of the encoder Twirp service | Required |
//! | `DEVICEREG_DATABASE_PATH` | Path of the redb database file | `/data/devicereg.redb` |
//! | `DEVICEREG_ENCRYPTION_PASSWORD` | Password sealing private keys at rest | Required |
//! | `DEVICEREG_VERBOSE` | Log every claim/revoke request | `false` |
//! | `DEVICEREG_TLS_CERT_PATH` | PEM certificate chain for HTTPS | Optional |
//! | `DEVICEREG_TLS_KEY_PATH` | PEM private key for HTTPS | Optional |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |

use std::net::SocketAddr;
use std::path::PathBuf;

use url::Url;

/// Environment variable name for the server bind address.
pub const ADDR_ENV: &str = "DEVICEREG_ADDR";

/// Environment variable name for the encoder base URL.
pub const ENCODER_URL_ENV: &str = "DEVICEREG_ENCODER_URL";

/// Environment variable name for the database file path.
pub const DATABASE_PATH_ENV: &str = "DEVICEREG_DATABASE_PATH";

/// Environment variable name for the key-column encryption password.
///
/// Private keys of users and devices are sealed under a key derived from
/// this password. Changing it makes existing keys unreadable.
pub const ENCRYPTION_PASSWORD_ENV: &str = "DEVICEREG_ENCRYPTION_PASSWORD";

/// Environment variable name for verbose request logging.
pub const VERBOSE_ENV: &str = "DEVICEREG_VERBOSE";

pub const TLS_CERT_PATH_ENV: &str = "DEVICEREG_TLS_CERT_PATH";
pub const TLS_KEY_PATH_ENV: &str = "DEVICEREG_TLS_KEY_PATH";

/// Environment variable selecting the log output format.
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

pub const DEFAULT_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_DATABASE_PATH: &str = "/data/devicereg.redb";
pub const DEFAULT_LOG_FILTER: &str = "info,tower_http=debug";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: ${0}")]
    Missing(&'static str),

    #[error("invalid value for ${name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// PEM file locations for serving HTTPS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Fully resolved service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub encoder_url: Url,
    pub database_path: PathBuf,
    pub encryption_password: String,
    pub verbose: bool,
    pub tls: Option<TlsPaths>,
    pub log_format: LogFormat,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary lookup function.
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let listen_addr = get(ADDR_ENV)
            .unwrap_or_else(|| DEFAULT_ADDR.to_string())
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::Invalid {
                name: ADDR_ENV,
                reason: e.to_string(),
            })?;

        let encoder_url = get(ENCODER_URL_ENV)
            .ok_or(ConfigError::Missing(ENCODER_URL_ENV))?
            .parse::<Url>()
            .map_err(|e| ConfigError::Invalid {
                name: ENCODER_URL_ENV,
                reason: e.to_string(),
            })?;

        let database_path = PathBuf::from(
            get(DATABASE_PATH_ENV).unwrap_or_else(|| DEFAULT_DATABASE_PATH.to_string()),
        );

        let encryption_password =
            get(ENCRYPTION_PASSWORD_ENV).ok_or(ConfigError::Missing(ENCRYPTION_PASSWORD_ENV))?;

        let verbose = match get(VERBOSE_ENV) {
            Some(v) => parse_bool(&v).ok_or_else(|| ConfigError::Invalid {
                name: VERBOSE_ENV,
                reason: format!("expected a boolean, got {v:?}"),
            })?,
            None => false,
        };

        let tls = match (get(TLS_CERT_PATH_ENV), get(TLS_KEY_PATH_ENV)) {
            (Some(cert), Some(key)) => Some(TlsPaths {
                cert: cert.into(),
                key: key.into(),
            }),
            (None, None) => None,
            (Some(_), None) => return Err(ConfigError::Missing(TLS_KEY_PATH_ENV)),
            (None, Some(_)) => return Err(ConfigError::Missing(TLS_CERT_PATH_ENV)),
        };

        let log_format = match get(LOG_FORMAT_ENV).as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        Ok(Self {
            listen_addr,
            encoder_url,
            database_path,
            encryption_password,
            verbose,
            tls,
            log_format,
        })
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
