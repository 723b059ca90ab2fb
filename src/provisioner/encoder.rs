// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Encoder client speaking Twirp's JSON protocol.
//!
//! Each RPC is a `POST {base}/twirp/decode.iot.encoder.Encoder/{Method}`
//! with a JSON body. Failures come back as a non-2xx status with a Twirp
//! error body `{"code": "...", "msg": "..."}`.

use std::time::Duration;

use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::runtime::Handle;
use url::Url;

use super::{CreateStreamRequest, ProvisionerError, StreamProvisioner};

const SERVICE_PATH: &str = "twirp/decode.iot.encoder.Encoder";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct CreateStreamResponse {
    #[serde(default)]
    stream_uid: String,
}

#[derive(Debug, Serialize)]
struct DeleteStreamRequest<'a> {
    stream_uid: &'a str,
}

#[derive(Debug, Deserialize)]
struct DeleteStreamResponse {}

#[derive(Debug, Deserialize)]
struct TwirpError {
    code: String,
    #[serde(default)]
    msg: String,
}

/// HTTP client for the encoder service.
///
/// The [`StreamProvisioner`] methods block the calling thread until the
/// response arrives, so they must run on a blocking worker (for example
/// inside `tokio::task::spawn_blocking`), never on a runtime worker thread.
#[derive(Debug, Clone)]
pub struct EncoderClient {
    base_url: Url,
    http: Client,
    runtime: Handle,
}

impl EncoderClient {
    pub fn new(base_url: Url, runtime: Handle) -> Result<Self, ProvisionerError> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            base_url,
            http,
            runtime,
        })
    }

    fn endpoint(&self, method: &str) -> Result<Url, ProvisionerError> {
        let mut base = self.base_url.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(base.join(&format!("{SERVICE_PATH}/{method}"))?)
    }

    async fn call<Req, Resp>(&self, method: &str, body: &Req) -> Result<Resp, ProvisionerError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let url = self.endpoint(method)?;
        let response = self.http.post(url).json(body).send().await?;
        let status = response.status();

        if status.is_success() {
            return Ok(response.json::<Resp>().await?);
        }

        let text = response.text().await.unwrap_or_default();
        Err(match serde_json::from_str::<TwirpError>(&text) {
            Ok(err) => ProvisionerError::Rejected {
                code: err.code,
                msg: err.msg,
            },
            Err(_) => ProvisionerError::Rejected {
                code: status.as_u16().to_string(),
                msg: text,
            },
        })
    }
}

impl StreamProvisioner for EncoderClient {
    fn create_stream(&self, request: &CreateStreamRequest<'_>) -> Result<String, ProvisionerError> {
        let response: CreateStreamResponse =
            self.runtime.block_on(self.call("CreateStream", request))?;

        if response.stream_uid.is_empty() {
            return Err(ProvisionerError::InvalidResponse(
                "missing stream_uid in CreateStream response".to_string(),
            ));
        }
        Ok(response.stream_uid)
    }

    fn delete_stream(&self, stream_uid: &str) -> Result<(), ProvisionerError> {
        let _: DeleteStreamResponse = self
            .runtime
            .block_on(self.call("DeleteStream", &DeleteStreamRequest { stream_uid }))?;
        Ok(())
    }
}
