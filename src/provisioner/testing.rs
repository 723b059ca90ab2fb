// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! In-memory provisioner for tests.

use std::sync::Mutex;
use std::time::Duration;

use super::{CreateStreamRequest, ProvisionerError, StreamProvisioner};

#[derive(Debug, Default)]
struct State {
    next_uid: u64,
    created: Vec<CreatedStream>,
    deleted: Vec<String>,
    fail_create: bool,
    fail_delete_after: Option<usize>,
    repeat_uid: Option<String>,
    delay: Duration,
    in_flight: usize,
    max_in_flight: usize,
}

/// A stream the fake encoder was asked to create.
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedStream {
    pub uid: String,
    pub device_topic: String,
    pub broker_address: String,
    pub recipient_public_key: String,
    pub device_private_key: String,
    pub user_uid: String,
}

/// Records every call and hands out `stream-N` uids.
#[derive(Debug, Default)]
pub struct RecordingProvisioner {
    state: Mutex<State>,
}

impl RecordingProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `create_stream` fail.
    pub fn fail_create(&self) {
        self.state.lock().unwrap().fail_create = true;
    }

    /// Let `n` more deletes succeed, then fail the rest.
    pub fn fail_delete_after(&self, n: usize) {
        let mut state = self.state.lock().unwrap();
        state.fail_delete_after = Some(state.deleted.len() + n);
    }

    /// Answer every subsequent `create_stream` with `uid` instead of a fresh one.
    pub fn repeat_uid(&self, uid: &str) {
        self.state.lock().unwrap().repeat_uid = Some(uid.to_string());
    }

    /// Make each `create_stream` take at least `delay`.
    pub fn slow_create(&self, delay: Duration) {
        self.state.lock().unwrap().delay = delay;
    }

    /// Most `create_stream` calls seen running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.state.lock().unwrap().max_in_flight
    }

    pub fn created(&self) -> Vec<CreatedStream> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted.clone()
    }
}

impl StreamProvisioner for RecordingProvisioner {
    fn create_stream(&self, request: &CreateStreamRequest<'_>) -> Result<String, ProvisionerError> {
        let delay = {
            let mut state = self.state.lock().unwrap();
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
            state.delay
        };
        std::thread::sleep(delay);

        let mut state = self.state.lock().unwrap();
        state.in_flight -= 1;
        if state.fail_create {
            return Err(ProvisionerError::Rejected {
                code: "unavailable".to_string(),
                msg: "encoder is down".to_string(),
            });
        }

        let uid = match state.repeat_uid.clone() {
            Some(uid) => uid,
            None => {
                state.next_uid += 1;
                format!("stream-{}", state.next_uid)
            }
        };
        state.created.push(CreatedStream {
            uid: uid.clone(),
            device_topic: request.device_topic.clone(),
            broker_address: request.broker_address.to_string(),
            recipient_public_key: request.recipient_public_key.to_string(),
            device_private_key: request.device_private_key.to_string(),
            user_uid: request.user_uid.to_string(),
        });
        Ok(uid)
    }

    fn delete_stream(&self, stream_uid: &str) -> Result<(), ProvisionerError> {
        let mut state = self.state.lock().unwrap();
        if state
            .fail_delete_after
            .is_some_and(|limit| state.deleted.len() >= limit)
        {
            return Err(ProvisionerError::Rejected {
                code: "internal".to_string(),
                msg: format!("cannot delete {stream_uid}"),
            });
        }
        state.deleted.push(stream_uid.to_string());
        Ok(())
    }
}
