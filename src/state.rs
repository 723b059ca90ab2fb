// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use crate::registrar::RegistrationService;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub registrar: Arc<dyn RegistrationService>,
}

impl AppState {
    pub fn new(registrar: impl RegistrationService) -> Self {
        Self {
            registrar: Arc::new(registrar),
        }
    }
}
