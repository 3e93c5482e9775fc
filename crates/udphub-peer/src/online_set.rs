// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The peer's last-known view of the online set, replaced wholesale on every
//! `CLIENT_LIST` the broker sends.

use std::sync::RwLock;

#[derive(Default)]
pub struct OnlineSet {
    ids: RwLock<Vec<String>>,
}

impl OnlineSet {
    #[must_use]
    pub fn new() -> Self {
        Self {
            ids: RwLock::new(Vec::new()),
        }
    }

    /// Replace the view with `ids`, minus `self_id`.
    pub fn replace(&self, ids: Vec<String>, self_id: &str) {
        let filtered: Vec<String> = ids.into_iter().filter(|id| id != self_id).collect();
        let mut guard = match self.ids.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = filtered;
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<String> {
        match self.ids.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}
