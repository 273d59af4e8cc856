// Copyright 2026 gridtier Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

/// Errors of the tiered cache.
///
/// Invariant violations such as a double pin are caller bugs, not recoverable conditions, and
/// panic instead of showing up here.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Blob store engine error.
    #[error("gridtier storage error: {0}")]
    Storage(#[from] gridtier_storage::Error),
    /// Rejected configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Insert of a uid that already has a live residency.
    #[error("entry already exists: {uid}")]
    DuplicateUid {
        /// The conflicting uid.
        uid: String,
    },
    /// Operation on a uid without a residency.
    #[error("entry not found: {uid}")]
    NotFound {
        /// The missing uid.
        uid: String,
    },
    /// Other error.
    #[error("other error: {0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl Error {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a duplicate uid error.
    pub fn duplicate(uid: impl ToString) -> Self {
        Self::DuplicateUid { uid: uid.to_string() }
    }

    /// Create a not found error.
    pub fn not_found(uid: impl ToString) -> Self {
        Self::NotFound { uid: uid.to_string() }
    }

    /// Create customized error.
    pub fn other<E>(e: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    {
        Self::Other(e.into())
    }
}

/// Result type for gridtier.
pub type Result<T> = std::result::Result<T, Error>;
