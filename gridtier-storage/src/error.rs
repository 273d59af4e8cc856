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

/// Blob store engine error.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Io error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Layout serde error.
    #[error("serde error: {0}")]
    Serde(#[from] bincode::Error),
    /// Persisted payload failed checksum verification.
    #[error("checksum mismatch, expected: {expected}, get: {get}")]
    ChecksumMismatch {
        /// Stored checksum.
        expected: u64,
        /// Computed checksum.
        get: u64,
    },
    /// Invalid configuration, raised before any io is performed.
    #[error("config error: {0}")]
    Config(String),
    /// The driver has no value for the uid.
    #[error("entry not found in blob store: {uid}")]
    Missing {
        /// Uid of the missing entry.
        uid: String,
    },
    /// The off-heap pool cannot fit the allocation.
    #[error("off-heap pool exhausted, require: {require}, capacity: {capacity}")]
    OffHeapExhausted {
        /// Requested bytes.
        require: usize,
        /// Pool capacity in bytes.
        capacity: usize,
    },
    /// Error raised by the underlying driver.
    #[error("driver error: {0}")]
    Driver(anyhow::Error),
    /// Other error.
    #[error("other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Wrap a driver-raised error.
    pub fn driver(e: impl Into<anyhow::Error>) -> Self {
        Self::Driver(e.into())
    }

    /// Build a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Build an error for a uid the driver has no value for.
    pub fn missing(uid: impl ToString) -> Self {
        Self::Missing { uid: uid.to_string() }
    }

    /// Wrap any other error.
    pub fn other(e: impl Into<anyhow::Error>) -> Self {
        Self::Other(e.into())
    }
}

/// Result type with [`Error`].
pub type Result<T> = core::result::Result<T, Error>;
