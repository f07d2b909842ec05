// Copyright 2026 Daniel Pelikan
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

//! Error types.

use thiserror::Error;

use crate::state::{CentralState, PeripheralState, TransitionError};

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Opaque failure reported by a radio transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TransportError {
    message: String,
    code: Option<i32>,
}

impl TransportError {
    /// Create a new transport error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    /// Create a new transport error carrying a platform error code.
    pub fn with_code(message: impl Into<String>, code: i32) -> Self {
        Self {
            message: message.into(),
            code: Some(code),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn code(&self) -> Option<i32> {
        self.code
    }
}

/// Errors returned or delivered through callbacks by the central and peripheral.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error(transparent)]
    CentralTransition(#[from] TransitionError<CentralState>),

    #[error(transparent)]
    PeripheralTransition(#[from] TransitionError<PeripheralState>),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("no transport attached, start must be called first")]
    NoTransportSet,

    #[error("already connected to remote peripheral")]
    AlreadyConnected,

    #[error("already connecting to remote peripheral")]
    AlreadyConnecting,

    #[error("remote peripheral has no transport handle")]
    NoHandle,

    #[error("no connection attempt for remote peripheral")]
    NoAttemptForPeer,

    #[error("no connection for remote peripheral")]
    NoConnectionForPeer,

    #[error("operation already in progress")]
    Busy,

    #[error("timeout elapsed")]
    TimeoutElapsed,

    #[error("interrupted")]
    Interrupted,

    #[error("remote peer is not connected")]
    PeerNotConnected,

    #[error("event loop is closed")]
    EventLoopClosed,

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}
