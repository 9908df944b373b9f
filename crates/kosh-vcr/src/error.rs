// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for the URL-VCR

use thiserror::Error;

/// Result type alias for URL-VCR operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while recording or replaying a session
///
/// `ReplayFailure` is the terminal kind: a scripted action that could not be
/// reproduced, or a transport failure that exhausted its retries. The driver
/// rolls the state chain back before surfacing it.
#[derive(Debug, Error)]
pub enum Error {
    #[error("replay failure: {0}")]
    ReplayFailure(String),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("base64 error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("malformed script: {0}")]
    Script(String),

    #[error("unknown action code {0:?}")]
    UnknownAction(char),

    #[error("user cancelled")]
    Canceled,
}

impl Error {
    /// Whether the driver should roll back the pushed state and abort replay.
    pub fn is_replay_failure(&self) -> bool {
        matches!(self, Error::ReplayFailure(_))
    }
}
