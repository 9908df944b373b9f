// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for the credential store

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for store operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during store operations
///
/// `ChecksumFailure` doubles as "wrong key": callers probing a blob with
/// several master keys treat it as "try the next one".
#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("base64 error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("checksum failure")]
    ChecksumFailure,

    #[error("master key has expired from memory")]
    KeyExpired,

    #[error("database is locked by another process: {0}")]
    FileLocked(PathBuf),

    #[error("unrecognised file header")]
    UnrecognisedHeader,

    #[error("malformed record blob: {0}")]
    MalformedBlob(String),

    #[error("no such entry: {0}")]
    NoSuchEntry(String),

    #[error("entry name must not be empty")]
    EmptyName,

    #[error("user cancelled the prompt")]
    Canceled,

    #[error("internal bookkeeping inconsistency: {0}")]
    Bug(String),
}
