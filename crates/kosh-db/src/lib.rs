// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Single-file encrypted credential store.
//!
//! A database is one append-only file: a magic header, wrapped master keys
//! (`k:` lines), encrypted records (`p:` lines), and verbatim passthrough for
//! everything else. Records are frozen once committed; edits clone into a new
//! revision and the old one stays reachable through a doubly linked history
//! chain, which is how concurrent append logs merge without losing data.
//!
//! The cryptographic envelope is a compatibility artifact with documented
//! weaknesses; see [`crypto`] before judging it.

pub mod crypto;
pub mod error;
pub mod import;
pub mod record;
pub mod store;

pub use crypto::MasterKey;
pub use error::{Error, Result};
pub use import::{ImportOutcome, import_csv, import_entry};
pub use record::{
    META_COPY_FIELD_ORDER, META_DELETED, META_FIELD_ORDER, META_RENAMED_FROM, Record, RecordId,
};
pub use store::{FILE_HEADER, Prompter, Store};
