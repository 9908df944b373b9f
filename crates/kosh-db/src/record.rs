// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Credential records: a named bag of fields plus metadata, frozen once
//! committed, linked into a history chain by the store.

use crate::crypto::MasterKey;
use crate::error::{Error, Result};
use indexmap::IndexMap;
use serde_json::{Map, Value, json};

/// Line prefix of an encrypted record in the database file.
pub const ENTRY_PREFIX: &str = "p:";

/// Recognized meta keys.
pub const META_FIELD_ORDER: &str = "FieldOrder";
pub const META_COPY_FIELD_ORDER: &str = "CopyFieldOrder";
pub const META_RENAMED_FROM: &str = "RenamedFrom";
pub const META_DELETED: &str = "Deleted";

/// Field names tried first when no explicit order is configured.
const DEFAULT_FIELD_ORDER: [&str; 4] = ["Username", "login", "Password", "passwd"];

/// Handle to a record inside a store's arena.
pub type RecordId = usize;

/// One credential entry.
///
/// A record is mutable until it receives a timestamp (which happens on commit
/// to the store); after that it is frozen and any mutation is a programmer
/// error that panics. Edits go through [`clone_for_edit`], which produces a
/// fresh unfrozen record carrying `RenamedFrom`.
///
/// [`clone_for_edit`]: Record::clone_for_edit
#[derive(Debug, Clone)]
pub struct Record {
    name: String,
    fields: IndexMap<String, String>,
    meta: IndexMap<String, String>,
    timestamp: Option<u64>,
    /// Index of the owning key in the store's master-key list.
    pub(crate) owning_key: usize,
    /// History links, maintained by the store.
    pub(crate) older: Option<RecordId>,
    pub(crate) newer: Option<RecordId>,
}

impl PartialEq for Record {
    /// Equality ignores timestamps and history links: two records are equal
    /// when their name, field map, and meta match exactly.
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.fields == other.fields && self.meta == other.meta
    }
}

impl Record {
    /// Create a fresh, unfrozen record.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: IndexMap::new(),
            meta: IndexMap::new(),
            timestamp: None,
            owning_key: 0,
            older: None,
            newer: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Seconds since epoch; `None` until committed.
    pub fn timestamp(&self) -> Option<u64> {
        self.timestamp
    }

    /// A record freezes when its timestamp is assigned.
    pub fn is_frozen(&self) -> bool {
        self.timestamp.is_some()
    }

    pub fn is_deleted(&self) -> bool {
        self.meta.contains_key(META_DELETED)
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    pub fn get_meta(&self, key: &str) -> Option<&str> {
        self.meta.get(key).map(String::as_str)
    }

    fn assert_unfrozen(&self) {
        assert!(
            !self.is_frozen(),
            "attempted mutation of a committed record; use clone_for_edit()"
        );
    }

    /// Set a field value. Panics on a frozen record.
    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.assert_unfrozen();
        self.fields.insert(name.into(), value.into());
    }

    /// Remove a field. Panics on a frozen record.
    pub fn remove_field(&mut self, name: &str) -> Option<String> {
        self.assert_unfrozen();
        self.fields.shift_remove(name)
    }

    /// Set a meta value. Panics on a frozen record.
    pub fn set_meta(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.assert_unfrozen();
        self.meta.insert(key.into(), value.into());
    }

    /// Remove a meta value. Panics on a frozen record.
    pub fn remove_meta(&mut self, key: &str) -> Option<String> {
        self.assert_unfrozen();
        self.meta.shift_remove(key)
    }

    /// Meta cleanup used by the store's merge logic, which may legitimately
    /// touch records the public API treats as frozen.
    pub(crate) fn meta_remove_internal(&mut self, key: &str) {
        self.meta.shift_remove(key);
    }

    pub(crate) fn freeze(&mut self, timestamp: u64) {
        if self.timestamp.is_none() {
            self.timestamp = Some(timestamp);
        }
    }

    /// Clone this record for editing: same fields and meta, no timestamp, and
    /// `RenamedFrom` pointing at the latest visible name so the store can
    /// chain the revisions even across a rename.
    pub fn clone_for_edit(&self) -> Self {
        let mut meta = self.meta.clone();
        meta.insert(META_RENAMED_FROM.to_string(), self.name.clone());
        Self {
            name: self.name.clone(),
            fields: self.fields.clone(),
            meta,
            timestamp: None,
            owning_key: self.owning_key,
            older: None,
            newer: None,
        }
    }

    /// Clone for editing under a new name.
    pub fn clone_renamed(&self, new_name: impl Into<String>) -> Self {
        let mut clone = self.clone_for_edit();
        clone.name = new_name.into();
        clone
    }

    /// A deletion tombstone: same name, no fields, `Deleted` set.
    pub fn tombstone(&self) -> Self {
        let mut meta = self.meta.clone();
        meta.shift_remove(META_RENAMED_FROM);
        meta.insert(META_DELETED.to_string(), "true".to_string());
        Self {
            name: self.name.clone(),
            fields: IndexMap::new(),
            meta,
            timestamp: None,
            owning_key: self.owning_key,
            older: None,
            newer: None,
        }
    }

    /// Field names in display/serialization order: `FieldOrder` when present
    /// (comma-separated), else the conventional credential fields, then every
    /// remaining field in insertion order.
    pub fn field_order(&self) -> Vec<&str> {
        let preferred: Vec<&str> = match self.meta.get(META_FIELD_ORDER) {
            Some(order) => order.split(',').map(str::trim).collect(),
            None => DEFAULT_FIELD_ORDER.to_vec(),
        };
        self.order_by(&preferred)
    }

    /// Field names in clipboard-iteration order: `CopyFieldOrder` when
    /// present, else the display order.
    pub fn copy_field_order(&self) -> Vec<&str> {
        match self.meta.get(META_COPY_FIELD_ORDER) {
            Some(order) => {
                let preferred: Vec<&str> = order.split(',').map(str::trim).collect();
                self.order_by(&preferred)
            }
            None => self.field_order(),
        }
    }

    fn order_by(&self, preferred: &[&str]) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::with_capacity(self.fields.len());
        for name in preferred {
            if let Some((key, _)) = self.fields.get_key_value(*name) {
                out.push(key.as_str());
            }
        }
        for key in self.fields.keys() {
            if !preferred.contains(&key.as_str()) {
                out.push(key.as_str());
            }
        }
        out
    }

    /// Iterate fields in display order.
    pub fn iter_fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.field_order()
            .into_iter()
            .map(|name| (name, self.fields.get(name).map(String::as_str).unwrap_or("")))
    }

    pub fn meta(&self) -> impl Iterator<Item = (&str, &str)> {
        self.meta.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Serialize to the on-disk JSON array `[name, timestamp, {fields}, {meta}]`.
    fn to_json(&self) -> Value {
        let mut fields = Map::new();
        for name in self.field_order() {
            fields.insert(name.to_string(), json!(self.fields[name]));
        }
        let mut meta = Map::new();
        for (key, value) in &self.meta {
            meta.insert(key.clone(), json!(value));
        }
        json!([self.name, self.timestamp, fields, meta])
    }

    /// Encrypt to a `p:` line under the owning key.
    pub fn encode(&self, key: &MasterKey) -> Result<String> {
        let plaintext = serde_json::to_vec(&self.to_json())?;
        Ok(format!("{}{}", ENTRY_PREFIX, key.encrypt(&plaintext)?))
    }

    /// Decrypt a `p:` line. Fails with `ChecksumFailure` when `key` does not
    /// own the blob.
    pub fn decode(line: &str, key: &MasterKey, owning_key: usize) -> Result<Self> {
        let blob = line
            .strip_prefix(ENTRY_PREFIX)
            .ok_or_else(|| Error::MalformedBlob("missing p: prefix".into()))?;
        let plaintext = key.decrypt(blob)?;
        let value: Value = serde_json::from_slice(&plaintext)?;

        let parts = value
            .as_array()
            .filter(|a| a.len() == 4)
            .ok_or_else(|| Error::MalformedBlob("record is not a 4-element array".into()))?;
        let name = parts[0]
            .as_str()
            .ok_or_else(|| Error::MalformedBlob("record name is not a string".into()))?
            .to_string();
        let timestamp = match &parts[1] {
            Value::Null => None,
            other => Some(
                other
                    .as_u64()
                    .ok_or_else(|| Error::MalformedBlob("timestamp is not an integer".into()))?,
            ),
        };

        let decode_map = |value: &Value, what: &str| -> Result<IndexMap<String, String>> {
            let obj = value
                .as_object()
                .ok_or_else(|| Error::MalformedBlob(format!("{what} is not an object")))?;
            obj.iter()
                .map(|(k, v)| {
                    let v = v
                        .as_str()
                        .ok_or_else(|| Error::MalformedBlob(format!("{what}.{k} is not a string")))?;
                    Ok((k.clone(), v.to_string()))
                })
                .collect()
        };

        Ok(Self {
            name,
            fields: decode_map(&parts[2], "fields")?,
            meta: decode_map(&parts[3], "meta")?,
            timestamp,
            owning_key,
            older: None,
            newer: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Record {
        let mut r = Record::new("site");
        r.set_field("URL", "https://example.net");
        r.set_field("Username", "u");
        r.set_field("Password", "p");
        r.set_field("Notes", "n");
        r
    }

    #[test]
    fn default_field_order_puts_credentials_first() {
        let r = sample();
        assert_eq!(r.field_order(), vec!["Username", "Password", "URL", "Notes"]);
    }

    #[test]
    fn explicit_field_order_wins() {
        let mut r = sample();
        r.set_meta(META_FIELD_ORDER, "Notes, URL");
        assert_eq!(r.field_order(), vec!["Notes", "URL", "Username", "Password"]);
    }

    #[test]
    fn copy_order_falls_back_to_display_order() {
        let mut r = sample();
        assert_eq!(r.copy_field_order(), r.field_order());
        r.set_meta(META_COPY_FIELD_ORDER, "Password");
        assert_eq!(
            r.copy_field_order(),
            vec!["Password", "URL", "Username", "Notes"]
        );
    }

    #[test]
    fn equality_ignores_timestamp() {
        let mut a = sample();
        let b = sample();
        assert_eq!(a, b);
        a.freeze(12345);
        assert_eq!(a, b);
        let mut c = sample();
        c.set_field("Password", "other");
        assert_ne!(a, c);
    }

    #[test]
    fn encode_decode_roundtrip() {
        let key = MasterKey::generate("pw");
        let mut r = sample();
        r.freeze(1700000000);
        let line = r.encode(&key).unwrap();
        assert!(line.starts_with("p:"));
        let decoded = Record::decode(&line, &key, 0).unwrap();
        assert_eq!(decoded, r);
        assert_eq!(decoded.timestamp(), Some(1700000000));
        // Serialized field order is preserved on the way back in.
        assert_eq!(
            decoded.fields.keys().collect::<Vec<_>>(),
            vec!["Username", "Password", "URL", "Notes"]
        );
    }

    #[test]
    #[should_panic(expected = "committed record")]
    fn mutating_a_frozen_record_panics() {
        let mut r = sample();
        r.freeze(1);
        r.set_field("Password", "new");
    }

    #[test]
    fn clone_for_edit_carries_renamed_from() {
        let mut r = sample();
        r.freeze(1);
        let mut edit = r.clone_for_edit();
        assert!(!edit.is_frozen());
        assert_eq!(edit.get_meta(META_RENAMED_FROM), Some("site"));
        edit.set_field("Password", "rotated");
        assert_eq!(edit.get("Password"), Some("rotated"));
    }

    #[test]
    fn tombstone_has_no_fields() {
        let mut r = sample();
        r.freeze(1);
        let t = r.tombstone();
        assert!(t.is_deleted());
        assert_eq!(t.iter_fields().count(), 0);
        assert_eq!(t.name(), "site");
    }
}
