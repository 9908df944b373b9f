// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! CSV import: build records from column-name → value mappings.

use crate::error::{Error, Result};
use crate::record::Record;
use crate::store::Store;
use std::path::Path;

/// Field names recognized across imports; user-supplied headers matching one
/// case-insensitively are normalized to the canonical spelling.
const KNOWN_FIELDS: [&str; 5] = ["name", "Username", "Password", "URL", "Notes"];

/// Normalize a header to its canonical casing when it is a known field.
pub fn translate_case(header: &str) -> &str {
    KNOWN_FIELDS
        .iter()
        .find(|known| known.eq_ignore_ascii_case(header))
        .copied()
        .unwrap_or(header)
}

/// Counts reported back to the caller after an import run.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ImportOutcome {
    pub imported: usize,
    pub skipped: usize,
}

/// Construct a record from one CSV row and commit it to the store.
///
/// The `name` column becomes the record name; every other non-empty column
/// becomes a field. Rows with an empty name and rows equal to the current
/// record of that name are skipped (returns `false`). Rows that share a name
/// with an existing, different record go through the normal insert path and
/// chain as history.
pub fn import_entry(store: &mut Store, columns: &[(String, String)]) -> Result<bool> {
    let mut name = String::new();
    let mut fields: Vec<(&str, &str)> = Vec::new();
    for (header, value) in columns {
        if value.is_empty() {
            continue;
        }
        let header = translate_case(header);
        if header == "name" {
            name = value.clone();
        } else {
            fields.push((header, value));
        }
    }
    if name.is_empty() {
        return Ok(false);
    }

    let mut record = Record::new(name);
    for (header, value) in fields {
        record.set_field(header, value);
    }
    if store.get(record.name()) == Some(&record) {
        return Ok(false);
    }
    store.insert(record)?;
    Ok(true)
}

/// Import a CSV file.
///
/// The first row names the columns unless `headers` overrides it; an
/// override must match the row width. Headers are case-normalized via
/// [`translate_case`].
pub fn import_csv(
    store: &mut Store,
    path: impl AsRef<Path>,
    headers: Option<Vec<String>>,
) -> Result<ImportOutcome> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(headers.is_none())
        .flexible(true)
        .from_path(path.as_ref())
        .map_err(csv_error)?;

    let headers: Vec<String> = match headers {
        Some(h) => h,
        None => reader.headers().map_err(csv_error)?.iter().map(str::to_string).collect(),
    };

    let mut outcome = ImportOutcome::default();
    for row in reader.records() {
        let row = row.map_err(csv_error)?;
        let columns: Vec<(String, String)> = headers
            .iter()
            .zip(row.iter())
            .map(|(h, v)| (h.clone(), v.to_string()))
            .collect();
        if import_entry(store, &columns)? {
            outcome.imported += 1;
        } else {
            outcome.skipped += 1;
            tracing::debug!(row = ?row.position().map(|p| p.line()), "skipped CSV row");
        }
    }
    Ok(outcome)
}

fn csv_error(err: csv::Error) -> Error {
    match err.into_kind() {
        csv::ErrorKind::Io(io) => Error::Io(io),
        other => Error::MalformedBlob(format!("CSV error: {other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn open_store(dir: &tempfile::TempDir) -> Store {
        let path = dir.path().join("koshdb");
        Store::open(path, &mut |_: &str| Ok("pw".to_string())).unwrap()
    }

    #[test]
    fn translate_case_normalizes_known_fields() {
        assert_eq!(translate_case("USERNAME"), "Username");
        assert_eq!(translate_case("url"), "URL");
        assert_eq!(translate_case("Shoe Size"), "Shoe Size");
    }

    #[test]
    fn import_rejects_empty_name_and_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open_store(&dir);
        let row = vec![
            ("name".to_string(), "site".to_string()),
            ("password".to_string(), "p".to_string()),
        ];
        assert!(import_entry(&mut store, &row).unwrap());
        assert!(!import_entry(&mut store, &row).unwrap());
        assert!(!import_entry(&mut store, &[("Password".to_string(), "p".to_string())]).unwrap());
        assert_eq!(store.get("site").unwrap().get("Password"), Some("p"));
    }

    #[test]
    fn import_csv_with_header_row() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open_store(&dir);
        let csv_path = dir.path().join("dump.csv");
        let mut f = std::fs::File::create(&csv_path).unwrap();
        writeln!(f, "name,username,password").unwrap();
        writeln!(f, "alpha,a,one").unwrap();
        writeln!(f, "beta,b,two").unwrap();
        writeln!(f, ",c,three").unwrap();
        drop(f);

        let outcome = import_csv(&mut store, &csv_path, None).unwrap();
        assert_eq!(outcome, ImportOutcome { imported: 2, skipped: 1 });
        assert_eq!(store.get("alpha").unwrap().get("Username"), Some("a"));
        assert_eq!(store.get("beta").unwrap().get("Password"), Some("two"));
    }

    #[test]
    fn same_name_rows_chain_as_history() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open_store(&dir);
        let row1 = vec![
            ("name".to_string(), "site".to_string()),
            ("password".to_string(), "old".to_string()),
        ];
        let row2 = vec![
            ("name".to_string(), "site".to_string()),
            ("password".to_string(), "new".to_string()),
        ];
        assert!(import_entry(&mut store, &row1).unwrap());
        assert!(import_entry(&mut store, &row2).unwrap());
        assert_eq!(store.get("site").unwrap().get("Password"), Some("new"));
        assert_eq!(store.history().count(), 1);
    }
}
