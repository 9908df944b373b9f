// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! The on-disk store: a single append-only file of wrapped master keys and
//! encrypted records, opened under an exclusive advisory lock and rewritten
//! atomically.
//!
//! File format: the literal header `K05Hv0 UNSTABLE\n`, then lines. `k:` is a
//! wrapped master key, `p:` an encrypted record; anything else passes through
//! bytewise so files written by newer versions stay loadable.

use crate::crypto::{KEY_PREFIX, MasterKey};
use crate::error::{Error, Result};
use crate::record::{ENTRY_PREFIX, META_RENAMED_FROM, Record, RecordId};
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

#[cfg(unix)]
use nix::fcntl::{Flock, FlockArg};

/// Magic header; unknown magic is refused.
pub const FILE_HEADER: &[u8] = b"K05Hv0 UNSTABLE\n";

/// Passphrase source. The store never reads the terminal itself; the UI
/// resolves cancellation internally and surfaces it as [`Error::Canceled`].
pub trait Prompter {
    fn passphrase(&mut self, prompt: &str) -> Result<String>;
}

impl<F> Prompter for F
where
    F: FnMut(&str) -> Result<String>,
{
    fn passphrase(&mut self, prompt: &str) -> Result<String> {
        self(prompt)
    }
}

/// One slot in the rewrite walk: either an opaque passthrough line or a
/// handle to a master key / record that gets re-encoded on save.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Line {
    Passthrough(Vec<u8>),
    Key(usize),
    Entry(RecordId),
}

/// The password database.
///
/// Records live in an arena (`records`); the index maps each visible name to
/// its current revision, `history` holds superseded revisions and deletion
/// tombstones, and `older`/`newer` links inside [`Record`] keep each chain
/// navigable in both directions.
pub struct Store {
    path: PathBuf,
    master_keys: Vec<MasterKey>,
    records: Vec<Record>,
    index: HashMap<String, RecordId>,
    history: Vec<RecordId>,
    lines: Vec<Line>,
    #[cfg(unix)]
    lock: Option<Flock<File>>,
}

impl Store {
    /// Open an existing database or create a new one.
    ///
    /// Creation prompts for a passphrase twice until both entries match, then
    /// writes a file holding a single freshly generated master key.
    pub fn open(path: impl Into<PathBuf>, prompter: &mut dyn Prompter) -> Result<Self> {
        let path = path.into();
        if path.is_file() {
            Self::open_existing(path, prompter)
        } else {
            Self::create(path, prompter)
        }
    }

    fn create(path: PathBuf, prompter: &mut dyn Prompter) -> Result<Self> {
        let mut msg = "New Password Database\nEnter passphrase:";
        let passphrase = loop {
            let first = prompter.passphrase(msg)?;
            if prompter.passphrase("Confirm passphrase:")? == first {
                break first;
            }
            msg = "Passphrases do not match!\n\nNew Password Database\nEnter passphrase:";
        };

        let mut store = Self {
            path,
            master_keys: vec![MasterKey::generate(&passphrase)],
            records: Vec::new(),
            index: HashMap::new(),
            history: Vec::new(),
            lines: vec![Line::Key(0)],
            #[cfg(unix)]
            lock: None,
        };
        store.save()?;
        store.acquire_lock()?;
        Ok(store)
    }

    fn open_existing(path: PathBuf, prompter: &mut dyn Prompter) -> Result<Self> {
        let mut store = Self {
            path,
            master_keys: Vec::new(),
            records: Vec::new(),
            index: HashMap::new(),
            history: Vec::new(),
            lines: Vec::new(),
            #[cfg(unix)]
            lock: None,
        };
        store.acquire_lock()?;
        store.load(prompter)?;
        Ok(store)
    }

    #[cfg(unix)]
    fn acquire_lock(&mut self) -> Result<()> {
        let file = File::open(&self.path)?;
        let lock = Flock::lock(file, FlockArg::LockExclusiveNonblock)
            .map_err(|_| Error::FileLocked(self.path.clone()))?;
        self.lock = Some(lock);
        Ok(())
    }

    #[cfg(not(unix))]
    fn acquire_lock(&mut self) -> Result<()> {
        tracing::warn!("advisory locking is not supported on this platform");
        Ok(())
    }

    fn read_file(&self) -> Result<Vec<u8>> {
        #[cfg(unix)]
        {
            let mut file: &File = self.lock.as_ref().expect("lock acquired before load");
            let mut data = Vec::new();
            file.read_to_end(&mut data)?;
            Ok(data)
        }
        #[cfg(not(unix))]
        {
            Ok(std::fs::read(&self.path)?)
        }
    }

    fn load(&mut self, prompter: &mut dyn Prompter) -> Result<()> {
        let data = self.read_file()?;
        if !data.starts_with(FILE_HEADER) {
            return Err(Error::UnrecognisedHeader);
        }

        let mut passphrases: Vec<String> = vec![prompter.passphrase("Enter passphrase:")?];

        let mut segments: Vec<&[u8]> = data[FILE_HEADER.len()..].split(|&b| b == b'\n').collect();
        if segments.last() == Some(&&b""[..]) {
            segments.pop();
        }
        for line in segments {
            if line.starts_with(KEY_PREFIX.as_bytes()) {
                let text = std::str::from_utf8(line)
                    .map_err(|_| Error::MalformedBlob("non-utf8 key line".into()))?;
                let (key, passphrase) =
                    self.unlock_master_key(self.master_keys.len(), text, &passphrases, prompter)?;
                if !passphrases.contains(&passphrase) {
                    passphrases.push(passphrase);
                }
                self.lines.push(Line::Key(self.master_keys.len()));
                self.master_keys.push(key);
            } else if line.starts_with(ENTRY_PREFIX.as_bytes()) {
                let text = std::str::from_utf8(line)
                    .map_err(|_| Error::MalformedBlob("non-utf8 record line".into()))?;
                let record = self.decode_entry(text)?;
                self.resolve(record);
            } else {
                self.lines.push(Line::Passthrough(line.to_vec()));
            }
        }
        Ok(())
    }

    /// Try every passphrase seen so far against a `k:` line, then fall back
    /// to prompting for that specific key slot until it unlocks.
    fn unlock_master_key(
        &self,
        idx: usize,
        line: &str,
        known: &[String],
        prompter: &mut dyn Prompter,
    ) -> Result<(MasterKey, String)> {
        for passphrase in known {
            match MasterKey::unwrap(line, passphrase) {
                Ok(key) => return Ok((key, passphrase.clone())),
                Err(Error::ChecksumFailure) => continue,
                Err(e) => return Err(e),
            }
        }
        loop {
            let passphrase = prompter.passphrase(&format!(
                "Passphrase error\nEnter master passphrase for key {}:",
                idx + 1
            ))?;
            match MasterKey::unwrap(line, &passphrase) {
                Ok(key) => return Ok((key, passphrase)),
                Err(Error::ChecksumFailure) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Find the key that owns a `p:` line: the first whose checksum holds.
    //
    // A future multi-user mode may demote the no-key-claims case to a
    // warning; for now it is fatal.
    fn decode_entry(&self, line: &str) -> Result<Record> {
        for (i, key) in self.master_keys.iter().enumerate() {
            match Record::decode(line, key, i) {
                Ok(record) => return Ok(record),
                Err(Error::ChecksumFailure) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(Error::ChecksumFailure)
    }

    fn now() -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
    }

    fn ts(&self, id: RecordId) -> u64 {
        self.records[id].timestamp().unwrap_or(0)
    }

    /// Merge a record into the index/history, maintaining the history chain.
    ///
    /// Returns the arena id, or `None` when the record equals the current
    /// revision under its previous name (a no-op: nothing is appended).
    fn resolve(&mut self, mut record: Record) -> Option<RecordId> {
        // RenamedFrom pointing at the record's own name carries no
        // information; strip it before comparison.
        let oldname = match record.get_meta(META_RENAMED_FROM) {
            Some(from) if from != record.name() => from.to_string(),
            Some(_) => {
                record.meta_remove_internal(META_RENAMED_FROM);
                record.name().to_string()
            }
            None => record.name().to_string(),
        };

        if let Some(&current) = self.index.get(&oldname) {
            if self.records[current] == record {
                tracing::debug!(name = record.name(), "duplicate revision, no-op");
                return None;
            }
        }

        let id = self.records.len();
        self.records.push(record);
        self.lines.push(Line::Entry(id));

        let head = match self.index.get(&oldname).copied() {
            Some(current) => {
                self.index.remove(&oldname);
                let head = self.link_into_chain(current, id);
                let demoted = if head == id { current } else { id };
                self.history.push(demoted);
                head
            }
            None => id,
        };

        if self.records[head].is_deleted() {
            self.history.push(head);
        } else {
            // A rename whose revision loses the timestamp race keeps the
            // current head visible under the head's own name.
            let head_name = self.records[head].name().to_string();
            self.index.insert(head_name, head);
        }
        Some(id)
    }

    /// Insert `incoming` into the chain ending at `head`, keeping each linked
    /// pair mutually consistent and timestamp-monotone. Returns the new head.
    fn link_into_chain(&mut self, head: RecordId, incoming: RecordId) -> RecordId {
        if self.ts(incoming) >= self.ts(head) {
            self.records[incoming].older = Some(head);
            self.records[head].newer = Some(incoming);
            return incoming;
        }
        // Walk down until the node below is no newer than the incoming one.
        let mut above = head;
        loop {
            match self.records[above].older {
                Some(below) if self.ts(below) > self.ts(incoming) => above = below,
                below => {
                    self.records[incoming].older = below;
                    self.records[incoming].newer = Some(above);
                    if let Some(below) = below {
                        self.records[below].newer = Some(incoming);
                    }
                    self.records[above].older = Some(incoming);
                    return head;
                }
            }
        }
    }

    /// Commit a record: assign its timestamp (frozen thereafter), merge, and
    /// append to the rewrite plan. Persist with [`save`].
    ///
    /// [`save`]: Store::save
    pub fn insert(&mut self, mut record: Record) -> Result<()> {
        if record.name().is_empty() {
            return Err(Error::EmptyName);
        }
        record.freeze(Self::now());
        self.resolve(record);
        Ok(())
    }

    /// Delete an entry by committing a tombstone clone.
    pub fn delete(&mut self, name: &str) -> Result<()> {
        let id = *self.index.get(name).ok_or_else(|| Error::NoSuchEntry(name.into()))?;
        self.insert(self.records[id].tombstone())
    }

    /// Rename an entry via a `RenamedFrom` clone.
    pub fn rename(&mut self, old: &str, new: &str) -> Result<()> {
        let id = *self.index.get(old).ok_or_else(|| Error::NoSuchEntry(old.into()))?;
        self.insert(self.records[id].clone_renamed(new))
    }

    /// Current revision for a visible name.
    pub fn get(&self, name: &str) -> Option<&Record> {
        self.index.get(name).map(|&id| &self.records[id])
    }

    pub fn get_id(&self, name: &str) -> Option<RecordId> {
        self.index.get(name).copied()
    }

    pub fn record(&self, id: RecordId) -> &Record {
        &self.records[id]
    }

    pub fn older_of(&self, id: RecordId) -> Option<RecordId> {
        self.records[id].older
    }

    pub fn newer_of(&self, id: RecordId) -> Option<RecordId> {
        self.records[id].newer
    }

    /// Visible names, sorted for display.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.index.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Superseded revisions and tombstones.
    pub fn history(&self) -> impl Iterator<Item = &Record> {
        self.history.iter().map(|&id| &self.records[id])
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn master_key_count(&self) -> usize {
        self.master_keys.len()
    }

    /// The key new records are encrypted under by default.
    pub fn default_key(&self) -> &MasterKey {
        &self.master_keys[0]
    }

    /// Append a fresh master key wrapped under its own passphrase.
    pub fn add_master_key(&mut self, passphrase: &str) -> usize {
        let idx = self.master_keys.len();
        self.master_keys.push(MasterKey::generate(passphrase));
        self.lines.push(Line::Key(idx));
        idx
    }

    /// Re-wrap a key under a new passphrase. Record blobs are untouched.
    pub fn change_passphrase(&mut self, key: usize, new_passphrase: &str) -> Result<()> {
        self.master_keys[key].rewrap(new_passphrase)
    }

    /// Expire every in-memory key. Typically fired by a UI inactivity timer;
    /// later operations fail with `KeyExpired` until re-unlocked.
    pub fn expire_all(&mut self) {
        for key in &mut self.master_keys {
            key.expire();
        }
    }

    /// Recover an expired key from its wrapped form.
    pub fn unlock_key(&mut self, key: usize, passphrase: &str) -> Result<()> {
        self.master_keys[key].unlock(passphrase)
    }

    /// Atomic rewrite: re-encode everything into a temp file in the same
    /// directory, rename the old file to `<path>~`, rename the temp file into
    /// place. A bookkeeping mismatch between the line walk and the live set
    /// is reported as [`Error::Bug`] only after the file is safely on disk;
    /// the appended data is not lost.
    pub fn save(&mut self) -> Result<()> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;

        let mut entries: HashSet<Line> = (0..self.master_keys.len())
            .map(Line::Key)
            .chain(self.index.values().map(|&id| Line::Entry(id)))
            .chain(self.history.iter().map(|&id| Line::Entry(id)))
            .collect();
        let mut bug = false;

        tmp.write_all(FILE_HEADER)?;
        for line in &self.lines {
            match line {
                Line::Passthrough(raw) => {
                    tmp.write_all(raw)?;
                    tmp.write_all(b"\n")?;
                }
                handle => {
                    if !entries.remove(handle) {
                        tracing::warn!(?handle, "stale handle in line walk");
                        bug = true;
                        continue;
                    }
                    let encoded = self.encode_handle(handle)?;
                    tmp.write_all(encoded.as_bytes())?;
                    tmp.write_all(b"\n")?;
                }
            }
        }

        if !entries.is_empty() {
            bug = true;
            tracing::warn!(count = entries.len(), "entries missed by the line walk");
            for handle in &entries {
                let encoded = self.encode_handle(handle)?;
                tmp.write_all(b"# WARNING: entry was missing from the rewrite plan\n")?;
                tmp.write_all(encoded.as_bytes())?;
                tmp.write_all(b"\n# WARNING: end of recovered entry\n")?;
            }
        }

        tmp.as_file().sync_all()?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut permissions = tmp.as_file().metadata()?.permissions();
            permissions.set_mode(0o600);
            tmp.as_file().set_permissions(permissions)?;
        }

        if self.path.exists() {
            let mut backup = self.path.clone().into_os_string();
            backup.push("~");
            std::fs::rename(&self.path, &backup)?;
        }
        tmp.persist(&self.path).map_err(|e| Error::Io(e.error))?;

        if bug {
            return Err(Error::Bug(
                "line walk did not match the live entry set; file written with recovery markers"
                    .into(),
            ));
        }
        Ok(())
    }

    fn encode_handle(&self, handle: &Line) -> Result<String> {
        match handle {
            Line::Key(i) => Ok(self.master_keys[*i].encoded()),
            Line::Entry(id) => {
                let record = &self.records[*id];
                record.encode(&self.master_keys[record.owning_key])
            }
            Line::Passthrough(_) => unreachable!("passthrough lines are written verbatim"),
        }
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        // Closing the store must leave no key material in memory.
        self.expire_all();
    }
}
