// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use kosh_cli::terminal::{TtyPrompter, TtyUi, confirmed_passphrase};
use kosh_cli::{DEFAULT_DB, expand_tilde};
use kosh_db::{Record, Store};
use kosh_logging::CliLoggingArgs;
use kosh_vcr::{ActionRegistry, Credentials, Session, script};

#[derive(Parser)]
#[command(name = "kosh", version, about = "Terminal password manager")]
struct Cli {
    /// Password database path
    #[arg(short = 'd', long = "database", default_value = DEFAULT_DB, global = true)]
    database: String,

    #[command(flatten)]
    logging: CliLoggingArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List entry names
    List,
    /// Print an entry's fields
    Show { name: String },
    /// Create or update an entry from field=value pairs
    Add {
        name: String,
        /// field=value pairs, e.g. Username=alice Password=hunter2
        fields: Vec<String>,
    },
    /// Rename an entry, keeping its history
    Rename { old: String, new: String },
    /// Delete an entry (a tombstone stays in history)
    Delete { name: String },
    /// Show the revision history of an entry
    History { name: String },
    /// Import entries from a CSV file
    Import {
        file: String,
        /// Column names overriding the CSV header row
        headers: Vec<String>,
    },
    /// Change the passphrase of a master key
    Passwd {
        /// Key slot to re-wrap
        #[arg(long, default_value_t = 0)]
        key: usize,
    },
    /// Add an additional master key under its own passphrase
    AddKey,
    /// Rotate an entry's password by replaying a recorded script
    Rotate {
        name: String,
        /// base64 action script recorded with kosh-rotate
        script: String,
        /// New password (prompted when omitted)
        #[arg(long)]
        new_password: Option<String>,
    },
}

/// A bookkeeping `Bug` during rewrite is logged, not fatal: the file was
/// written with recovery markers and no data was lost.
fn save(store: &mut Store) -> Result<()> {
    match store.save() {
        Ok(()) => Ok(()),
        Err(kosh_db::Error::Bug(msg)) => {
            tracing::warn!(%msg, "database rewrite flagged an internal inconsistency");
            eprintln!("warning: {msg}");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    cli.logging.clone().init("kosh")?;

    let path = expand_tilde(&cli.database);
    let mut prompter = TtyPrompter;
    let mut store = Store::open(path, &mut prompter).context("opening password database")?;

    match cli.command {
        Commands::List => {
            for name in store.names() {
                println!("{name}");
            }
        }
        Commands::Show { name } => {
            let record = store
                .get(&name)
                .with_context(|| format!("no entry named {name:?}"))?;
            for (field, value) in record.iter_fields() {
                println!("{field}: {value}");
            }
        }
        Commands::Add { name, fields } => {
            let mut record = match store.get(&name) {
                Some(existing) => existing.clone_for_edit(),
                None => Record::new(&name),
            };
            for pair in &fields {
                let Some((field, value)) = pair.split_once('=') else {
                    bail!("field {pair:?} is not a field=value pair");
                };
                record.set_field(field, value);
            }
            store.insert(record)?;
            save(&mut store)?;
        }
        Commands::Rename { old, new } => {
            store.rename(&old, &new)?;
            save(&mut store)?;
        }
        Commands::Delete { name } => {
            store.delete(&name)?;
            save(&mut store)?;
        }
        Commands::History { name } => {
            let mut id = store
                .get_id(&name)
                .with_context(|| format!("no entry named {name:?}"))?;
            loop {
                let record = store.record(id);
                let ts = record.timestamp().unwrap_or(0);
                let deleted = if record.is_deleted() { " (deleted)" } else { "" };
                println!("{ts}  {}{deleted}", record.name());
                match store.older_of(id) {
                    Some(older) => id = older,
                    None => break,
                }
            }
        }
        Commands::Import { file, headers } => {
            let headers = if headers.is_empty() { None } else { Some(headers) };
            let outcome = kosh_db::import_csv(&mut store, &file, headers)?;
            save(&mut store)?;
            println!("imported {}, skipped {}", outcome.imported, outcome.skipped);
        }
        Commands::Passwd { key } => {
            if key >= store.master_key_count() {
                bail!("no master key in slot {key}");
            }
            let new = confirmed_passphrase("New passphrase:")?;
            store.change_passphrase(key, &new)?;
            save(&mut store)?;
        }
        Commands::AddKey => {
            let passphrase = confirmed_passphrase("Passphrase for the new key:")?;
            store.add_master_key(&passphrase);
            save(&mut store)?;
        }
        Commands::Rotate { name, script: blob, new_password } => {
            rotate(&mut store, &name, &blob, new_password)?;
        }
    }
    Ok(())
}

/// Drive a recorded rotation script with credentials drawn from the store,
/// then commit the new password on success.
fn rotate(store: &mut Store, name: &str, blob: &str, new_password: Option<String>) -> Result<()> {
    let record = store
        .get(name)
        .with_context(|| format!("no entry named {name:?}"))?;
    let user_field = ["Username", "login"].iter().find(|f| record.get(f).is_some());
    let pass_field = ["Password", "passwd"]
        .iter()
        .find(|f| record.get(f).is_some())
        .copied()
        .unwrap_or("Password");

    let newpass = match new_password {
        Some(p) => p,
        None => confirmed_passphrase("New password:")?,
    };
    let creds = Credentials {
        username: user_field.and_then(|f| record.get(f)).map(str::to_string),
        oldpass: record.get(pass_field).map(str::to_string),
        newpass: Some(newpass.clone()),
    };

    let steps = script::decode(blob)?;
    let registry = ActionRegistry::standard();
    let mut session = Session::new(creds)?;
    let mut ui = TtyUi;
    session.replay(&registry, &mut ui, &steps).context("replaying rotation script")?;

    let mut updated = record.clone_for_edit();
    updated.set_field(pass_field, newpass);
    store.insert(updated)?;
    save(store)?;
    println!("rotated password for {name}");
    Ok(())
}
