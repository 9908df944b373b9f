// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Terminal implementations of the interactive boundaries. Passphrases and
//! passwords never echo; EOF on any prompt is a cancellation, not an error.

use std::io::{BufRead, Write};

/// Passphrase prompts for opening and managing the store.
pub struct TtyPrompter;

impl kosh_db::Prompter for TtyPrompter {
    fn passphrase(&mut self, prompt: &str) -> kosh_db::Result<String> {
        match rpassword::prompt_password(format!("{prompt} ")) {
            Ok(pass) => Ok(pass),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                Err(kosh_db::Error::Canceled)
            }
            Err(e) => Err(kosh_db::Error::Io(e)),
        }
    }
}

/// Prompt twice until both entries match; used when setting a new
/// passphrase outside the store's own creation flow.
pub fn confirmed_passphrase(prompt: &str) -> kosh_db::Result<String> {
    use kosh_db::Prompter;
    let mut tty = TtyPrompter;
    loop {
        let first = tty.passphrase(prompt)?;
        if tty.passphrase("Confirm passphrase:")? == first {
            return Ok(first);
        }
        eprintln!("Passphrases do not match!");
    }
}

/// Interactive driver for URL-VCR sessions.
pub struct TtyUi;

impl kosh_vcr::Ui for TtyUi {
    fn prompt(&mut self, msg: &str) -> kosh_vcr::Result<String> {
        eprint!("{msg} ");
        std::io::stderr().flush()?;
        let mut line = String::new();
        if std::io::stdin().lock().read_line(&mut line)? == 0 {
            return Err(kosh_vcr::Error::Canceled);
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    fn prompt_secret(&mut self, msg: &str) -> kosh_vcr::Result<String> {
        match rpassword::prompt_password(format!("{msg} ")) {
            Ok(secret) => Ok(secret),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                Err(kosh_vcr::Error::Canceled)
            }
            Err(e) => Err(kosh_vcr::Error::Io(e)),
        }
    }

    fn message(&mut self, text: &str) {
        eprintln!("{text}");
    }
}
