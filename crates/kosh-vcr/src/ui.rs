// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! The interactive boundary: prompts stay in the UI layer, the engine only
//! sees answers (or [`Error::Canceled`] when the user gave up).

use crate::error::{Error, Result};

/// User interaction needed while recording (and, for lazily filled
/// credentials, during replay).
pub trait Ui {
    fn prompt(&mut self, msg: &str) -> Result<String>;
    fn prompt_secret(&mut self, msg: &str) -> Result<String>;
    fn message(&mut self, text: &str);
}

/// Narrow a candidate list to a single item by asking for substrings.
///
/// The user types a substring; candidates are filtered case-insensitively
/// and the prompt repeats until exactly one remains. A filter that matches
/// nothing resets to the previous candidate set.
pub fn select_one<'a, T>(
    ui: &mut dyn Ui,
    what: &str,
    items: &'a [(String, T)],
) -> Result<&'a (String, T)> {
    if items.is_empty() {
        return Err(Error::ReplayFailure(format!("no {what} on this page")));
    }
    let mut candidates: Vec<&(String, T)> = items.iter().collect();
    loop {
        if candidates.len() == 1 {
            return Ok(candidates[0]);
        }
        for (i, (label, _)) in candidates.iter().enumerate() {
            ui.message(&format!("  {}: {}", i + 1, label));
        }
        let filter = ui.prompt(&format!("Match {what} by substring:"))?;
        let filter = filter.to_lowercase();
        let narrowed: Vec<&(String, T)> = candidates
            .iter()
            .copied()
            .filter(|(label, _)| label.to_lowercase().contains(&filter))
            .collect();
        if narrowed.is_empty() {
            ui.message("No candidate matches that; try again.");
        } else {
            candidates = narrowed;
        }
    }
}

/// Replay-side resolution: the recorded literal must match exactly one
/// candidate, else the script cannot be reproduced.
pub fn exact_one<'a, T>(items: &'a [(String, T)], literal: &str, what: &str) -> Result<&'a T> {
    let mut matches = items.iter().filter(|(label, _)| label == literal);
    match (matches.next(), matches.next()) {
        (Some((_, item)), None) => Ok(item),
        (None, _) => Err(Error::ReplayFailure(format!(
            "no {what} matching {literal:?}"
        ))),
        (Some(_), Some(_)) => Err(Error::ReplayFailure(format!(
            "multiple {what} matching {literal:?}"
        ))),
    }
}

/// Test utilities for driving the engine without a terminal.
pub mod testing {
    use super::*;

    /// A [`Ui`] that answers prompts from a fixed script and records every
    /// message; prompts past the end of the script cancel.
    pub struct ScriptedUi {
        answers: Vec<String>,
        pub messages: Vec<String>,
    }

    impl ScriptedUi {
        pub fn new(answers: &[&str]) -> Self {
            Self {
                answers: answers.iter().rev().map(|s| s.to_string()).collect(),
                messages: Vec::new(),
            }
        }
    }

    impl Ui for ScriptedUi {
        fn prompt(&mut self, _msg: &str) -> Result<String> {
            self.answers.pop().ok_or(Error::Canceled)
        }
        fn prompt_secret(&mut self, msg: &str) -> Result<String> {
            self.prompt(msg)
        }
        fn message(&mut self, text: &str) {
            self.messages.push(text.to_string());
        }
    }
}
