// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! URL-VCR: record and replay the browser steps that rotate a password on a
//! remote web form.
//!
//! A session owns a credential triple and a chain of navigation states.
//! Recording captures user-selected actions (navigate, follow link, fill
//! form, basic auth, ...) as `[code, params]` steps; replay applies a
//! serialized step sequence against the live site, rolling back and failing
//! the moment the site no longer matches the recording.

pub mod actions;
pub mod error;
pub mod forms;
pub mod script;
pub mod session;
pub mod state;
pub mod ui;

pub use actions::{Action, ActionRegistry};
pub use error::{Error, Result};
pub use script::Step;
pub use session::{Credentials, Session, TIMEOUT, TRIES, default_user_agent};
pub use state::{AuthHandler, CredSpec, RefererOverride, ResponseInfo, StateNode};
pub use ui::Ui;
