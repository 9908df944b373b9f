// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! The session: a credential triple, the navigation state chain, and the
//! request pipeline with retries and transparent meta-refresh.

use crate::actions::ActionRegistry;
use crate::error::{Error, Result};
use crate::forms;
use crate::script::Step;
use crate::state::{CredSpec, RefererOverride, ResponseInfo, StateNode};
use crate::ui::Ui;
use reqwest::blocking::Client;
use reqwest::{Method, StatusCode, header};
use serde_json::Value;
use std::time::Duration;
use url::Url;

/// Attempts per request, shared between transport retries and body re-reads.
pub const TRIES: usize = 5;
/// Per-attempt timeout.
pub const TIMEOUT: Duration = Duration::from_secs(10);
/// Meta refreshes followed transparently before giving up on a loop.
const MAX_REFRESH_HOPS: usize = 5;

pub fn default_user_agent() -> String {
    format!("kosh {}", env!("CARGO_PKG_VERSION"))
}

/// The credential triple a rotation works with. Each slot fills lazily: the
/// first action that needs one prompts for it and the answer is cached for
/// the rest of the session.
#[derive(Debug, Default, Clone)]
pub struct Credentials {
    pub username: Option<String>,
    pub oldpass: Option<String>,
    pub newpass: Option<String>,
}

/// A recording/replaying navigation session.
pub struct Session {
    client: Client,
    states: Vec<StateNode>,
    creds: Credentials,
    script: Vec<Step>,
}

impl Session {
    /// Build a session. The cookie jar lives in the client and is shared
    /// along the whole state chain. TLS version negotiation is left entirely
    /// to rustls; peers that mishandle it are not worked around here.
    pub fn new(creds: Credentials) -> Result<Self> {
        let client = Client::builder()
            .cookie_store(true)
            .timeout(TIMEOUT)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;
        Ok(Self {
            client,
            states: vec![StateNode::root()],
            creds,
            script: Vec::new(),
        })
    }

    pub fn states(&self) -> &[StateNode] {
        &self.states
    }

    pub fn current(&self) -> &StateNode {
        self.states.last().expect("root always present")
    }

    pub fn current_mut(&mut self) -> &mut StateNode {
        self.states.last_mut().expect("root always present")
    }

    pub fn current_url(&self) -> Result<Url> {
        self.current()
            .url
            .clone()
            .ok_or_else(|| Error::ReplayFailure("no page loaded yet".into()))
    }

    pub fn body_html(&self) -> Result<String> {
        if self.current().body.is_none() {
            return Err(Error::ReplayFailure("no page loaded yet".into()));
        }
        Ok(self.current().body_text())
    }

    pub fn credentials(&self) -> &Credentials {
        &self.creds
    }

    pub fn credentials_mut(&mut self) -> &mut Credentials {
        &mut self.creds
    }

    /// Actions successfully applied so far, in order.
    pub fn script(&self) -> &[Step] {
        &self.script
    }

    pub(crate) fn push(&mut self, code: char, params: Value) {
        let child = self.current().child(code, params);
        self.states.push(child);
    }

    pub(crate) fn pop(&mut self) {
        if self.states.len() > 1 {
            self.states.pop();
        }
    }

    pub fn undo(&mut self) -> Result<()> {
        if self.states.len() <= 1 {
            return Err(Error::ReplayFailure("nothing to undo".into()));
        }
        self.states.pop();
        Ok(())
    }

    /// Substitute live credential values with sentinels. Every transcript
    /// line and user-visible error must pass through here; secrets never
    /// reach logs or messages.
    pub fn redact(&self, text: &str) -> String {
        kosh_logging::redact_secrets(
            text,
            &[
                ("<username>", self.creds.username.as_deref()),
                ("<oldpass>", self.creds.oldpass.as_deref()),
                ("<newpass>", self.creds.newpass.as_deref()),
            ],
        )
    }

    pub(crate) fn resolve_cred(&mut self, ui: &mut dyn Ui, spec: &CredSpec) -> Result<String> {
        fn fill(
            slot: &mut Option<String>,
            ui: &mut dyn Ui,
            prompt: &str,
            secret: bool,
        ) -> Result<String> {
            if slot.is_none() {
                let value = if secret { ui.prompt_secret(prompt)? } else { ui.prompt(prompt)? };
                *slot = Some(value);
            }
            Ok(slot.clone().expect("just filled"))
        }
        match spec {
            CredSpec::Literal(lit) => Ok(lit.clone()),
            CredSpec::Username => fill(&mut self.creds.username, ui, "Username:", false),
            CredSpec::OldPass => fill(&mut self.creds.oldpass, ui, "Old password:", true),
            CredSpec::NewPass => fill(&mut self.creds.newpass, ui, "New password:", true),
        }
    }

    pub(crate) fn load_fixture(&mut self, path: &str) -> Result<()> {
        let body = std::fs::read(path)?;
        let url = Url::from_file_path(std::fs::canonicalize(path)?)
            .map_err(|_| Error::ReplayFailure(format!("cannot derive a URL for {path:?}")))?;
        let node = self.current_mut();
        node.url = Some(url);
        node.info = Some(ResponseInfo { status: 200, headers: Vec::new() });
        node.body = Some(body);
        Ok(())
    }

    /// Issue a request from the current node, filling it with the response.
    ///
    /// Referer comes from the node's override, else from the previous page
    /// when the action opts in. Meta refreshes are followed transparently
    /// (not recorded as actions), bounded by a hop limit.
    pub(crate) fn request(
        &mut self,
        ui: &mut dyn Ui,
        url: Url,
        method: Method,
        form: Option<Vec<(String, String)>>,
        use_referer: bool,
    ) -> Result<()> {
        let mut referer = match &self.current().referer {
            RefererOverride::Fixed(fixed) => Some(fixed.clone()),
            RefererOverride::Suppress => None,
            RefererOverride::Inherit => {
                let n = self.states.len();
                if use_referer && n >= 2 { self.states[n - 2].url.clone() } else { None }
            }
        };

        let mut url = url;
        let mut method = method;
        let mut form = form;
        for hop in 0..=MAX_REFRESH_HOPS {
            let (final_url, info, body) =
                self.fetch(ui, url, method, form.as_deref(), referer.as_ref())?;
            let node = self.current_mut();
            node.url = Some(final_url.clone());
            node.info = Some(info);
            node.body = Some(body);

            match forms::meta_refresh(&self.current().body_text()) {
                Some(target) if hop < MAX_REFRESH_HOPS => {
                    let next = final_url.join(&target)?;
                    tracing::debug!(to = %self.redact(next.as_str()), "following meta refresh");
                    referer = Some(final_url);
                    url = next;
                    method = Method::GET;
                    form = None;
                }
                Some(_) => {
                    tracing::warn!("meta refresh hop limit reached");
                    break;
                }
                None => break,
            }
        }
        Ok(())
    }

    /// One page fetch with up to [`TRIES`] attempts.
    ///
    /// Transport errors and mid-read body failures retry; HTTP status
    /// failures never do. A 401 is terminal but non-fatal (returned as the
    /// response) so a basic-auth action can follow it.
    fn fetch(
        &mut self,
        ui: &mut dyn Ui,
        url: Url,
        method: Method,
        form: Option<&[(String, String)]>,
        referer: Option<&Url>,
    ) -> Result<(Url, ResponseInfo, Vec<u8>)> {
        let auth = match self.current().handlers.iter().rev().find(|h| h.covers(&url)).cloned() {
            Some(handler) => Some((
                self.resolve_cred(ui, &handler.user)?,
                self.resolve_cred(ui, &handler.pass)?,
            )),
            None => None,
        };
        let user_agent =
            self.current().user_agent.clone().unwrap_or_else(default_user_agent);

        let mut url = url;
        if method == Method::GET {
            if let Some(pairs) = form {
                url.query_pairs_mut()
                    .extend_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())));
            }
        }

        tracing::info!(%method, url = %self.redact(url.as_str()), "request");
        let mut last_error: Option<Error> = None;
        for attempt in 1..=TRIES {
            let mut request = self
                .client
                .request(method.clone(), url.clone())
                .header(header::USER_AGENT, &user_agent);
            if let Some(referer) = referer {
                request = request.header(header::REFERER, referer.as_str());
            }
            if let Some((user, pass)) = &auth {
                request = request.basic_auth(user, Some(pass));
            }
            if method == Method::POST {
                if let Some(pairs) = form {
                    request = request.form(&pairs);
                }
            }

            match request.send() {
                Ok(response) => {
                    let status = response.status();
                    if status == StatusCode::UNAUTHORIZED {
                        let final_url = response.url().clone();
                        let info = response_info(&response);
                        let body = response.bytes().map(|b| b.to_vec()).unwrap_or_default();
                        tracing::info!(status = 401, "authentication required");
                        return Ok((final_url, info, body));
                    }
                    if status.is_client_error() || status.is_server_error() {
                        return Err(Error::ReplayFailure(format!(
                            "HTTP {status} for {}",
                            self.redact(url.as_str())
                        )));
                    }
                    let final_url = response.url().clone();
                    let info = response_info(&response);
                    match response.bytes() {
                        Ok(bytes) => {
                            tracing::info!(status = info.status, bytes = bytes.len(), "response");
                            return Ok((final_url, info, bytes.to_vec()));
                        }
                        Err(e) => {
                            tracing::warn!(attempt, error = %self.redact(&e.to_string()), "body read failed");
                            last_error = Some(e.into());
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %self.redact(&e.to_string()), "transport error");
                    last_error = Some(e.into());
                }
            }
        }
        Err(last_error.unwrap_or_else(|| Error::ReplayFailure("request failed".into())))
    }

    /// Apply one action: push a state node when the action changes state,
    /// roll it back on failure, and append to the recorded script on
    /// success. Returns `false` when the session is over (`q`).
    pub fn perform(
        &mut self,
        registry: &ActionRegistry,
        ui: &mut dyn Ui,
        code: char,
        params: Value,
    ) -> Result<bool> {
        let action = registry.get(code).ok_or(Error::UnknownAction(code))?;
        let pushed = action.changes_state();
        if pushed {
            self.push(code, params.clone());
        }
        match action.apply(ui, self, &params) {
            Ok(()) => {
                self.script.push((code, params));
                Ok(code != 'q')
            }
            Err(e) => {
                if pushed {
                    self.pop();
                }
                Err(self.as_replay_failure(e))
            }
        }
    }

    /// Transport and URL-resolution failures on an action become
    /// `ReplayFailure` once the rollback has happened.
    fn as_replay_failure(&self, e: Error) -> Error {
        match e {
            Error::Transport(t) => {
                Error::ReplayFailure(self.redact(&format!("transport failure: {t}")))
            }
            Error::Url(u) => Error::ReplayFailure(format!("bad URL: {u}")),
            other => other,
        }
    }

    /// Replay a serialized action sequence. The first failure aborts with
    /// the state chain rolled back to before the failing action.
    pub fn replay(
        &mut self,
        registry: &ActionRegistry,
        ui: &mut dyn Ui,
        steps: &[Step],
    ) -> Result<()> {
        for (code, params) in steps {
            tracing::debug!(code = %code, "replaying action");
            if !self.perform(registry, ui, *code, params.clone())? {
                break;
            }
        }
        Ok(())
    }

    /// Interactive record loop: offer the valid actions, capture parameters,
    /// apply. Failed actions report and continue; `q` (or cancelling the
    /// action prompt) ends the loop. Returns the recorded script.
    pub fn record(&mut self, registry: &ActionRegistry, ui: &mut dyn Ui) -> Result<Vec<Step>> {
        loop {
            let menu: Vec<String> = registry
                .available(self)
                .iter()
                .map(|a| format!("{}) {}", a.code(), a.name()))
                .collect();
            ui.message(&format!("Actions: {}", menu.join("  ")));

            let input = match ui.prompt("Action:") {
                Ok(input) => input,
                Err(Error::Canceled) => break,
                Err(e) => return Err(e),
            };
            let Some(code) = input.trim().chars().next() else {
                continue;
            };
            let Some(action) = registry.get(code) else {
                ui.message(&format!("Unknown action {code:?}"));
                continue;
            };
            if !action.valid(self) {
                ui.message("That action is not available here.");
                continue;
            }
            let params = match action.ask_params(ui, self) {
                Ok(params) => params,
                Err(Error::Canceled) => continue,
                Err(e) => {
                    ui.message(&self.redact(&e.to_string()));
                    continue;
                }
            };
            match self.perform(registry, ui, code, params) {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => ui.message(&self.redact(&format!("Action failed: {e}"))),
            }
        }
        Ok(self.script.clone())
    }
}

fn response_info(response: &reqwest::blocking::Response) -> ResponseInfo {
    ResponseInfo {
        status: response.status().as_u16(),
        headers: response
            .headers()
            .iter()
            .map(|(name, value)| {
                (name.to_string(), value.to_str().unwrap_or_default().to_string())
            })
            .collect(),
    }
}
