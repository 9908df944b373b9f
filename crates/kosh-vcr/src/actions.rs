// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! The action taxonomy: every step a session can record or replay.
//!
//! Each action declares whether it pushes a state node and whether requests
//! it originates propagate a Referer, plus the four operations: `valid`
//! (offered from this state?), `ask_params` (interactive capture, never
//! called in replay), `apply`, and its single-character serialized code.
//! Codes are wire format; do not reassign them without a schema-version
//! bump.

use crate::error::{Error, Result};
use crate::forms::{self, FieldKind, FieldOp, Form};
use crate::session::Session;
use crate::state::{AuthHandler, CredSpec, RefererOverride, directory_truncate, virtual_history};
use crate::ui::{Ui, exact_one, select_one};
use reqwest::Method;
use serde_json::{Map, Value, json};
use url::Url;

pub trait Action {
    fn code(&self) -> char;
    fn name(&self) -> &'static str;
    /// Push a state node before applying (and roll it back on failure).
    fn changes_state(&self) -> bool {
        true
    }
    /// Whether requests from this action auto-attach a Referer.
    fn use_referer(&self) -> bool {
        true
    }
    /// Whether the action makes sense from the current state; consulted by
    /// the interactive menu only.
    fn valid(&self, session: &Session) -> bool {
        let _ = session;
        true
    }
    /// Interactive parameter capture. Not called in replay.
    fn ask_params(&self, ui: &mut dyn Ui, session: &Session) -> Result<Value>;
    fn apply(&self, ui: &mut dyn Ui, session: &mut Session, params: &Value) -> Result<()>;
}

/// The configured action set, passed into the session driver rather than
/// living in a process global so tests can assemble their own.
pub struct ActionRegistry {
    actions: Vec<Box<dyn Action>>,
}

impl ActionRegistry {
    pub fn standard() -> Self {
        Self {
            actions: vec![
                Box::new(Goto),
                Box::new(FollowLink),
                Box::new(SubmitForm),
                Box::new(EnterFrame),
                Box::new(Back),
                Box::new(Refresh),
                Box::new(OverrideReferer),
                Box::new(OverrideAgent),
                Box::new(BasicAuth),
                Box::new(Validate),
                Box::new(SavePage),
                Box::new(View),
                Box::new(Undo),
                Box::new(Quit),
                Box::new(DebugFixture),
            ],
        }
    }

    pub fn get(&self, code: char) -> Option<&dyn Action> {
        self.actions.iter().find(|a| a.code() == code).map(Box::as_ref)
    }

    /// Actions offered from the current state, in registry order.
    pub fn available<'a>(&'a self, session: &Session) -> Vec<&'a dyn Action> {
        self.actions
            .iter()
            .filter(|a| a.valid(session))
            .map(Box::as_ref)
            .collect()
    }
}

fn param_str(params: &Value, what: &str) -> Result<String> {
    params
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| Error::Script(format!("{what} params must be a string")))
}

fn param_tuple<'v>(params: &'v Value, len: usize, what: &str) -> Result<&'v [Value]> {
    params
        .as_array()
        .filter(|a| a.len() == len)
        .map(Vec::as_slice)
        .ok_or_else(|| Error::Script(format!("{what} params must be a {len}-tuple")))
}

struct Goto;

impl Action for Goto {
    fn code(&self) -> char {
        'g'
    }
    fn name(&self) -> &'static str {
        "goto URL"
    }
    fn use_referer(&self) -> bool {
        false
    }
    fn ask_params(&self, ui: &mut dyn Ui, _session: &Session) -> Result<Value> {
        Ok(json!(ui.prompt("URL:")?))
    }
    fn apply(&self, ui: &mut dyn Ui, session: &mut Session, params: &Value) -> Result<()> {
        let url = Url::parse(&param_str(params, "goto")?)?;
        session.request(ui, url, Method::GET, None, self.use_referer())
    }
}

struct FollowLink;

impl FollowLink {
    fn candidates(session: &Session) -> Result<Vec<(String, String)>> {
        let html = session.body_html()?;
        Ok(forms::links(&html).into_iter().map(|l| (l.text, l.href)).collect())
    }
}

impl Action for FollowLink {
    fn code(&self) -> char {
        'l'
    }
    fn name(&self) -> &'static str {
        "follow link"
    }
    fn valid(&self, session: &Session) -> bool {
        session.current().body.is_some()
    }
    fn ask_params(&self, ui: &mut dyn Ui, session: &Session) -> Result<Value> {
        let links = Self::candidates(session)?;
        let (text, _) = select_one(ui, "link", &links)?;
        // Record the full visible text so replay can demand an exact match.
        Ok(json!(text))
    }
    fn apply(&self, ui: &mut dyn Ui, session: &mut Session, params: &Value) -> Result<()> {
        let text = param_str(params, "link")?;
        let links = Self::candidates(session)?;
        let href = exact_one(&links, &text, "link")?;
        let url = session.current_url()?.join(href)?;
        session.request(ui, url, Method::GET, None, self.use_referer())
    }
}

struct SubmitForm;

impl SubmitForm {
    fn labeled(all: &[Form]) -> Vec<(String, Form)> {
        all.iter().map(|f| (f.label().to_string(), f.clone())).collect()
    }

    fn parse_field_script(script: &Value) -> Result<Vec<(String, FieldOp)>> {
        let map = script
            .as_object()
            .ok_or_else(|| Error::Script("field script must be an object".into()))?;
        map.iter()
            .map(|(name, entry)| {
                let pair = entry
                    .as_array()
                    .filter(|p| p.len() == 2)
                    .ok_or_else(|| Error::Script("field entry must be a (code, literal) pair".into()))?;
                let code = pair[0]
                    .as_str()
                    .ok_or_else(|| Error::Script("field code must be a string".into()))?;
                let op = FieldOp::parse(code, pair[1].as_str())
                    .ok_or_else(|| Error::Script(format!("unknown field code {code:?}")))?;
                Ok((name.clone(), op))
            })
            .collect()
    }
}

impl Action for SubmitForm {
    fn code(&self) -> char {
        'f'
    }
    fn name(&self) -> &'static str {
        "submit form"
    }
    fn valid(&self, session: &Session) -> bool {
        session.current().body.is_some()
    }
    fn ask_params(&self, ui: &mut dyn Ui, session: &Session) -> Result<Value> {
        let html = session.body_html()?;
        let all = forms::forms(&html);
        let labeled = Self::labeled(&all);
        let (label, form) = select_one(ui, "form", &labeled)?;

        let mut script = Map::new();

        let submits: Vec<(String, (String, String))> = form
            .fields
            .iter()
            .filter(|f| f.kind == FieldKind::Submit)
            .map(|f| (format!("{} [{}]", f.name, f.value), (f.name.clone(), f.value.clone())))
            .collect();
        if !submits.is_empty() && ui.prompt("Press a submit button? (y/n) [y]:")?.trim() != "n" {
            let (_, (name, value)) = select_one(ui, "submit button", &submits)?;
            script.insert(name.clone(), json!(["s", value]));
        }

        for field in form.fields.iter().filter(|f| f.kind != FieldKind::Submit) {
            let answer = ui.prompt(&format!(
                "{} [{}] (k)eep/(s)et/(u)sername/(o)ldpass/(n)ewpass [k]:",
                field.name, field.value
            ))?;
            let op = match answer.trim() {
                "" | "k" => continue,
                "s" => json!(["s", ui.prompt("Value:")?]),
                "u" => json!(["u", null]),
                "o" => json!(["o", null]),
                "n" => json!(["n", null]),
                other => {
                    ui.message(&format!("Unknown choice {other:?}, keeping default."));
                    continue;
                }
            };
            script.insert(field.name.clone(), op);
        }

        loop {
            let name = ui.prompt("Add a field the form does not have (empty to finish):")?;
            let name = name.trim();
            if name.is_empty() {
                break;
            }
            let answer = ui.prompt("(s)et/(u)sername/(o)ldpass/(n)ewpass:")?;
            let op = match answer.trim() {
                "s" => json!(["as", ui.prompt("Value:")?]),
                "u" => json!(["au", null]),
                "o" => json!(["ao", null]),
                "n" => json!(["an", null]),
                other => {
                    ui.message(&format!("Unknown choice {other:?}, skipping."));
                    continue;
                }
            };
            script.insert(name.to_string(), op);
        }

        let method = if form.method.is_empty() { "get" } else { form.method.as_str() };
        Ok(json!([label, form.action, method, script]))
    }
    fn apply(&self, ui: &mut dyn Ui, session: &mut Session, params: &Value) -> Result<()> {
        let parts = param_tuple(params, 4, "form")?;
        let form_name = parts[0]
            .as_str()
            .ok_or_else(|| Error::Script("form name must be a string".into()))?;
        let form_action = parts[1].as_str();
        let form_method = parts[2].as_str().unwrap_or("get");
        let ops = Self::parse_field_script(&parts[3])?;

        let html = session.body_html()?;
        let all = forms::forms(&html);
        let labeled = Self::labeled(&all);
        let form = match exact_one(&labeled, form_name, "form") {
            Ok(form) => form.clone(),
            Err(e) => {
                // Selection fallback: the form may have been matched by a
                // label that has since changed while its action is stable.
                let by_action: Vec<(String, Form)> = all
                    .iter()
                    .filter_map(|f| f.action.clone().map(|a| (a, f.clone())))
                    .collect();
                match form_action {
                    Some(action) => exact_one(&by_action, action, "form")
                        .map_err(|_| e)?
                        .clone(),
                    None => return Err(e),
                }
            }
        };

        let pairs = forms::build_submission(&form, &ops, |spec| session.resolve_cred(ui, spec))?;

        let base = session.current_url()?;
        let target = match form.action.as_deref() {
            Some(action) if !action.is_empty() => base.join(action)?,
            _ => base,
        };
        let method = if form_method.eq_ignore_ascii_case("post") {
            Method::POST
        } else {
            Method::GET
        };
        session.request(ui, target, method, Some(pairs), self.use_referer())
    }
}

struct EnterFrame;

impl EnterFrame {
    fn candidates(session: &Session) -> Result<Vec<(String, String)>> {
        let html = session.body_html()?;
        Ok(forms::frames(&html)
            .into_iter()
            .map(|f| {
                let label = if f.name.is_empty() { f.src.clone() } else { f.name.clone() };
                (label, f.src)
            })
            .collect())
    }
}

impl Action for EnterFrame {
    fn code(&self) -> char {
        'm'
    }
    fn name(&self) -> &'static str {
        "enter frame"
    }
    fn valid(&self, session: &Session) -> bool {
        session.current().body.is_some()
    }
    fn ask_params(&self, ui: &mut dyn Ui, session: &Session) -> Result<Value> {
        let frames = Self::candidates(session)?;
        let (name, src) = select_one(ui, "frame", &frames)?;
        Ok(json!([name, src]))
    }
    fn apply(&self, ui: &mut dyn Ui, session: &mut Session, params: &Value) -> Result<()> {
        let parts = param_tuple(params, 2, "frame")?;
        let name = parts[0].as_str().unwrap_or_default();
        let frames = Self::candidates(session)?;
        let src = exact_one(&frames, name, "frame")?;
        let url = session.current_url()?.join(src)?;
        session.request(ui, url, Method::GET, None, self.use_referer())
    }
}

struct Back;

impl Action for Back {
    fn code(&self) -> char {
        'b'
    }
    fn name(&self) -> &'static str {
        "back"
    }
    fn valid(&self, session: &Session) -> bool {
        virtual_history(session.states()).len() > 1
    }
    fn ask_params(&self, ui: &mut dyn Ui, _session: &Session) -> Result<Value> {
        let answer = ui.prompt("Steps back [1]:")?;
        let answer = answer.trim();
        if answer.is_empty() {
            return Ok(Value::Null);
        }
        answer
            .parse::<u64>()
            .map(|n| json!(n))
            .map_err(|_| Error::Script(format!("{answer:?} is not a count")))
    }
    fn apply(&self, ui: &mut dyn Ui, session: &mut Session, _params: &Value) -> Result<()> {
        // The pushed node carries the count; virtual_history interprets it
        // (and any earlier back nodes) while collapsing the chain.
        let pages = virtual_history(session.states());
        let target = *pages.last().expect("root always present");
        let url = session.states()[target]
            .url
            .clone()
            .ok_or_else(|| Error::ReplayFailure("cannot go back past the first page".into()))?;
        session.request(ui, url, Method::GET, None, self.use_referer())
    }
}

struct Refresh;

impl Action for Refresh {
    fn code(&self) -> char {
        'r'
    }
    fn name(&self) -> &'static str {
        "refresh"
    }
    fn valid(&self, session: &Session) -> bool {
        session.current().url.is_some()
    }
    fn ask_params(&self, _ui: &mut dyn Ui, _session: &Session) -> Result<Value> {
        Ok(Value::Null)
    }
    fn apply(&self, ui: &mut dyn Ui, session: &mut Session, _params: &Value) -> Result<()> {
        let url = session.current_url()?;
        session.request(ui, url, Method::GET, None, self.use_referer())
    }
}

struct OverrideReferer;

impl Action for OverrideReferer {
    fn code(&self) -> char {
        'R'
    }
    fn name(&self) -> &'static str {
        "override referer"
    }
    fn ask_params(&self, ui: &mut dyn Ui, _session: &Session) -> Result<Value> {
        let url = ui.prompt("Referer URL (empty to suppress):")?;
        if url.trim().is_empty() {
            Ok(Value::Null)
        } else {
            Ok(json!(url.trim()))
        }
    }
    fn apply(&self, _ui: &mut dyn Ui, session: &mut Session, params: &Value) -> Result<()> {
        session.current_mut().referer = match params.as_str() {
            Some(url) => RefererOverride::Fixed(Url::parse(url)?),
            None => RefererOverride::Suppress,
        };
        Ok(())
    }
}

struct OverrideAgent;

impl Action for OverrideAgent {
    fn code(&self) -> char {
        't'
    }
    fn name(&self) -> &'static str {
        "override agent"
    }
    fn ask_params(&self, ui: &mut dyn Ui, _session: &Session) -> Result<Value> {
        Ok(json!(ui.prompt("User-Agent:")?))
    }
    fn apply(&self, _ui: &mut dyn Ui, session: &mut Session, params: &Value) -> Result<()> {
        session.current_mut().user_agent = Some(param_str(params, "agent")?);
        Ok(())
    }
}

struct BasicAuth;

impl BasicAuth {
    fn ask_spec(ui: &mut dyn Ui, prompt: &str) -> Result<CredSpec> {
        loop {
            let answer = ui.prompt(prompt)?;
            return Ok(match answer.trim() {
                "u" => CredSpec::Username,
                "o" => CredSpec::OldPass,
                "n" => CredSpec::NewPass,
                "s" => CredSpec::Literal(ui.prompt("Value:")?),
                other => {
                    ui.message(&format!("Unknown choice {other:?}."));
                    continue;
                }
            });
        }
    }
}

impl Action for BasicAuth {
    fn code(&self) -> char {
        'a'
    }
    fn name(&self) -> &'static str {
        "basic auth"
    }
    fn valid(&self, session: &Session) -> bool {
        session.current().info.as_ref().is_some_and(|i| i.status == 401)
    }
    fn ask_params(&self, ui: &mut dyn Ui, session: &Session) -> Result<Value> {
        let challenge = session
            .current()
            .info
            .as_ref()
            .and_then(|info| {
                info.headers
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case("www-authenticate"))
                    .map(|(_, v)| v.clone())
            })
            .unwrap_or_default();
        let scheme = challenge.split_whitespace().next().unwrap_or("Basic").to_lowercase();
        let realm = challenge
            .split_once("realm=\"")
            .and_then(|(_, rest)| rest.split_once('"'))
            .map(|(realm, _)| realm.to_string())
            .unwrap_or_default();
        let scope = directory_truncate(&session.current_url()?);
        let user = Self::ask_spec(ui, "Auth user from (u)sername/(s)literal:")?;
        let pass = Self::ask_spec(ui, "Auth password from (o)ldpass/(n)ewpass/(s)literal:")?;
        Ok(json!([scheme, realm, scope.as_str(), user.to_value(), pass.to_value()]))
    }
    fn apply(&self, _ui: &mut dyn Ui, session: &mut Session, params: &Value) -> Result<()> {
        let parts = param_tuple(params, 5, "auth")?;
        let scheme = parts[0].as_str().unwrap_or_default().to_string();
        if !scheme.eq_ignore_ascii_case("basic") {
            return Err(Error::ReplayFailure(format!(
                "unsupported auth scheme {scheme:?}"
            )));
        }
        let realm = parts[1].as_str().unwrap_or_default().to_string();
        let scope = Url::parse(
            parts[2]
                .as_str()
                .ok_or_else(|| Error::Script("auth scope must be a URL string".into()))?,
        )?;
        let user = CredSpec::from_value(&parts[3])
            .ok_or_else(|| Error::Script("bad auth user spec".into()))?;
        let pass = CredSpec::from_value(&parts[4])
            .ok_or_else(|| Error::Script("bad auth password spec".into()))?;
        session.current_mut().handlers.push(AuthHandler { scheme, realm, scope, user, pass });
        Ok(())
    }
}

struct Validate;

impl Action for Validate {
    fn code(&self) -> char {
        'v'
    }
    fn name(&self) -> &'static str {
        "validate"
    }
    fn valid(&self, session: &Session) -> bool {
        session.current().body.is_some()
    }
    fn ask_params(&self, ui: &mut dyn Ui, _session: &Session) -> Result<Value> {
        Ok(json!(ui.prompt("Substring the page must contain:")?))
    }
    fn apply(&self, _ui: &mut dyn Ui, session: &mut Session, params: &Value) -> Result<()> {
        let needle = param_str(params, "validate")?;
        if session.current().body_text().contains(&needle) {
            Ok(())
        } else {
            Err(Error::ReplayFailure(format!(
                "page does not contain {needle:?}"
            )))
        }
    }
}

struct SavePage;

impl Action for SavePage {
    fn code(&self) -> char {
        'w'
    }
    fn name(&self) -> &'static str {
        "save page"
    }
    fn changes_state(&self) -> bool {
        false
    }
    fn valid(&self, session: &Session) -> bool {
        session.current().body.is_some()
    }
    fn ask_params(&self, ui: &mut dyn Ui, _session: &Session) -> Result<Value> {
        Ok(json!(ui.prompt("Filename:")?))
    }
    fn apply(&self, _ui: &mut dyn Ui, session: &mut Session, params: &Value) -> Result<()> {
        let filename = param_str(params, "save")?;
        let body = session
            .current()
            .body
            .as_deref()
            .ok_or_else(|| Error::ReplayFailure("no page to save".into()))?;
        std::fs::write(filename, body)?;
        Ok(())
    }
}

struct View;

impl Action for View {
    fn code(&self) -> char {
        'x'
    }
    fn name(&self) -> &'static str {
        "view"
    }
    fn changes_state(&self) -> bool {
        false
    }
    fn valid(&self, session: &Session) -> bool {
        session.current().body.is_some()
    }
    fn ask_params(&self, _ui: &mut dyn Ui, _session: &Session) -> Result<Value> {
        Ok(Value::Null)
    }
    fn apply(&self, ui: &mut dyn Ui, session: &mut Session, _params: &Value) -> Result<()> {
        let node = session.current();
        let mut dump = String::new();
        if let Some(url) = &node.url {
            dump.push_str(&format!("URL: {url}\n"));
        }
        if let Some(info) = &node.info {
            dump.push_str(&format!("Status: {}\n", info.status));
            for (name, value) in &info.headers {
                dump.push_str(&format!("{name}: {value}\n"));
            }
        }
        dump.push('\n');
        dump.push_str(&node.body_text());
        ui.message(&session.redact(&dump));
        Ok(())
    }
}

struct Undo;

impl Action for Undo {
    fn code(&self) -> char {
        'u'
    }
    fn name(&self) -> &'static str {
        "undo"
    }
    fn changes_state(&self) -> bool {
        false
    }
    fn valid(&self, session: &Session) -> bool {
        session.states().len() > 1
    }
    fn ask_params(&self, _ui: &mut dyn Ui, _session: &Session) -> Result<Value> {
        Ok(Value::Null)
    }
    fn apply(&self, _ui: &mut dyn Ui, session: &mut Session, _params: &Value) -> Result<()> {
        session.undo()
    }
}

struct Quit;

impl Action for Quit {
    fn code(&self) -> char {
        'q'
    }
    fn name(&self) -> &'static str {
        "quit"
    }
    fn changes_state(&self) -> bool {
        false
    }
    fn ask_params(&self, _ui: &mut dyn Ui, _session: &Session) -> Result<Value> {
        Ok(Value::Null)
    }
    fn apply(&self, _ui: &mut dyn Ui, _session: &mut Session, _params: &Value) -> Result<()> {
        Ok(())
    }
}

/// Loads a local file as if it were a fetched page. Reserved for tests.
struct DebugFixture;

impl Action for DebugFixture {
    fn code(&self) -> char {
        '#'
    }
    fn name(&self) -> &'static str {
        "debug fixture"
    }
    fn ask_params(&self, ui: &mut dyn Ui, _session: &Session) -> Result<Value> {
        Ok(json!(ui.prompt("Fixture path:")?))
    }
    fn apply(&self, _ui: &mut dyn Ui, session: &mut Session, params: &Value) -> Result<()> {
        session.load_fixture(&param_str(params, "fixture")?)
    }
}
