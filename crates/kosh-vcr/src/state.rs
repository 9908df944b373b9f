// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Navigation state chain: one node per state-changing action.
//!
//! The chain is a stack (branches are linear): pushing copies the previous
//! node's auth handlers and overrides, `undo` pops. The cookie jar is not
//! per-node; it lives in the session's HTTP client and is shared along the
//! whole chain.

use serde_json::Value;
use url::Url;

/// Status and headers of the last response a node received.
#[derive(Debug, Clone)]
pub struct ResponseInfo {
    pub status: u16,
    pub headers: Vec<(String, String)>,
}

/// Where a credential in an auth handler or form overlay comes from.
///
/// Serialized as a `(code, literal)` tuple: `u`/`o`/`n` pull from the
/// session's username/oldpass/newpass (prompting when missing), `s` carries
/// the literal itself.
#[derive(Debug, Clone, PartialEq)]
pub enum CredSpec {
    Username,
    OldPass,
    NewPass,
    Literal(String),
}

impl CredSpec {
    pub fn code(&self) -> &'static str {
        match self {
            CredSpec::Username => "u",
            CredSpec::OldPass => "o",
            CredSpec::NewPass => "n",
            CredSpec::Literal(_) => "s",
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            CredSpec::Literal(lit) => serde_json::json!(["s", lit]),
            other => serde_json::json!([other.code(), Value::Null]),
        }
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        let pair = value.as_array().filter(|p| p.len() == 2)?;
        match pair[0].as_str()? {
            "u" => Some(CredSpec::Username),
            "o" => Some(CredSpec::OldPass),
            "n" => Some(CredSpec::NewPass),
            "s" => Some(CredSpec::Literal(pair[1].as_str()?.to_string())),
            _ => None,
        }
    }
}

/// An installed HTTP Basic authentication handler.
///
/// `scope` is the directory-truncated URL the handler covers; any request at
/// or below it gets an `Authorization` header.
#[derive(Debug, Clone)]
pub struct AuthHandler {
    pub scheme: String,
    pub realm: String,
    pub scope: Url,
    pub user: CredSpec,
    pub pass: CredSpec,
}

impl AuthHandler {
    pub fn covers(&self, url: &Url) -> bool {
        url.as_str().starts_with(self.scope.as_str())
    }
}

/// Truncate a URL to its directory: everything after the last `/` of the
/// path is dropped.
pub fn directory_truncate(url: &Url) -> Url {
    let mut out = url.clone();
    out.set_query(None);
    out.set_fragment(None);
    let path = out.path();
    let dir = match path.rfind('/') {
        Some(idx) => path[..=idx].to_string(),
        None => "/".to_string(),
    };
    out.set_path(&dir);
    out
}

/// How the `Referer` header is derived for requests from a node.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum RefererOverride {
    /// Propagate the previous node's URL (when the action opts in).
    #[default]
    Inherit,
    /// Send no Referer at all.
    Suppress,
    /// Always send this URL.
    Fixed(Url),
}

/// One snapshot in the navigation chain.
#[derive(Debug, Clone)]
pub struct StateNode {
    /// The action that created this node; `None` at the root.
    pub action: Option<(char, Value)>,
    /// Final URL after redirects; `None` at the root.
    pub url: Option<Url>,
    pub info: Option<ResponseInfo>,
    /// The last fully-read response body.
    pub body: Option<Vec<u8>>,
    pub handlers: Vec<AuthHandler>,
    pub referer: RefererOverride,
    /// `None` means the default agent string.
    pub user_agent: Option<String>,
}

impl StateNode {
    pub fn root() -> Self {
        Self {
            action: None,
            url: None,
            info: None,
            body: None,
            handlers: Vec::new(),
            referer: RefererOverride::default(),
            user_agent: None,
        }
    }

    /// Child node for a state-changing action: same page and settings until
    /// the action's own request replaces them.
    pub fn child(&self, code: char, params: Value) -> Self {
        Self {
            action: Some((code, params)),
            url: self.url.clone(),
            info: self.info.clone(),
            body: self.body.clone(),
            handlers: self.handlers.clone(),
            referer: self.referer.clone(),
            user_agent: self.user_agent.clone(),
        }
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(self.body.as_deref().unwrap_or_default()).into_owned()
    }
}

/// Compute the logical page history of a state stack.
///
/// Only navigations contribute pages; `b` nodes collapse onto the page they
/// navigated back to (so nested backs skip each other and everything they
/// skipped), refresh re-requests in place, and settings nodes (referer,
/// agent, auth) are transparent.
///
/// Returns stack indices, oldest first. The `back` action pops `count` pages
/// and requests the URL of the resulting top.
pub fn virtual_history(states: &[StateNode]) -> Vec<usize> {
    let mut pages = Vec::new();
    for (i, node) in states.iter().enumerate() {
        match &node.action {
            None => pages.push(i), // root
            Some(('b', params)) => {
                let count = params.as_u64().unwrap_or(1).max(1);
                for _ in 0..count {
                    if pages.len() > 1 {
                        pages.pop();
                    }
                }
            }
            Some(('g' | 'l' | 'f' | 'm' | '#', _)) => pages.push(i),
            Some(_) => {}
        }
    }
    pages
}
