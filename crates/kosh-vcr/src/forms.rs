// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Tolerant HTML extraction: links, frames, forms, meta-refresh.
//!
//! Parsing is html5ever's recovery algorithm (via `scraper`), so malformed
//! markup degrades instead of failing; whatever DOM state was accumulated
//! before an error stays usable.

use crate::error::{Error, Result};
use crate::state::CredSpec;
use scraper::{ElementRef, Html, Selector};

/// An `<a href>` with its visible text.
#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    pub text: String,
    pub href: String,
}

/// A `<frame>`/`<iframe>` with its name and source.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub name: String,
    pub src: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Submit,
    Radio,
    Other,
}

/// One submittable control with its current default value.
#[derive(Debug, Clone, PartialEq)]
pub struct FormField {
    pub name: String,
    pub value: String,
    pub kind: FieldKind,
    pub checked: bool,
}

/// A parsed `<form>`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Form {
    pub name: Option<String>,
    pub id: Option<String>,
    pub action: Option<String>,
    pub method: String,
    pub fields: Vec<FormField>,
}

impl Form {
    /// The label a user selects the form by: name, falling back to id, then
    /// action.
    pub fn label(&self) -> &str {
        self.name
            .as_deref()
            .or(self.id.as_deref())
            .or(self.action.as_deref())
            .unwrap_or("")
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }
}

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("static selector")
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Collect every link with its visible text.
pub fn links(html: &str) -> Vec<Link> {
    let doc = Html::parse_document(html);
    doc.select(&selector("a[href]"))
        .filter_map(|a| {
            let href = a.value().attr("href")?.to_string();
            let text = collapse_whitespace(&a.text().collect::<String>());
            Some(Link { text, href })
        })
        .collect()
}

/// Collect frames and iframes that carry a source.
pub fn frames(html: &str) -> Vec<Frame> {
    let doc = Html::parse_document(html);
    doc.select(&selector("frame, iframe"))
        .filter_map(|f| {
            let src = f.value().attr("src")?.to_string();
            let name = f.value().attr("name").unwrap_or_default().to_string();
            Some(Frame { name, src })
        })
        .collect()
}

/// Parse a `<meta http-equiv="refresh">` target URL, if any.
pub fn meta_refresh(html: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    for meta in doc.select(&selector("meta[http-equiv]")) {
        let equiv = meta.value().attr("http-equiv")?;
        if !equiv.eq_ignore_ascii_case("refresh") {
            continue;
        }
        let content = meta.value().attr("content")?;
        for part in content.split(';') {
            let part = part.trim();
            if let Some(rest) = part
                .get(..4)
                .filter(|p| p.eq_ignore_ascii_case("url="))
                .map(|_| &part[4..])
            {
                let url = rest.trim().trim_matches(|c| c == '"' || c == '\'');
                if !url.is_empty() {
                    return Some(url.to_string());
                }
            }
        }
    }
    None
}

fn parse_field(el: ElementRef<'_>) -> Option<FormField> {
    let tag = el.value().name();
    let name = el.value().attr("name")?.to_string();
    match tag {
        "input" => {
            let kind = el.value().attr("type").unwrap_or("text").to_ascii_lowercase();
            let checked = el.value().attr("checked").is_some();
            let value = el.value().attr("value").unwrap_or_default().to_string();
            let kind = match kind.as_str() {
                "submit" | "image" => FieldKind::Submit,
                "radio" => FieldKind::Radio,
                _ => FieldKind::Other,
            };
            Some(FormField { name, value, kind, checked })
        }
        "textarea" => Some(FormField {
            name,
            value: el.text().collect::<String>(),
            kind: FieldKind::Other,
            checked: false,
        }),
        "select" => {
            let options: Vec<ElementRef<'_>> = el.select(&selector("option")).collect();
            let chosen = options
                .iter()
                .find(|o| o.value().attr("selected").is_some())
                .or(options.first());
            let value = chosen
                .map(|o| {
                    o.value()
                        .attr("value")
                        .map(str::to_string)
                        .unwrap_or_else(|| collapse_whitespace(&o.text().collect::<String>()))
                })
                .unwrap_or_default();
            Some(FormField {
                name,
                value,
                kind: FieldKind::Other,
                checked: false,
            })
        }
        _ => None,
    }
}

/// Parse every form on the page.
pub fn forms(html: &str) -> Vec<Form> {
    let doc = Html::parse_document(html);
    doc.select(&selector("form"))
        .map(|form| {
            let attr = |name: &str| form.value().attr(name).map(str::to_string);
            Form {
                name: attr("name"),
                id: attr("id"),
                action: attr("action"),
                method: attr("method").unwrap_or_default().to_ascii_lowercase(),
                fields: form
                    .select(&selector("input, select, textarea"))
                    .filter_map(parse_field)
                    .collect(),
            }
        })
        .collect()
}

/// One overlay entry of a form field script.
///
/// Codes `s`/`u`/`o`/`n` replace the default value of a live field; the
/// `a`-prefixed variants (`as`/`au`/`ao`/`an`) add a field the live form does
/// not carry.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldOp {
    pub add: bool,
    pub spec: CredSpec,
}

impl FieldOp {
    pub fn code(&self) -> String {
        if self.add {
            format!("a{}", self.spec.code())
        } else {
            self.spec.code().to_string()
        }
    }

    pub fn parse(code: &str, literal: Option<&str>) -> Option<Self> {
        let (add, spec_code) = match code.strip_prefix('a') {
            Some(rest) if !code.is_empty() && code != "a" => (true, rest),
            _ => (false, code),
        };
        let spec = match spec_code {
            "u" => CredSpec::Username,
            "o" => CredSpec::OldPass,
            "n" => CredSpec::NewPass,
            "s" => CredSpec::Literal(literal?.to_string()),
            _ => return None,
        };
        Some(Self { add, spec })
    }
}

/// Build the submission pairs for a form.
///
/// Defaults: every named non-submit control except unchecked radios. Submit
/// buttons contribute nothing by default; the pressed one (at most one)
/// arrives through the field script. The overlay then substitutes or adds
/// fields, resolving credential sources through `resolve`; a non-`add` entry
/// naming a field the live form does not have is a replay mismatch.
pub fn build_submission(
    form: &Form,
    field_script: &[(String, FieldOp)],
    mut resolve: impl FnMut(&CredSpec) -> Result<String>,
) -> Result<Vec<(String, String)>> {
    let mut pairs: Vec<(String, String)> = form
        .fields
        .iter()
        .filter(|f| match f.kind {
            FieldKind::Submit => false,
            FieldKind::Radio => f.checked,
            FieldKind::Other => true,
        })
        .map(|f| (f.name.clone(), f.value.clone()))
        .collect();

    for (name, op) in field_script {
        if !op.add && !form.has_field(name) {
            return Err(Error::ReplayFailure(format!(
                "form has no field named {name:?}"
            )));
        }
        let value = resolve(&op.spec)?;
        match pairs.iter_mut().find(|(n, _)| n == name) {
            Some(pair) => pair.1 = value,
            None => pairs.push((name.clone(), value)),
        }
    }
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><body>
        <a href="/one">First link</a>
        <a href="/two"> Second <b>bold</b> link </a>
        <form name="login" action="/do" method="POST">
          <input type="text" name="user" value="guest">
          <input type="password" name="pass">
          <input type="hidden" name="csrf" value="tok123">
          <input type="radio" name="mode" value="a">
          <input type="radio" name="mode" value="b" checked>
          <input type="submit" name="go" value="Sign in">
          <input type="submit" name="cancel" value="Cancel">
          <select name="lang"><option value="en" selected>English</option><option value="de">German</option></select>
          <textarea name="note">hello</textarea>
        </form>
        </body></html>"#;

    #[test]
    fn links_collect_visible_text() {
        let links = links(PAGE);
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].text, "First link");
        assert_eq!(links[1].text, "Second bold link");
        assert_eq!(links[1].href, "/two");
    }

    #[test]
    fn form_parsing() {
        let forms = forms(PAGE);
        assert_eq!(forms.len(), 1);
        let form = &forms[0];
        assert_eq!(form.label(), "login");
        assert_eq!(form.method, "post");
        assert_eq!(form.action.as_deref(), Some("/do"));
        let by_name = |n: &str| form.fields.iter().find(|f| f.name == n).unwrap();
        assert_eq!(by_name("user").value, "guest");
        assert_eq!(by_name("lang").value, "en");
        assert_eq!(by_name("note").value, "hello");
        assert_eq!(by_name("go").kind, FieldKind::Submit);
    }

    #[test]
    fn defaults_exclude_submits_and_unchecked_radios() {
        let form = &forms(PAGE)[0];
        let pairs = build_submission(form, &[], |_| unreachable!()).unwrap();
        let names: Vec<&str> = pairs.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["user", "pass", "csrf", "mode", "lang", "note"]);
        assert_eq!(
            pairs.iter().find(|(n, _)| n == "mode").unwrap().1,
            "b",
            "only the checked radio is submitted"
        );
    }

    #[test]
    fn overlay_substitutes_and_adds() {
        let form = &forms(PAGE)[0];
        let script = vec![
            ("user".to_string(), FieldOp { add: false, spec: CredSpec::Username }),
            ("pass".to_string(), FieldOp { add: false, spec: CredSpec::OldPass }),
            ("go".to_string(), FieldOp { add: false, spec: CredSpec::Literal("Sign in".into()) }),
            ("extra".to_string(), FieldOp { add: true, spec: CredSpec::Literal("x".into()) }),
        ];
        let pairs = build_submission(form, &script, |spec| {
            Ok(match spec {
                CredSpec::Username => "alice".to_string(),
                CredSpec::OldPass => "hunter2".to_string(),
                CredSpec::Literal(l) => l.clone(),
                CredSpec::NewPass => unreachable!(),
            })
        })
        .unwrap();
        let get = |n: &str| pairs.iter().find(|(k, _)| k == n).map(|(_, v)| v.as_str());
        assert_eq!(get("user"), Some("alice"));
        assert_eq!(get("pass"), Some("hunter2"));
        assert_eq!(get("go"), Some("Sign in"));
        assert_eq!(get("extra"), Some("x"));
    }

    #[test]
    fn overlay_on_missing_field_is_replay_failure() {
        let form = &forms(PAGE)[0];
        let script = vec![(
            "no_such".to_string(),
            FieldOp { add: false, spec: CredSpec::Literal("x".into()) },
        )];
        assert!(matches!(
            build_submission(form, &script, |_| Ok(String::new())),
            Err(Error::ReplayFailure(_))
        ));
    }

    #[test]
    fn field_op_codes_roundtrip() {
        for (code, lit) in [("s", Some("v")), ("u", None), ("ao", None), ("as", Some("v"))] {
            let op = FieldOp::parse(code, lit).unwrap();
            assert_eq!(op.code(), code);
        }
        assert!(FieldOp::parse("z", None).is_none());
        assert!(FieldOp::parse("s", None).is_none());
    }

    #[test]
    fn meta_refresh_extraction() {
        let html = r#"<meta http-equiv="Refresh" content="0; URL='/next'">"#;
        assert_eq!(meta_refresh(html).as_deref(), Some("/next"));
        assert_eq!(meta_refresh("<meta http-equiv=refresh content=5>"), None);
        assert_eq!(meta_refresh("<p>no meta</p>"), None);
    }

    #[test]
    fn malformed_markup_still_yields_links() {
        let html = "<a href=/ok>ok</a><table><tr><td <a href=/b>broken</a>";
        assert!(!links(html).is_empty());
    }
}
