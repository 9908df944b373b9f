// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Script codec: a recorded action sequence as portable JSON.
//!
//! The wire form is a JSON array of `[code, params]` pairs, UTF-8 encoded and
//! base64'd to a single line so it survives clipboard transfer. `code` is the
//! single-character action tag; `params` is a string, `null`, an integer, or
//! an array, as each action defines. Codes must not be reassigned without a
//! schema-version bump.

use crate::error::{Error, Result};
use base64::{Engine, engine::general_purpose::STANDARD};
use serde_json::{Value, json};

/// One recorded step.
pub type Step = (char, Value);

/// Serialize a recorded action sequence to a single base64 line.
pub fn encode(script: &[Step]) -> String {
    let array: Vec<Value> = script
        .iter()
        .map(|(code, params)| json!([code.to_string(), params]))
        .collect();
    STANDARD.encode(Value::Array(array).to_string())
}

/// Decode a base64 script line back into action steps.
pub fn decode(blob: &str) -> Result<Vec<Step>> {
    let raw = STANDARD.decode(blob.trim())?;
    let value: Value = serde_json::from_slice(&raw)?;
    let array = value
        .as_array()
        .ok_or_else(|| Error::Script("script is not an array".into()))?;

    let mut steps = Vec::with_capacity(array.len());
    for step in array {
        let pair = step
            .as_array()
            .filter(|p| p.len() == 2)
            .ok_or_else(|| Error::Script("step is not a [code, params] pair".into()))?;
        let code_str = pair[0]
            .as_str()
            .ok_or_else(|| Error::Script("action code is not a string".into()))?;
        let mut chars = code_str.chars();
        let code = match (chars.next(), chars.next()) {
            (Some(c), None) => c,
            _ => return Err(Error::Script(format!("action code {code_str:?} is not a single character"))),
        };
        steps.push((code, pair[1].clone()));
    }
    Ok(steps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_all_param_shapes() {
        let script: Vec<Step> = vec![
            ('g', json!("https://example.net/login")),
            ('b', json!(2)),
            ('r', Value::Null),
            (
                'f',
                json!(["login", "/do", "post", {"user": ["u", null], "pass": ["o", null]}]),
            ),
        ];
        let blob = encode(&script);
        assert!(!blob.contains('\n'));
        assert_eq!(decode(&blob).unwrap(), script);
    }

    #[test]
    fn rejects_malformed_scripts() {
        assert!(decode("not base64!!!").is_err());
        let not_array = STANDARD.encode("{}");
        assert!(matches!(decode(&not_array), Err(Error::Script(_))));
        let bad_code = STANDARD.encode(r#"[["gg", null]]"#);
        assert!(matches!(decode(&bad_code), Err(Error::Script(_))));
    }

    #[test]
    fn tolerates_surrounding_whitespace() {
        let blob = format!("  {}\n", encode(&[('q', Value::Null)]));
        assert_eq!(decode(&blob).unwrap(), vec![('q', Value::Null)]);
    }
}
