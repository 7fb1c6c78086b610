use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::suite::ExpectedStatus;

const EXCERPT_BYTES: usize = 200;

/// How a `"success": false` body on an otherwise accepted response is treated.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Strictness {
    /// The test fails.
    #[default]
    Strict,
    /// The test passes with a warning.
    Warn,
}

impl fmt::Display for Strictness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Strictness::Strict => "strict",
            Strictness::Warn => "warn",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuccessFlag {
    Absent,
    True,
    False,
}

/// Looks up the conventional top-level `success` field. Non-boolean values
/// count as absent.
pub fn success_flag(body: &Value) -> SuccessFlag {
    match body.get("success") {
        Some(Value::Bool(true)) => SuccessFlag::True,
        Some(Value::Bool(false)) => SuccessFlag::False,
        _ => SuccessFlag::Absent,
    }
}

/// What came back for a single request.
#[derive(Debug, Clone, Copy)]
pub struct Observation<'a> {
    pub status: u16,
    pub content_type: Option<&'a str>,
    pub body: &'a [u8],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Pass { warning: Option<String> },
    Fail { message: String },
}

impl Verdict {
    pub fn passed(&self) -> bool {
        matches!(self, Verdict::Pass { .. })
    }
}

pub fn evaluate(
    expected: &ExpectedStatus,
    observation: &Observation<'_>,
    strictness: Strictness,
) -> Verdict {
    if !expected.accepts(observation.status) {
        return Verdict::Fail {
            message: format!(
                "expected status {}, got {}. Body: {}",
                expected,
                observation.status,
                body_excerpt(observation.body, EXCERPT_BYTES)
            ),
        };
    }

    let flag = if is_success_status(observation.status) && is_json(observation.content_type) {
        // Not every 2xx JSON-labelled body parses; that is tolerated.
        serde_json::from_slice::<Value>(observation.body)
            .map(|body| success_flag(&body))
            .unwrap_or(SuccessFlag::Absent)
    } else {
        SuccessFlag::Absent
    };

    match (flag, strictness) {
        (SuccessFlag::False, Strictness::Strict) => Verdict::Fail {
            message: format!(
                "status {} accepted but body reports success=false",
                observation.status
            ),
        },
        (SuccessFlag::False, Strictness::Warn) => Verdict::Pass {
            warning: Some("success=false in response body".to_string()),
        },
        _ => Verdict::Pass { warning: None },
    }
}

fn is_success_status(status: u16) -> bool {
    (200..300).contains(&status)
}

pub fn is_json(content_type: Option<&str>) -> bool {
    content_type
        .map(|value| value.to_ascii_lowercase().contains("application/json"))
        .unwrap_or(false)
}

/// First `limit` bytes of a body as text, or as hex when they are not UTF-8.
pub fn body_excerpt(bytes: &[u8], limit: usize) -> String {
    let slice = &bytes[..bytes.len().min(limit)];
    let rendered = match std::str::from_utf8(slice) {
        Ok(text) => text.to_string(),
        Err(err) if err.error_len().is_none() && err.valid_up_to() > 0 => {
            // cut inside a multi-byte character
            String::from_utf8_lossy(&slice[..err.valid_up_to()]).into_owned()
        }
        Err(_) => hex::encode(slice),
    };
    if bytes.len() > limit {
        format!("{rendered}...")
    } else {
        rendered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn observe<'a>(status: u16, content_type: Option<&'a str>, body: &'a [u8]) -> Observation<'a> {
        Observation {
            status,
            content_type,
            body,
        }
    }

    #[test]
    fn scalar_expectation_requires_equality() {
        let expected = ExpectedStatus::Exactly(200);
        assert!(evaluate(&expected, &observe(200, None, b""), Strictness::Strict).passed());
        assert!(!evaluate(&expected, &observe(201, None, b""), Strictness::Strict).passed());
    }

    #[test]
    fn set_expectation_requires_membership() {
        let expected = ExpectedStatus::AnyOf([200, 404].into_iter().collect());
        for status in [200, 404] {
            assert!(evaluate(&expected, &observe(status, None, b""), Strictness::Strict).passed());
        }
        assert!(!evaluate(&expected, &observe(500, None, b""), Strictness::Strict).passed());
    }

    #[test]
    fn status_mismatch_message_includes_detail() {
        let verdict = evaluate(
            &ExpectedStatus::Exactly(200),
            &observe(503, Some("text/plain"), b"maintenance"),
            Strictness::Warn,
        );
        assert_eq!(
            verdict,
            Verdict::Fail {
                message: "expected status 200, got 503. Body: maintenance".to_string()
            }
        );
    }

    #[test]
    fn success_false_fails_only_when_strict() {
        let expected = ExpectedStatus::Exactly(200);
        let body = br#"{"success":false,"error":"nope"}"#;
        let observation = observe(200, Some("application/json; charset=utf-8"), body);

        assert!(!evaluate(&expected, &observation, Strictness::Strict).passed());
        assert_eq!(
            evaluate(&expected, &observation, Strictness::Warn),
            Verdict::Pass {
                warning: Some("success=false in response body".to_string())
            }
        );
    }

    #[test]
    fn malformed_json_is_tolerated() {
        let verdict = evaluate(
            &ExpectedStatus::Exactly(200),
            &observe(200, Some("application/json"), b"\xff\xd8\xff\xe0"),
            Strictness::Strict,
        );
        assert_eq!(verdict, Verdict::Pass { warning: None });
    }

    #[test]
    fn success_flag_ignored_for_non_json_or_non_2xx() {
        let body = br#"{"success":false}"#;
        let expected = ExpectedStatus::AnyOf([200, 404].into_iter().collect());
        assert!(evaluate(&expected, &observe(200, Some("text/html"), body), Strictness::Strict).passed());
        assert!(
            evaluate(&expected, &observe(404, Some("application/json"), body), Strictness::Strict)
                .passed()
        );
    }

    #[test]
    fn success_flag_is_tri_state() {
        assert_eq!(success_flag(&json!({"success": true})), SuccessFlag::True);
        assert_eq!(success_flag(&json!({"success": false})), SuccessFlag::False);
        assert_eq!(success_flag(&json!({"success": "yes"})), SuccessFlag::Absent);
        assert_eq!(success_flag(&json!({"items": []})), SuccessFlag::Absent);
        assert_eq!(success_flag(&json!([1, 2])), SuccessFlag::Absent);
    }

    #[test]
    fn body_excerpt_truncates_and_hexes_binary() {
        assert_eq!(body_excerpt(b"hello", 10), "hello");
        assert_eq!(body_excerpt(b"hello world", 5), "hello...");
        assert_eq!(body_excerpt(&[0, 159, 146, 150], 4), "009f9296");
        assert_eq!(body_excerpt("привет".as_bytes(), 3), "п...");
    }
}
