use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use url::Url;

use nanoclaw_types::{Action, Plan, ADDON_NAME_PATTERN, OPENCODE_TIMEOUT_RANGE};

static ADDON_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(ADDON_NAME_PATTERN).expect("addon name pattern"));

/// Result of one parse attempt. `plan` is `Some` only when the text carried
/// a schema-valid plan (or no plan at all, which is the valid empty plan);
/// otherwise `errors` carries one string per failure cause.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseOutcome {
    pub plan: Option<Plan>,
    pub errors: Vec<String>,
    pub raw_json: Option<String>,
}

impl ParseOutcome {
    fn ok(plan: Plan, raw_json: String) -> Self {
        Self {
            plan: Some(plan),
            errors: Vec::new(),
            raw_json: Some(raw_json),
        }
    }

    fn err(errors: Vec<String>, raw_json: Option<String>) -> Self {
        Self {
            plan: None,
            errors,
            raw_json,
        }
    }
}

/// Parse planner output into a plan.
///
/// Resolution order: first fenced block, then the whole trimmed text (with
/// an optional leading `json` literal), then the empty-actions plan for an
/// object without `actions`. Any schema violation rejects the whole plan.
pub fn parse_plan(text: &str) -> ParseOutcome {
    let candidate = match extract_fenced_block(text) {
        Some(block) => block,
        None => strip_json_literal(text.trim()).to_string(),
    };

    if candidate.is_empty() {
        return ParseOutcome::err(vec!["no plan block found in planner output".to_string()], None);
    }

    let value: Value = match serde_json::from_str(&candidate) {
        Ok(v) => v,
        Err(e) => {
            return ParseOutcome::err(
                vec![format!("plan is not valid JSON: {e}")],
                Some(candidate),
            )
        }
    };

    if !value.is_object() {
        return ParseOutcome::err(
            vec!["plan must be a JSON object".to_string()],
            Some(candidate),
        );
    }

    let raw_actions = match value.get("actions") {
        None => return ParseOutcome::ok(Plan::default(), candidate),
        Some(Value::Array(items)) => items.clone(),
        Some(_) => {
            return ParseOutcome::err(
                vec!["`actions` must be an array".to_string()],
                Some(candidate),
            )
        }
    };

    let mut actions = Vec::with_capacity(raw_actions.len());
    let mut errors = Vec::new();
    for (index, item) in raw_actions.into_iter().enumerate() {
        match serde_json::from_value::<Action>(item) {
            Ok(action) => {
                errors.extend(validate_action(index, &action));
                actions.push(action);
            }
            Err(e) => errors.push(format!("action {index}: {e}")),
        }
    }

    if errors.is_empty() {
        ParseOutcome::ok(Plan { actions }, candidate)
    } else {
        ParseOutcome::err(errors, Some(candidate))
    }
}

/// Variant-specific constraints that serde cannot express.
fn validate_action(index: usize, action: &Action) -> Vec<String> {
    let mut errors = Vec::new();
    match action {
        Action::WebFetch { url, .. } => match Url::parse(url) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
            Ok(parsed) => errors.push(format!(
                "action {index}: web_fetch url scheme `{}` is not http or https",
                parsed.scheme()
            )),
            Err(e) => errors.push(format!("action {index}: web_fetch url does not parse: {e}")),
        },
        Action::ImageToText { image_url, .. } => {
            if !is_http_url(image_url) {
                errors.push(format!(
                    "action {index}: imageUrl must be an absolute http(s) url"
                ));
            }
        }
        Action::VoiceToText { audio_url, .. } => {
            if !is_http_url(audio_url) {
                errors.push(format!(
                    "action {index}: audioUrl must be an absolute http(s) url"
                ));
            }
        }
        Action::OpencodeServe {
            timeout: Some(timeout),
            ..
        } => {
            if !OPENCODE_TIMEOUT_RANGE.contains(timeout) {
                errors.push(format!(
                    "action {index}: timeout must be between {} and {} seconds",
                    OPENCODE_TIMEOUT_RANGE.start(),
                    OPENCODE_TIMEOUT_RANGE.end()
                ));
            }
        }
        Action::AddonInstall { name, .. }
        | Action::AddonCreate { name, .. }
        | Action::AddonRun { name, .. } => {
            if !ADDON_NAME_RE.is_match(name) {
                errors.push(format!(
                    "action {index}: addon name `{name}` does not match {ADDON_NAME_PATTERN}"
                ));
            }
        }
        _ => {}
    }
    errors
}

fn is_http_url(candidate: &str) -> bool {
    Url::parse(candidate)
        .map(|u| matches!(u.scheme(), "http" | "https"))
        .unwrap_or(false)
}

/// Content of the first triple-backtick fence, with an optional `json` tag
/// stripped. Returns `None` when no complete fence exists.
fn extract_fenced_block(text: &str) -> Option<String> {
    let start = text.find("```")?;
    let rest = &text[start + 3..];
    let end = rest.find("```")?;
    let block = strip_json_literal(rest[..end].trim());
    if block.is_empty() {
        None
    } else {
        Some(block.to_string())
    }
}

/// Drop a leading `json` language tag when it is followed by whitespace or
/// the start of a JSON value.
fn strip_json_literal(text: &str) -> &str {
    match text.strip_prefix("json") {
        Some(rest)
            if rest.starts_with(|c: char| c.is_whitespace() || c == '{' || c == '[') =>
        {
            rest.trim()
        }
        _ => text,
    }
}

/// An object is plan-shaped whether or not it carries `actions`: a bare
/// `{}` is the valid empty plan and must not leak into the chat.
pub(crate) fn looks_like_plan_json(text: &str) -> bool {
    let candidate = strip_json_literal(text.trim());
    serde_json::from_str::<Value>(candidate)
        .map(|v| v.is_object())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nanoclaw_types::WebFetchMode;

    #[test]
    fn parses_fenced_plan() {
        let text = "Here is what I suggest:\n```json\n{\"actions\":[{\"type\":\"ssh\",\"target\":\"william\",\"command\":\"uptime\",\"reason\":\"check\"}]}\n```\nlet me know";
        let outcome = parse_plan(text);
        let plan = outcome.plan.expect("plan");
        assert_eq!(plan.actions.len(), 1);
        assert!(outcome.errors.is_empty());
    }

    #[test]
    fn parses_untagged_fence() {
        let text = "```\n{\"actions\":[]}\n```";
        let outcome = parse_plan(text);
        assert_eq!(outcome.plan, Some(Plan::default()));
    }

    #[test]
    fn parses_bare_json_with_leading_literal() {
        let outcome = parse_plan("json {\"actions\": []}");
        assert_eq!(outcome.plan, Some(Plan::default()));
    }

    #[test]
    fn empty_object_is_empty_plan() {
        let outcome = parse_plan("{}");
        assert_eq!(outcome.plan, Some(Plan::default()));
        assert!(outcome.errors.is_empty());
    }

    #[test]
    fn unknown_action_type_rejects_whole_plan() {
        let text = "```json\n{\"actions\":[{\"type\":\"reply\"},{\"type\":\"teleport\",\"reason\":\"r\"}]}\n```";
        let outcome = parse_plan(text);
        assert!(outcome.plan.is_none());
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.errors[0].starts_with("action 1:"));
    }

    #[test]
    fn unknown_ssh_target_rejects_whole_plan() {
        let text = r#"{"actions":[{"type":"ssh","target":"mars","command":"uptime","reason":"r"}]}"#;
        let outcome = parse_plan(text);
        assert!(outcome.plan.is_none());
        assert!(!outcome.errors.is_empty());
    }

    #[test]
    fn web_fetch_requires_http_scheme() {
        let text = r#"{"actions":[{"type":"web_fetch","url":"ftp://example.com/file","reason":"r"}]}"#;
        let outcome = parse_plan(text);
        assert!(outcome.plan.is_none());
        assert!(outcome.errors[0].contains("scheme"));
    }

    #[test]
    fn browser_fetch_defaults_to_requiring_approval() {
        let text = r#"{"actions":[{"type":"web_fetch","url":"https://example.com","mode":"browser","reason":"r"}]}"#;
        let plan = parse_plan(text).plan.expect("plan");
        match &plan.actions[0] {
            Action::WebFetch {
                mode,
                requires_approval,
                ..
            } => {
                assert_eq!(*mode, WebFetchMode::Browser);
                assert!(*requires_approval);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn opencode_timeout_out_of_range_is_rejected() {
        let text = r#"{"actions":[{"type":"opencode_serve","task":"t","reason":"r","timeout":9000}]}"#;
        let outcome = parse_plan(text);
        assert!(outcome.plan.is_none());
        assert!(outcome.errors[0].contains("timeout"));
    }

    #[test]
    fn bad_addon_name_is_rejected() {
        let text = r#"{"actions":[{"type":"addon_run","name":"Bad_Name","input":"x","reason":"r"}]}"#;
        let outcome = parse_plan(text);
        assert!(outcome.plan.is_none());
    }

    #[test]
    fn actions_must_be_an_array() {
        let outcome = parse_plan(r#"{"actions": "nope"}"#);
        assert!(outcome.plan.is_none());
        assert_eq!(outcome.errors, vec!["`actions` must be an array".to_string()]);
    }

    #[test]
    fn garbage_reports_json_error() {
        let outcome = parse_plan("definitely not json");
        assert!(outcome.plan.is_none());
        assert!(outcome.errors[0].contains("not valid JSON"));
    }

    #[test]
    fn one_error_per_invalid_action() {
        let text = r#"{"actions":[
            {"type":"web_fetch","url":"ftp://a","reason":"r"},
            {"type":"addon_run","name":"-bad","input":"x","reason":"r"}
        ]}"#;
        let outcome = parse_plan(text);
        assert_eq!(outcome.errors.len(), 2);
    }
}
