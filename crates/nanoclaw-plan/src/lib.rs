//! Plan contract between the planner and the orchestration core.
//!
//! The planner answers each turn with free text that may carry a fenced
//! ```json block containing `{ "actions": [...] }`. This crate extracts and
//! validates that block, serializes plans back into canonical fenced form,
//! strips plan blocks out of user-facing replies, and synthesizes fallback
//! `web_fetch` actions from bare links in the user message.

mod inject;
mod parse;
mod repair;

pub use inject::inject_fallback_fetch;
pub use parse::{parse_plan, ParseOutcome};
pub use repair::repair_prompt;

use nanoclaw_types::Plan;

/// Canonical fenced representation of a plan: a triple-backtick `json` block
/// wrapping pretty-printed JSON. `parse_plan(format_plan_block(p))` yields
/// `p` for any schema-valid plan.
pub fn format_plan_block(plan: &Plan) -> String {
    let body = serde_json::to_string_pretty(plan).unwrap_or_else(|_| "{}".to_string());
    format!("```json\n{body}\n```")
}

/// Remove the plan block from a reply before it reaches the chat. When the
/// leftover text is itself a plan-shaped JSON object the whole reply is
/// suppressed.
pub fn strip_plan_block(text: &str) -> String {
    let mut out = text.to_string();
    if let Some(start) = text.find("```") {
        if let Some(end_rel) = text[start + 3..].find("```") {
            let end = start + 3 + end_rel + 3;
            out = format!("{}{}", &text[..start], &text[end..]);
        }
    }
    let trimmed = out.trim();
    if parse::looks_like_plan_json(trimmed) {
        return String::new();
    }
    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use nanoclaw_types::{Action, SshTarget};

    fn ssh_plan() -> Plan {
        Plan {
            actions: vec![Action::Ssh {
                target: SshTarget::William,
                command: "uptime".to_string(),
                reason: "check load".to_string(),
                requires_approval: true,
                execution_mode: None,
                parallel_group: None,
            }],
        }
    }

    #[test]
    fn format_then_parse_roundtrips() {
        let plan = ssh_plan();
        let block = format_plan_block(&plan);
        assert!(block.starts_with("```json\n"));
        assert!(block.ends_with("\n```"));
        let outcome = parse_plan(&block);
        assert_eq!(outcome.plan, Some(plan));
        assert!(outcome.errors.is_empty());
    }

    #[test]
    fn strip_removes_fenced_block_and_keeps_reply() {
        let text = format!(
            "Checking load on william now.\n\n{}\n",
            format_plan_block(&ssh_plan())
        );
        assert_eq!(strip_plan_block(&text), "Checking load on william now.");
    }

    #[test]
    fn strip_suppresses_plan_shaped_remainder() {
        let bare = r#"{"actions": []}"#;
        assert_eq!(strip_plan_block(bare), "");
    }

    #[test]
    fn strip_keeps_plain_text_untouched() {
        assert_eq!(strip_plan_block("all good here"), "all good here");
    }
}
