/// Schema description embedded in the repair prompt. Kept in one place so
/// the prompt and the parser cannot drift apart silently.
const SCHEMA_HINT: &str = r#"{
  "actions": [
    {"type": "reply"},
    {"type": "question", "question": "<text>"},
    {"type": "ssh", "target": "william|willy-ubuntu", "command": "<cmd>", "reason": "<why>", "requiresApproval": true},
    {"type": "obsidian_write", "path": "<vault path>", "patch": "<content>", "reason": "<why>", "requiresApproval": true},
    {"type": "web_fetch", "url": "<http(s) url>", "mode": "http|browser", "reason": "<why>", "requiresApproval": true},
    {"type": "image_to_text", "imageUrl": "<http(s) url>", "prompt": "<optional>", "reason": "<why>", "requiresApproval": true},
    {"type": "voice_to_text", "audioUrl": "<http(s) url>", "language": "<optional>", "reason": "<why>", "requiresApproval": true},
    {"type": "opencode_serve", "task": "<text>", "cwd": "<optional>", "timeout": 60, "reason": "<why>", "requiresApproval": true, "executionMode": "foreground|background"},
    {"type": "addon_install", "name": "<addon>", "reason": "<why>", "requiresApproval": true},
    {"type": "addon_create", "name": "<addon>", "purpose": "<text>", "reason": "<why>", "requiresApproval": true},
    {"type": "addon_run", "name": "<addon>", "input": "<text>", "reason": "<why>", "requiresApproval": true}
  ]
}"#;

/// Fixed JSON-only re-prompt used when the planner's first answer carried no
/// valid plan. The planner must answer with only the fenced block.
pub fn repair_prompt(invalid_output: &str) -> String {
    format!(
        "Your previous answer did not contain a valid action plan.\n\
         Respond with ONLY a fenced ```json block and nothing else. The block\n\
         must contain a single JSON object of this shape (unknown `type`\n\
         values are rejected, `reason` is mandatory on every action):\n\n\
         {SCHEMA_HINT}\n\n\
         If no action is needed, answer with {{\"actions\": []}}.\n\n\
         Previous answer:\n{invalid_output}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repair_prompt_embeds_schema_and_previous_output() {
        let prompt = repair_prompt("I think you should run uptime");
        assert!(prompt.contains("```json"));
        assert!(prompt.contains("\"actions\""));
        assert!(prompt.contains("I think you should run uptime"));
    }

    #[test]
    fn repair_prompt_is_deterministic() {
        assert_eq!(repair_prompt("x"), repair_prompt("x"));
    }
}
