use tracing::warn;

use nanoclaw_planner::Planner;
use nanoclaw_types::{Action, ActionResult, ActionStatus};

/// Characters of raw output shown per action in the compact block.
const BLOCK_OUTPUT_CAP: usize = 1500;

/// Render dispatch results for the chat. `actions` and `results` are
/// positionally aligned. Fetched pages go through the planner for an
/// intent-aware summary; everything else gets a compact per-action block.
pub async fn render_results(
    planner: &dyn Planner,
    actions: &[Action],
    results: &[ActionResult],
) -> String {
    let mut sections = Vec::with_capacity(results.len());
    for (action, result) in actions.iter().zip(results) {
        let section = match action {
            Action::WebFetch { url, .. } if result.status == ActionStatus::Ok => {
                summarize_fetch(planner, url, result).await
            }
            _ => compact_block(action, result),
        };
        sections.push(section);
    }
    sections.join("\n\n")
}

async fn summarize_fetch(planner: &dyn Planner, url: &str, result: &ActionResult) -> String {
    let prompt = format!(
        "Summarize the following fetched page for a chat reply. Keep the\n\
         key facts, drop boilerplate, answer in a few short lines.\n\n\
         URL: {url}\n\n{}",
        result.stdout
    );
    match planner.summarize(&prompt).await {
        Ok(summary) if !summary.trim().is_empty() => {
            format!("🌐 {url}\n{}", summary.trim())
        }
        Ok(_) => compact_block_for_fetch(url, result),
        Err(e) => {
            warn!(url, "fetch summarization failed: {e}");
            compact_block_for_fetch(url, result)
        }
    }
}

fn compact_block_for_fetch(url: &str, result: &ActionResult) -> String {
    format!("🌐 {url}\n{}", clip(&result.stdout))
}

fn compact_block(action: &Action, result: &ActionResult) -> String {
    let marker = match result.status {
        ActionStatus::Ok => "✅",
        ActionStatus::Failed => "❌",
        ActionStatus::Blocked => "⛔",
        ActionStatus::Skipped => "⏭️",
    };
    let mut block = format!(
        "{marker} {} — exit {} ({} ms)",
        action.summary(),
        result.exit_code,
        result.duration_ms
    );
    if !result.stdout.trim().is_empty() {
        block.push('\n');
        block.push_str(&clip(result.stdout.trim()));
    }
    if !result.stderr.trim().is_empty() {
        block.push('\n');
        block.push_str(&clip(result.stderr.trim()));
    }
    block
}

fn clip(text: &str) -> String {
    if text.len() <= BLOCK_OUTPUT_CAP {
        return text.to_string();
    }
    let mut cut = BLOCK_OUTPUT_CAP;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…", &text[..cut])
}
