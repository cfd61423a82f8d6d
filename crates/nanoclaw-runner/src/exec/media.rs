use std::time::Instant;

use serde_json::json;

use nanoclaw_types::ActionResult;

use crate::{truncate_tail, RunnerState, FETCH_BODY_CAP};

pub(crate) async fn image_to_text(
    state: &RunnerState,
    image_url: &str,
    prompt: Option<&str>,
    action_id: String,
) -> ActionResult {
    let Some(endpoint) = state.config.media.image_url.clone() else {
        return ActionResult::failed(action_id, "image endpoint not configured".to_string(), 0);
    };
    let mut body = json!({ "imageUrl": image_url });
    if let Some(prompt) = prompt {
        body["prompt"] = json!(prompt);
    }
    forward(state, &endpoint, body, action_id).await
}

pub(crate) async fn voice_to_text(
    state: &RunnerState,
    audio_url: &str,
    language: Option<&str>,
    action_id: String,
) -> ActionResult {
    let Some(endpoint) = state.config.media.voice_url.clone() else {
        return ActionResult::failed(action_id, "voice endpoint not configured".to_string(), 0);
    };
    let body = json!({
        "audioUrl": audio_url,
        "language": language.unwrap_or("auto"),
    });
    forward(state, &endpoint, body, action_id).await
}

/// Bearer-token JSON POST; the endpoint's body comes back truncated to the
/// fetch cap.
async fn forward(
    state: &RunnerState,
    endpoint: &str,
    body: serde_json::Value,
    action_id: String,
) -> ActionResult {
    let started = Instant::now();
    let resp = state
        .client
        .post(endpoint)
        .bearer_auth(&state.config.media.bearer_token)
        .json(&body)
        .send()
        .await;
    let duration_ms = started.elapsed().as_millis() as u64;

    match resp {
        Ok(resp) if resp.status().is_success() => {
            let text = resp.text().await.unwrap_or_default();
            ActionResult::ok(action_id, truncate_tail(&text, FETCH_BODY_CAP), duration_ms)
        }
        Ok(resp) => ActionResult::failed(
            action_id,
            format!("media endpoint answered {}", resp.status()),
            duration_ms,
        ),
        Err(e) => ActionResult::failed(
            action_id,
            format!("media endpoint request failed: {e}"),
            duration_ms,
        ),
    }
}
