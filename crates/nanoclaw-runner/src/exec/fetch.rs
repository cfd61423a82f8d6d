use std::time::Instant;

use tracing::warn;

use nanoclaw_types::{ActionResult, WebFetchMode};

use crate::{truncate_tail, RunnerState, FETCH_BODY_CAP};

/// Outbound fetch. Plain mode is a single GET with the fixed user-agent and
/// redirects followed; browser mode goes through the driver seam and falls
/// back to the readable mirror, erroring out rather than succeeding empty.
pub(crate) async fn execute(
    state: &RunnerState,
    url: &str,
    mode: WebFetchMode,
    action_id: String,
) -> ActionResult {
    match mode {
        WebFetchMode::Http => http_get(state, url, action_id).await,
        WebFetchMode::Browser => browser_fetch(state, url, action_id).await,
    }
}

async fn http_get(state: &RunnerState, url: &str, action_id: String) -> ActionResult {
    let started = Instant::now();
    let resp = match state.client.get(url).send().await {
        Ok(resp) => resp,
        Err(e) => {
            return ActionResult::failed(
                action_id,
                format!("fetch failed: {e}"),
                started.elapsed().as_millis() as u64,
            )
        }
    };

    let status = resp.status();
    let content_type = resp
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();
    let final_url = resp.url().to_string();
    let body = resp.text().await.unwrap_or_default();
    let duration_ms = started.elapsed().as_millis() as u64;

    let stdout = format!(
        "url: {final_url}\nstatus: {status}\ncontent-type: {content_type}\n\n{}",
        truncate_tail(&body, FETCH_BODY_CAP)
    );
    if status.is_success() {
        ActionResult::ok(action_id, stdout, duration_ms)
    } else {
        let mut result = ActionResult::failed(
            action_id,
            format!("fetch answered {status}"),
            duration_ms,
        );
        result.stdout = stdout;
        result
    }
}

async fn browser_fetch(state: &RunnerState, url: &str, action_id: String) -> ActionResult {
    let started = Instant::now();

    if let Some(browser) = &state.browser {
        match browser.fetch(url).await {
            Ok(page) => {
                let stdout = format!(
                    "title: {}\n\n{}",
                    page.title,
                    truncate_tail(&page.text, FETCH_BODY_CAP)
                );
                return ActionResult::ok(action_id, stdout, started.elapsed().as_millis() as u64);
            }
            Err(e) => warn!(url, error = %e, "browser fetch failed, trying readable mirror"),
        }
    }

    let Some(mirror) = &state.config.fetch.readable_mirror_url else {
        return ActionResult::failed(
            action_id,
            "browser driver unavailable and no readable mirror configured".to_string(),
            started.elapsed().as_millis() as u64,
        );
    };

    let mirror_url = format!("{mirror}{url}");
    match state.client.get(&mirror_url).send().await {
        Ok(resp) if resp.status().is_success() => {
            let body = resp.text().await.unwrap_or_default();
            ActionResult::ok(
                action_id,
                format!(
                    "url: {url}\nvia: readable mirror\n\n{}",
                    truncate_tail(&body, FETCH_BODY_CAP)
                ),
                started.elapsed().as_millis() as u64,
            )
        }
        Ok(resp) => ActionResult::failed(
            action_id,
            format!("readable mirror answered {}", resp.status()),
            started.elapsed().as_millis() as u64,
        ),
        Err(e) => ActionResult::failed(
            action_id,
            format!("readable mirror fetch failed: {e}"),
            started.elapsed().as_millis() as u64,
        ),
    }
}
