pub(crate) mod browser;
mod endpoint;
mod fetch;
mod media;
mod ssh;
mod vault;

use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::error;

use nanoclaw_safety::action_policy_violation;
use nanoclaw_types::{Action, ActionResult, ExecutionMode};

use crate::RunnerState;

/// Execute one dispatched batch.
///
/// Actions without a `parallelGroup` run serially in declaration order
/// first; grouped actions then run concurrently, bounded by the runner's
/// `max_parallel` semaphore. Grouping is advisory — admission control is the
/// semaphore, not per-group bookkeeping. Every result lands at the index of
/// its action.
pub(crate) async fn execute_dispatch(
    state: Arc<RunnerState>,
    actions: Vec<Action>,
) -> Vec<ActionResult> {
    let mut slots: Vec<Option<ActionResult>> = (0..actions.len()).map(|_| None).collect();

    for (index, action) in actions.iter().enumerate() {
        if action.parallel_group().is_none() {
            slots[index] = Some(execute_one(state.clone(), index, action.clone()).await);
        }
    }

    let mut grouped = JoinSet::new();
    for (index, action) in actions.iter().enumerate() {
        if action.parallel_group().is_some() {
            let state = state.clone();
            let action = action.clone();
            let slots_sem = state.parallel_slots();
            grouped.spawn(async move {
                let _permit = match slots_sem.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return (
                            index,
                            ActionResult::failed(
                                format!("a{index}"),
                                "runner is shutting down".to_string(),
                                0,
                            ),
                        )
                    }
                };
                let result = execute_one(state, index, action).await;
                (index, result)
            });
        }
    }
    while let Some(joined) = grouped.join_next().await {
        match joined {
            Ok((index, result)) => slots[index] = Some(result),
            Err(e) => error!("grouped action task failed: {e}"),
        }
    }

    slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| {
            slot.unwrap_or_else(|| {
                ActionResult::failed(
                    format!("a{index}"),
                    "action produced no result".to_string(),
                    0,
                )
            })
        })
        .collect()
}

async fn execute_one(state: Arc<RunnerState>, index: usize, action: Action) -> ActionResult {
    let action_id = format!("a{index}");

    // The dispatcher filters too, but the runner is the trust boundary for
    // whatever reaches it over the network.
    if let Some(cause) = action_policy_violation(&action) {
        return ActionResult::blocked(action_id, cause);
    }

    match action {
        Action::Reply | Action::Question { .. } => {
            ActionResult::skipped(action_id, "action has no runner-side effect")
        }
        Action::Ssh {
            target, command, ..
        } => ssh::execute(&state.config.ssh, target, &command, action_id).await,
        Action::WebFetch { url, mode, .. } => fetch::execute(&state, &url, mode, action_id).await,
        Action::ImageToText {
            image_url, prompt, ..
        } => media::image_to_text(&state, &image_url, prompt.as_deref(), action_id).await,
        Action::VoiceToText {
            audio_url,
            language,
            ..
        } => media::voice_to_text(&state, &audio_url, language.as_deref(), action_id).await,
        Action::ObsidianWrite { path, patch, .. } => {
            vault::execute(&state, &path, &patch, action_id).await
        }
        Action::OpencodeServe {
            task,
            cwd,
            timeout,
            execution_mode,
            ..
        } => {
            endpoint::opencode(
                state.clone(),
                &task,
                cwd.as_deref(),
                timeout,
                execution_mode.unwrap_or(ExecutionMode::Foreground),
                action_id,
            )
            .await
        }
        Action::AddonInstall {
            name,
            execution_mode,
            ..
        } => {
            endpoint::addon(
                state.clone(),
                "install",
                &name,
                None,
                None,
                execution_mode.unwrap_or(ExecutionMode::Foreground),
                action_id,
            )
            .await
        }
        Action::AddonCreate {
            name,
            purpose,
            execution_mode,
            ..
        } => {
            endpoint::addon(
                state.clone(),
                "create",
                &name,
                Some(&purpose),
                None,
                execution_mode.unwrap_or(ExecutionMode::Foreground),
                action_id,
            )
            .await
        }
        Action::AddonRun {
            name,
            input,
            execution_mode,
            ..
        } => {
            endpoint::addon(
                state.clone(),
                "run",
                &name,
                None,
                Some(&input),
                execution_mode.unwrap_or(ExecutionMode::Foreground),
                action_id,
            )
            .await
        }
    }
}
