use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use nanoclaw_plan::{inject_fallback_fetch, parse_plan, repair_prompt, strip_plan_block};
use nanoclaw_planner::{PlannerReply, PlannerRequest, FALLBACK_REPLY};
use nanoclaw_store::MAIN_GROUP_FOLDER;
use nanoclaw_types::{InboundMessage, Plan, Proposal, RegisteredGroup};

use crate::{trigger_regex, RouterContext};

/// Single cooperative loop draining the durable message store.
pub async fn run_message_loop(ctx: Arc<RouterContext>, poll_interval: Duration) {
    loop {
        if let Err(e) = message_loop_tick(&ctx).await {
            warn!("message loop tick failed: {e:#}");
        }
        tokio::time::sleep(poll_interval).await;
    }
}

/// One poll: fetch messages strictly after the watermark for registered
/// chats, process them in time order, and advance the watermark after each.
/// A failing message stops the batch so it is retried next iteration
/// (at-least-once).
pub async fn message_loop_tick(ctx: &RouterContext) -> anyhow::Result<()> {
    let chats = ctx.groups.chat_ids().await;
    if chats.is_empty() {
        return Ok(());
    }
    let after = ctx.state.last_timestamp().await;
    let batch = ctx.messages.fetch_since(after, &chats).await?;

    for message in batch {
        if let Err(e) = process_message(ctx, &message).await {
            warn!(chat_id = %message.chat_id, "message processing failed, stopping batch: {e:#}");
            return Err(e);
        }
        ctx.state.advance_last_timestamp(message.timestamp).await?;
    }
    Ok(())
}

async fn process_message(ctx: &RouterContext, message: &InboundMessage) -> anyhow::Result<()> {
    let Some(group) = ctx.groups.get(&message.chat_id).await else {
        return Ok(());
    };

    // Approval commands work on any registered chat, trigger or not.
    if ctx
        .gateway
        .handle_command(&message.chat_id, &message.content)
        .await?
    {
        return Ok(());
    }

    let is_main = group.folder == MAIN_GROUP_FOLDER;
    if !is_main && !trigger_regex(&ctx.assistant_name).is_match(message.content.trim()) {
        debug!(chat_id = %message.chat_id, "no trigger prefix, ignoring");
        return Ok(());
    }

    run_agent_turn(ctx, &group, &message.chat_id, None, false).await
}

/// One planner turn for a chat. With `prompt_override` (scheduler path) the
/// stored prompt is used verbatim and no watermark moves; otherwise the
/// prompt is assembled from all messages past the per-chat agent watermark,
/// which advances only on success.
pub async fn run_agent_turn(
    ctx: &RouterContext,
    group: &RegisteredGroup,
    chat_id: &str,
    prompt_override: Option<String>,
    scheduled: bool,
) -> anyhow::Result<()> {
    let (user_prompt, latest_ts) = match &prompt_override {
        Some(prompt) => (prompt.clone(), None),
        None => {
            let after = ctx.state.agent_watermark(chat_id).await;
            let pending = ctx.messages.fetch_chat_since(chat_id, after).await?;
            let Some(latest) = pending.last().map(|m| m.timestamp) else {
                return Ok(());
            };
            (assemble_prompt(&ctx.assistant_name, &pending), Some(latest))
        }
    };
    if user_prompt.is_empty() {
        return Ok(());
    }

    let memory_header = match ctx.memory.memory_header(&group.folder, &user_prompt).await {
        Ok(header) => header,
        Err(e) => {
            warn!("memory retrieval failed: {e:#}");
            String::new()
        }
    };
    let prompt = format!("{memory_header}{user_prompt}");

    let session_id = ctx.sessions.get(&group.folder).await;
    let reply = match ctx
        .planner
        .plan_turn(PlannerRequest {
            prompt,
            session_id,
            scheduled,
        })
        .await
    {
        Ok(reply) => reply,
        Err(e) => {
            warn!("planner failed: {e:#}");
            PlannerReply {
                text: FALLBACK_REPLY.to_string(),
                session_id: None,
            }
        }
    };
    if let Some(session) = &reply.session_id {
        ctx.sessions.set(&group.folder, session).await?;
    }

    let mut plan = resolve_plan(ctx, group, &reply, scheduled).await;
    // Only a successfully parsed plan gets the fallback fetch appended.
    inject_fallback_fetch(&mut plan, &user_prompt);

    let stripped = strip_plan_block(&reply.text);
    if !plan.actions.is_empty() {
        let proposal = ctx
            .proposals
            .enqueue(Proposal::new(
                group.folder.clone(),
                chat_id,
                Some(user_prompt),
                plan.actions,
            ))
            .await?;
        if !stripped.is_empty() {
            send_chunked(ctx, chat_id, &stripped).await?;
        }
        ctx.gateway.announce_proposal(&proposal).await?;
    } else if !stripped.is_empty() {
        send_chunked(ctx, chat_id, &stripped).await?;
    }

    if let Some(ts) = latest_ts {
        ctx.state.set_agent_watermark(chat_id, ts).await?;
    }
    Ok(())
}

/// Parse the reply into a plan, running the fixed repair re-prompt once on
/// failure. After a failed repair the plan is empty: the user still gets
/// the textual reply, nothing is enqueued.
async fn resolve_plan(
    ctx: &RouterContext,
    group: &RegisteredGroup,
    reply: &PlannerReply,
    scheduled: bool,
) -> Plan {
    let outcome = parse_plan(&reply.text);
    if let Some(plan) = outcome.plan {
        return plan;
    }
    warn!(errors = ?outcome.errors, "plan parse failed, running repair prompt");

    let session_id = ctx.sessions.get(&group.folder).await;
    let repaired = ctx
        .planner
        .plan_turn(PlannerRequest {
            prompt: repair_prompt(&reply.text),
            session_id,
            scheduled,
        })
        .await;
    match repaired {
        Ok(repaired) => {
            let outcome = parse_plan(&repaired.text);
            match outcome.plan {
                Some(plan) => plan,
                None => {
                    warn!(errors = ?outcome.errors, "plan repair failed, treating as empty");
                    Plan::default()
                }
            }
        }
        Err(e) => {
            warn!("plan repair call failed: {e:#}");
            Plan::default()
        }
    }
}

/// Concatenate pending messages: trimmed, empty lines dropped, joined with
/// blank lines. The trigger prefix is stripped so the planner sees the
/// request, not the addressing.
fn assemble_prompt(assistant_name: &str, messages: &[InboundMessage]) -> String {
    let trigger = trigger_regex(assistant_name);
    messages
        .iter()
        .map(|m| {
            let without_trigger = trigger.replace(m.content.trim(), "");
            without_trigger
                .trim()
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .collect::<Vec<_>>()
                .join("\n")
        })
        .filter(|content| !content.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

async fn send_chunked(ctx: &RouterContext, chat_id: &str, text: &str) -> anyhow::Result<()> {
    for chunk in nanoclaw_gateway::split_message(text, ctx.transport.max_message_len()) {
        ctx.transport.send_text(chat_id, &chunk).await?;
    }
    Ok(())
}
