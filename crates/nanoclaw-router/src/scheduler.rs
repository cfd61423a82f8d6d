use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use nanoclaw_types::{ScheduleKind, ScheduledTask, TaskStatus};

use crate::message_loop::run_agent_turn;
use crate::schedule::next_run;
use crate::RouterContext;

/// Periodic loop firing due scheduled tasks as planner turns.
pub async fn run_scheduler(ctx: Arc<RouterContext>, period: Duration) {
    loop {
        if let Err(e) = scheduler_tick(&ctx).await {
            warn!("scheduler tick failed: {e:#}");
        }
        tokio::time::sleep(period).await;
    }
}

/// Fire every active task whose `next_run` has passed. A task advances
/// (next_run recomputed, one-shots completed) only after its turn succeeds;
/// failures leave it due and it retries next tick (at-least-once).
pub async fn scheduler_tick(ctx: &RouterContext) -> anyhow::Result<()> {
    let now = Utc::now();
    for task in ctx.tasks.due(now).await? {
        if let Err(e) = fire_task(ctx, &task).await {
            warn!(task_id = %task.id, "scheduled task failed, will retry: {e:#}");
            continue;
        }
        advance_task(ctx, &task).await?;
    }
    Ok(())
}

async fn fire_task(ctx: &RouterContext, task: &ScheduledTask) -> anyhow::Result<()> {
    let group = match ctx.groups.get(&task.chat_id).await {
        Some(group) => group,
        None => match ctx.groups.by_folder(&task.group_folder).await {
            Some((_, group)) => group,
            None => {
                anyhow::bail!(
                    "task `{}` has no registered group (folder `{}`)",
                    task.id,
                    task.group_folder
                );
            }
        },
    };
    info!(task_id = %task.id, chat_id = %task.chat_id, "firing scheduled task");
    run_agent_turn(ctx, &group, &task.chat_id, Some(task.prompt.clone()), true).await
}

async fn advance_task(ctx: &RouterContext, task: &ScheduledTask) -> anyhow::Result<()> {
    match task.schedule_kind {
        ScheduleKind::Once => {
            ctx.tasks.transition(&task.id, TaskStatus::Completed).await?;
            ctx.tasks.set_next_run(&task.id, None).await?;
        }
        kind => {
            let next = next_run(kind, &task.schedule_value, Utc::now(), ctx.timezone)?;
            ctx.tasks.set_next_run(&task.id, next).await?;
        }
    }
    Ok(())
}
