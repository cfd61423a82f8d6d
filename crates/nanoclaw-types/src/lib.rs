mod action;
mod group;
mod proposal;
mod run;
mod task;
mod wire;

pub use action::{
    Action, ExecutionMode, SshTarget, WebFetchMode, ADDON_NAME_PATTERN, OPENCODE_TIMEOUT_RANGE,
};
pub use group::{InboundMessage, RegisteredGroup};
pub use proposal::{Plan, Proposal, ProposalStatus};
pub use run::{Run, RunStatus, RunUpdate};
pub use task::{ScheduleKind, ScheduledTask, TaskStatus};
pub use wire::{
    ActionResult, ActionStatus, DispatchEnvelope, DispatchResponse, DISPATCH_EVENT,
    DISPATCH_ID_HEADER, RUNNER_SECRET_HEADER, SIGNATURE_HEADER, SIGNATURE_TS_HEADER,
};
