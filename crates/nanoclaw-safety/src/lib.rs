//! Safety policies applied before any approved action leaves the core.
//!
//! Each check returns `Some(denial_message)` when the action must be
//! blocked; the caller records a blocked result instead of dispatching.

mod ssh;
mod web;

pub use ssh::ssh_policy_violation;
pub use web::{web_fetch_policy_violation, WEB_FETCH_BLOCKED_CAUSE};

use once_cell::sync::Lazy;
use regex::Regex;

use nanoclaw_types::{Action, ADDON_NAME_PATTERN};

static ADDON_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(ADDON_NAME_PATTERN).expect("addon name pattern"));

pub fn addon_name_violation(name: &str) -> Option<String> {
    if ADDON_NAME_RE.is_match(name) {
        None
    } else {
        Some(format!("addon name `{name}` is not allowed"))
    }
}

/// Policy check for a whole action. `None` means the action may dispatch.
pub fn action_policy_violation(action: &Action) -> Option<String> {
    match action {
        Action::Ssh { command, .. } => ssh_policy_violation(command),
        Action::WebFetch {
            url,
            mode,
            requires_approval,
            ..
        } => web_fetch_policy_violation(url, *mode, *requires_approval),
        Action::AddonInstall { name, .. }
        | Action::AddonCreate { name, .. }
        | Action::AddonRun { name, .. } => addon_name_violation(name),
        _ => None,
    }
}
