use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

/// Addon names are constrained to a DNS-label-like shape.
pub const ADDON_NAME_PATTERN: &str = "^[a-z0-9][a-z0-9-]{0,63}$";

/// Accepted `timeout` range for opencode tasks, in seconds.
pub const OPENCODE_TIMEOUT_RANGE: RangeInclusive<u64> = 1..=600;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SshTarget {
    William,
    #[serde(rename = "willy-ubuntu")]
    WillyUbuntu,
}

impl SshTarget {
    pub fn as_str(self) -> &'static str {
        match self {
            SshTarget::William => "william",
            SshTarget::WillyUbuntu => "willy-ubuntu",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WebFetchMode {
    #[default]
    Http,
    Browser,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Foreground,
    Background,
}

fn default_true() -> bool {
    true
}

/// One proposed unit of work. The variant set is closed: an unrecognized
/// `type` tag fails deserialization and the plan parser rejects the whole
/// plan rather than falling through.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Reply,
    Question {
        question: String,
    },
    Ssh {
        target: SshTarget,
        command: String,
        reason: String,
        #[serde(rename = "requiresApproval", default = "default_true")]
        requires_approval: bool,
        #[serde(rename = "executionMode", default, skip_serializing_if = "Option::is_none")]
        execution_mode: Option<ExecutionMode>,
        #[serde(rename = "parallelGroup", default, skip_serializing_if = "Option::is_none")]
        parallel_group: Option<String>,
    },
    ObsidianWrite {
        path: String,
        patch: String,
        reason: String,
        #[serde(rename = "requiresApproval", default = "default_true")]
        requires_approval: bool,
        #[serde(rename = "executionMode", default, skip_serializing_if = "Option::is_none")]
        execution_mode: Option<ExecutionMode>,
        #[serde(rename = "parallelGroup", default, skip_serializing_if = "Option::is_none")]
        parallel_group: Option<String>,
    },
    WebFetch {
        url: String,
        reason: String,
        #[serde(default)]
        mode: WebFetchMode,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        extract: Option<String>,
        #[serde(rename = "requiresApproval", default = "default_true")]
        requires_approval: bool,
        #[serde(rename = "executionMode", default, skip_serializing_if = "Option::is_none")]
        execution_mode: Option<ExecutionMode>,
        #[serde(rename = "parallelGroup", default, skip_serializing_if = "Option::is_none")]
        parallel_group: Option<String>,
    },
    ImageToText {
        #[serde(rename = "imageUrl")]
        image_url: String,
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prompt: Option<String>,
        #[serde(rename = "requiresApproval", default = "default_true")]
        requires_approval: bool,
        #[serde(rename = "executionMode", default, skip_serializing_if = "Option::is_none")]
        execution_mode: Option<ExecutionMode>,
        #[serde(rename = "parallelGroup", default, skip_serializing_if = "Option::is_none")]
        parallel_group: Option<String>,
    },
    VoiceToText {
        #[serde(rename = "audioUrl")]
        audio_url: String,
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        language: Option<String>,
        #[serde(rename = "requiresApproval", default = "default_true")]
        requires_approval: bool,
        #[serde(rename = "executionMode", default, skip_serializing_if = "Option::is_none")]
        execution_mode: Option<ExecutionMode>,
        #[serde(rename = "parallelGroup", default, skip_serializing_if = "Option::is_none")]
        parallel_group: Option<String>,
    },
    OpencodeServe {
        task: String,
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout: Option<u64>,
        #[serde(rename = "requiresApproval", default = "default_true")]
        requires_approval: bool,
        #[serde(rename = "executionMode", default, skip_serializing_if = "Option::is_none")]
        execution_mode: Option<ExecutionMode>,
        #[serde(rename = "parallelGroup", default, skip_serializing_if = "Option::is_none")]
        parallel_group: Option<String>,
    },
    AddonInstall {
        name: String,
        reason: String,
        #[serde(rename = "requiresApproval", default = "default_true")]
        requires_approval: bool,
        #[serde(rename = "executionMode", default, skip_serializing_if = "Option::is_none")]
        execution_mode: Option<ExecutionMode>,
        #[serde(rename = "parallelGroup", default, skip_serializing_if = "Option::is_none")]
        parallel_group: Option<String>,
    },
    AddonCreate {
        name: String,
        purpose: String,
        reason: String,
        #[serde(rename = "requiresApproval", default = "default_true")]
        requires_approval: bool,
        #[serde(rename = "executionMode", default, skip_serializing_if = "Option::is_none")]
        execution_mode: Option<ExecutionMode>,
        #[serde(rename = "parallelGroup", default, skip_serializing_if = "Option::is_none")]
        parallel_group: Option<String>,
    },
    AddonRun {
        name: String,
        input: String,
        reason: String,
        #[serde(rename = "requiresApproval", default = "default_true")]
        requires_approval: bool,
        #[serde(rename = "executionMode", default, skip_serializing_if = "Option::is_none")]
        execution_mode: Option<ExecutionMode>,
        #[serde(rename = "parallelGroup", default, skip_serializing_if = "Option::is_none")]
        parallel_group: Option<String>,
    },
}

impl Action {
    /// The wire tag for this variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Reply => "reply",
            Action::Question { .. } => "question",
            Action::Ssh { .. } => "ssh",
            Action::ObsidianWrite { .. } => "obsidian_write",
            Action::WebFetch { .. } => "web_fetch",
            Action::ImageToText { .. } => "image_to_text",
            Action::VoiceToText { .. } => "voice_to_text",
            Action::OpencodeServe { .. } => "opencode_serve",
            Action::AddonInstall { .. } => "addon_install",
            Action::AddonCreate { .. } => "addon_create",
            Action::AddonRun { .. } => "addon_run",
        }
    }

    /// Whether this variant reaches the runner when approved. `reply` and
    /// `question` only shape the chat response.
    pub fn is_executable(&self) -> bool {
        !matches!(self, Action::Reply | Action::Question { .. })
    }

    pub fn execution_mode(&self) -> Option<ExecutionMode> {
        match self {
            Action::Reply | Action::Question { .. } => None,
            Action::Ssh { execution_mode, .. }
            | Action::ObsidianWrite { execution_mode, .. }
            | Action::WebFetch { execution_mode, .. }
            | Action::ImageToText { execution_mode, .. }
            | Action::VoiceToText { execution_mode, .. }
            | Action::OpencodeServe { execution_mode, .. }
            | Action::AddonInstall { execution_mode, .. }
            | Action::AddonCreate { execution_mode, .. }
            | Action::AddonRun { execution_mode, .. } => *execution_mode,
        }
    }

    pub fn parallel_group(&self) -> Option<&str> {
        match self {
            Action::Reply | Action::Question { .. } => None,
            Action::Ssh { parallel_group, .. }
            | Action::ObsidianWrite { parallel_group, .. }
            | Action::WebFetch { parallel_group, .. }
            | Action::ImageToText { parallel_group, .. }
            | Action::VoiceToText { parallel_group, .. }
            | Action::OpencodeServe { parallel_group, .. }
            | Action::AddonInstall { parallel_group, .. }
            | Action::AddonCreate { parallel_group, .. }
            | Action::AddonRun { parallel_group, .. } => parallel_group.as_deref(),
        }
    }

    pub fn requires_approval(&self) -> bool {
        match self {
            Action::Reply | Action::Question { .. } => false,
            Action::Ssh {
                requires_approval, ..
            }
            | Action::ObsidianWrite {
                requires_approval, ..
            }
            | Action::WebFetch {
                requires_approval, ..
            }
            | Action::ImageToText {
                requires_approval, ..
            }
            | Action::VoiceToText {
                requires_approval, ..
            }
            | Action::OpencodeServe {
                requires_approval, ..
            }
            | Action::AddonInstall {
                requires_approval, ..
            }
            | Action::AddonCreate {
                requires_approval, ..
            }
            | Action::AddonRun {
                requires_approval, ..
            } => *requires_approval,
        }
    }

    /// Short human-readable label used in approval prompts and result blocks.
    pub fn summary(&self) -> String {
        match self {
            Action::Reply => "reply".to_string(),
            Action::Question { question } => format!("question: {question}"),
            Action::Ssh {
                target, command, ..
            } => format!("ssh {}: {}", target.as_str(), command),
            Action::ObsidianWrite { path, .. } => format!("obsidian_write: {path}"),
            Action::WebFetch { url, mode, .. } => match mode {
                WebFetchMode::Http => format!("web_fetch: {url}"),
                WebFetchMode::Browser => format!("web_fetch (browser): {url}"),
            },
            Action::ImageToText { image_url, .. } => format!("image_to_text: {image_url}"),
            Action::VoiceToText { audio_url, .. } => format!("voice_to_text: {audio_url}"),
            Action::OpencodeServe { task, .. } => format!("opencode: {task}"),
            Action::AddonInstall { name, .. } => format!("addon_install: {name}"),
            Action::AddonCreate { name, .. } => format!("addon_create: {name}"),
            Action::AddonRun { name, .. } => format!("addon_run: {name}"),
        }
    }
}
