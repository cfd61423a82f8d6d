use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::action::Action;

/// The planner's structured output for one turn. An empty action list is a
/// valid plan (the reply carries no proposed work).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Plan {
    #[serde(default)]
    pub actions: Vec<Action>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Proposed,
    Approved,
    Denied,
}

/// A persisted plan awaiting a human decision. Only `proposed` may
/// transition, exactly once, to `approved` or `denied`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proposal {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub status: ProposalStatus,
    pub group_folder: String,
    pub chat_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_text: Option<String>,
    pub actions: Vec<Action>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision_reason: Option<String>,
}

impl Proposal {
    pub fn new(
        group_folder: impl Into<String>,
        chat_id: impl Into<String>,
        request_text: Option<String>,
        actions: Vec<Action>,
    ) -> Self {
        Self {
            id: format!("prop-{}", Uuid::new_v4()),
            created_at: Utc::now(),
            status: ProposalStatus::Proposed,
            group_folder: group_folder.into(),
            chat_id: chat_id.into(),
            request_text,
            actions,
            decided_at: None,
            decision_reason: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == ProposalStatus::Proposed
    }
}
