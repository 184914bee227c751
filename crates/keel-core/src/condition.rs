// Keel Core - Status conditions
//
// Conditions are a set keyed by type: at most one entry per type, updates
// replace in place and advance observedGeneration toward the object's
// current generation. lastTransitionTime only moves when the status flips.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Well-known condition types
pub const CONDITION_AVAILABLE: &str = "Available";
pub const CONDITION_MODEL_AVAILABLE: &str = "ModelAvailable";
pub const CONDITION_READY: &str = "Ready";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// One typed condition in a resource status
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: ConditionStatus,
    pub reason: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub observed_generation: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl Condition {
    pub fn new(
        condition_type: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            condition_type: condition_type.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            observed_generation: 0,
            last_transition_time: None,
        }
    }

    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

/// Upsert `condition` into the set, keyed by type.
///
/// Returns true when the stored set changed (used by reconcilers to skip
/// no-op status writes).
pub fn set_condition(
    conditions: &mut Vec<Condition>,
    mut condition: Condition,
    observed_generation: i64,
) -> bool {
    condition.observed_generation = observed_generation;

    match conditions
        .iter_mut()
        .find(|c| c.condition_type == condition.condition_type)
    {
        Some(existing) => {
            let flipped = existing.status != condition.status;
            let changed = flipped
                || existing.reason != condition.reason
                || existing.message != condition.message
                || existing.observed_generation != condition.observed_generation;
            if !changed {
                return false;
            }
            condition.last_transition_time = if flipped {
                Some(Utc::now())
            } else {
                existing.last_transition_time
            };
            *existing = condition;
            true
        }
        None => {
            condition.last_transition_time = Some(Utc::now());
            conditions.push(condition);
            true
        }
    }
}

/// Find a condition by type
pub fn get_condition<'a>(conditions: &'a [Condition], condition_type: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.condition_type == condition_type)
}

/// True iff the condition exists and its status is True
pub fn is_condition_true(conditions: &[Condition], condition_type: &str) -> bool {
    get_condition(conditions, condition_type).is_some_and(|c| c.is_true())
}
