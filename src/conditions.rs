//! Sync condition bookkeeping
//!
//! Conditions are a small ordered list keyed by type. An update policy
//! controls whether repeated identical outcomes advance the probe
//! timestamp; the transition timestamp advances only when the status
//! actually changes. A condition absent from the list is appended only when
//! its new status is True, which keeps False no-ops from inflating status.

use chrono::Utc;

use crate::crd::{ConditionStatus, SyncCondition, SyncConditionType};

/// Policy controlling when an existing condition is rewritten
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateConditionCheck {
    /// Update only when the status changes
    Never,
    /// Update on every probe
    Always,
    /// Update when the status, reason, or message changes
    IfReasonOrMessageChange,
}

/// Find a condition of the given type in the list
pub fn find_sync_condition(
    conditions: &[SyncCondition],
    type_: SyncConditionType,
) -> Option<&SyncCondition> {
    conditions.iter().find(|c| c.type_ == type_)
}

fn should_update(existing: &SyncCondition, candidate: &SyncCondition, check: UpdateConditionCheck) -> bool {
    if existing.status != candidate.status {
        return true;
    }
    match check {
        UpdateConditionCheck::Never => false,
        UpdateConditionCheck::Always => true,
        UpdateConditionCheck::IfReasonOrMessageChange => {
            existing.reason != candidate.reason || existing.message != candidate.message
        }
    }
}

/// Set a condition in the list according to the update policy
///
/// Returns the updated list. New conditions are appended only when their
/// status is True.
pub fn set_sync_condition(
    mut conditions: Vec<SyncCondition>,
    type_: SyncConditionType,
    status: ConditionStatus,
    reason: impl Into<String>,
    message: impl Into<String>,
    check: UpdateConditionCheck,
) -> Vec<SyncCondition> {
    let now = Utc::now();
    let candidate = SyncCondition {
        type_,
        status,
        reason: reason.into(),
        message: message.into(),
        last_probe_time: now,
        last_transition_time: now,
    };

    match conditions.iter_mut().find(|c| c.type_ == type_) {
        None => {
            if status == ConditionStatus::True {
                conditions.push(candidate);
            }
        }
        Some(existing) => {
            if should_update(existing, &candidate, check) {
                if existing.status != candidate.status {
                    existing.last_transition_time = now;
                }
                existing.status = candidate.status;
                existing.reason = candidate.reason;
                existing.message = candidate.message;
                existing.last_probe_time = now;
            }
        }
    }

    conditions
}
