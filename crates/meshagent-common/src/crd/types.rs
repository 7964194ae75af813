//! Status conditions for IstioRoute

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition type set on every reconciled route
pub const CONDITION_READY: &str = "Ready";

/// `True`, `False` or `Unknown`, as Kubernetes spells them
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition holds
    True,
    /// Condition does not hold
    False,
    /// Not evaluated yet
    #[default]
    Unknown,
}

impl From<bool> for ConditionStatus {
    fn from(holds: bool) -> Self {
        if holds {
            Self::True
        } else {
            Self::False
        }
    }
}

/// One entry of `status.conditions`
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type, e.g. `Ready`
    #[serde(rename = "type")]
    pub type_: String,

    /// Whether the condition holds
    pub status: ConditionStatus,

    /// CamelCase machine-readable reason
    pub reason: String,

    /// Human-readable detail
    pub message: String,

    /// When `status` last flipped
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// A condition that transitions now
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }

    /// Keep the previous transition time when the status did not flip
    pub fn since(mut self, previous: &[Condition]) -> Self {
        if let Some(prev) = previous
            .iter()
            .find(|c| c.type_ == self.type_ && c.status == self.status)
        {
            self.last_transition_time = prev.last_transition_time;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn condition_serializes_with_kubernetes_field_names() {
        let cond = Condition::new(CONDITION_READY, ConditionStatus::True, "BundlesApplied", "ok");
        let json = serde_json::to_value(&cond).unwrap();
        assert_eq!(json["type"], "Ready");
        assert_eq!(json["status"], "True");
        assert!(json.get("lastTransitionTime").is_some());
    }

    #[test]
    fn transition_time_survives_an_unchanged_status() {
        let mut earlier = Condition::new(CONDITION_READY, ConditionStatus::True, "BundlesApplied", "1");
        earlier.last_transition_time -= Duration::hours(1);
        let previous = vec![earlier.clone()];

        let same = Condition::new(CONDITION_READY, true.into(), "BundlesApplied", "2").since(&previous);
        assert_eq!(same.last_transition_time, earlier.last_transition_time);

        let flipped =
            Condition::new(CONDITION_READY, false.into(), "ReconcileFailed", "x").since(&previous);
        assert!(flipped.last_transition_time > earlier.last_transition_time);
    }
}
