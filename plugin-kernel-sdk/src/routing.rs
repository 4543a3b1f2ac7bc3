//! # Shared Routing Vocabulary
//!
//! Types common to both plugin authors (who attach labels to a deployed
//! instance) and the kernel's runtime (which scores candidate instances
//! against a call's requested labels). The selection algorithm itself lives
//! in `plugin-kernel::runtime` since it needs the live instance pool; this
//! module only carries the vocabulary both sides agree on.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A request's or an instance's label set. Order is irrelevant; keys are
/// compared for exact match, values for exact match on the matching key.
pub type Labels = HashMap<String, String>;

/// An instance's weighted-random traffic share, read from
/// `properties.trafficWeight`. Defaults to 100 when unset, matching
/// [`crate::definition::PluginDefinition::traffic_weight`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficWeight(pub u32);

impl Default for TrafficWeight {
    fn default() -> Self {
        TrafficWeight(100)
    }
}

/// Outcome of scoring one candidate instance against a call's requested
/// labels, per the label-match step of instance selection: `+10` per exact
/// key/value match, immediate rejection if a shared key's value differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelScore {
    /// No requested label conflicted with this instance's labels; carries the
    /// accumulated match score.
    Matched(u32),
    /// A requested label's key was present on the instance with a different
    /// value — this candidate is out of consideration entirely.
    Rejected,
}

/// Score one instance's labels against a call's requested labels.
pub fn score_labels(instance_labels: &Labels, requested: &Labels) -> LabelScore {
    let mut score = 0u32;
    for (key, want) in requested {
        match instance_labels.get(key) {
            Some(have) if have == want => score += 10,
            Some(_) => return LabelScore::Rejected,
            None => {}
        }
    }
    LabelScore::Matched(score)
}

/// Outcome of one routing decision, surfaced to callers/metrics that want to
/// know not just which instance was picked but whether it was the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingDecision {
    /// The default instance was selected (no labels, or labels resolved to it).
    Stable,
    /// A non-default instance was selected — canary traffic.
    Canary,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_requested_labels_scores_zero_no_reject() {
        let instance: Labels = [("env".to_string(), "prod".to_string())].into();
        let requested: Labels = HashMap::new();
        assert_eq!(score_labels(&instance, &requested), LabelScore::Matched(0));
    }

    #[test]
    fn matching_label_scores_ten() {
        let instance: Labels = [("env".to_string(), "canary".to_string())].into();
        let requested: Labels = [("env".to_string(), "canary".to_string())].into();
        assert_eq!(score_labels(&instance, &requested), LabelScore::Matched(10));
    }

    #[test]
    fn conflicting_label_rejects() {
        let instance: Labels = [("env".to_string(), "prod".to_string())].into();
        let requested: Labels = [("env".to_string(), "canary".to_string())].into();
        assert_eq!(score_labels(&instance, &requested), LabelScore::Rejected);
    }

    #[test]
    fn missing_key_on_instance_does_not_reject() {
        let instance: Labels = HashMap::new();
        let requested: Labels = [("env".to_string(), "canary".to_string())].into();
        assert_eq!(score_labels(&instance, &requested), LabelScore::Matched(0));
    }
}
