//! Picks the hand to follow when a frame holds several.

use serde::{Deserialize, Serialize};

use crate::hand::HandInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackPolicy {
    /// Follow the hand whose anchor is closest to the last followed one.
    #[default]
    Nearest,
    /// Always take the first detected hand.
    First,
}

#[derive(Debug, Default)]
pub struct HandTracker {
    policy: TrackPolicy,
    last: Option<HandInfo>,
}

impl HandTracker {
    pub fn new(policy: TrackPolicy) -> Self {
        Self { policy, last: None }
    }

    /// An empty frame drops the tracked hand.
    pub fn select(&mut self, hands: &[HandInfo]) -> Option<HandInfo> {
        let chosen = match (self.policy, self.last.as_ref()) {
            _ if hands.is_empty() => None,
            (TrackPolicy::Nearest, Some(last)) => hands
                .iter()
                .min_by(|a, b| {
                    a.anchor_distance(last)
                        .total_cmp(&b.anchor_distance(last))
                })
                .cloned(),
            _ => hands.first().cloned(),
        };
        self.last = chosen.clone();
        chosen
    }
}
