use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceDecision {
    /// Replay the payload into the main queue.
    Forward,
    /// Acknowledge without forwarding.
    Discard,
}

/// Partitions a staged message against the checkpoint fence.
///
/// A message is forwarded only if the fence is strictly after its enqueue
/// timestamp; equal instants discard. Without a fence (no checkpoint was
/// ever written) everything predates it and is forwarded. A message missing
/// its timestamp never predates a present fence.
pub fn decide(fence: Option<DateTime<Utc>>, enqueued_at: Option<DateTime<Utc>>) -> FenceDecision {
    match (fence, enqueued_at) {
        (None, _) => FenceDecision::Forward,
        (Some(fence), Some(enqueued_at)) if fence > enqueued_at => FenceDecision::Forward,
        (Some(_), _) => FenceDecision::Discard,
    }
}
