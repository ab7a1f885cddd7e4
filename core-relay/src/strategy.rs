//! # Buffering Strategies
//!
//! The closed set of policies that decide which pushed buffers a
//! [`DeferredClient`](crate::DeferredClient) keeps for its consumer.
//!
//! - [`BufferMode::Latest`]: keep only the newest buffer. Lowest latency.
//! - [`BufferMode::LatestFromKeyframe`]: until the consumer pulls its first
//!   buffer (pre-roll), keep a group of pictures that starts at a sync point
//!   so a fresh decoder never starts mid-group. Once started, behave like
//!   `Latest` until the client is reset.

use crate::buffer::Buffer;
use core_runtime::events::DropReason;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::num::NonZeroUsize;

/// Which buffering strategy a client uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferMode {
    #[default]
    Latest,
    LatestFromKeyframe,
}

/// What a pre-rolling keyframe queue does when it is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Discard the whole queue and wait for the next sync point.
    #[default]
    DropAndResync,
    /// Block the producer until the consumer makes room.
    Block,
}

/// Options fixed when a surface's client is created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientOptions {
    pub mode: BufferMode,
    /// Pre-roll queue depth. `None` is unbounded.
    pub max_buffers: Option<NonZeroUsize>,
    pub overflow: OverflowPolicy,
}

impl ClientOptions {
    pub fn latest() -> Self {
        Self::default()
    }

    pub fn latest_from_keyframe(max_buffers: Option<NonZeroUsize>) -> Self {
        Self {
            mode: BufferMode::LatestFromKeyframe,
            max_buffers,
            overflow: OverflowPolicy::DropAndResync,
        }
    }

    pub fn with_overflow(mut self, overflow: OverflowPolicy) -> Self {
        self.overflow = overflow;
        self
    }
}

// ============================================================================
// Strategy State
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    /// The consumer has not pulled a data buffer since the last reset.
    Preroll,
    Started,
}

/// Result of offering a buffer to a strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Push {
    Done(PushOutcome),
    /// The queue is full under [`OverflowPolicy::Block`]. Nothing changed and
    /// the buffer is handed back.
    Full(Buffer),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PushOutcome {
    pub queued: bool,
    /// Buffers discarded by this push, including the pushed one if rejected.
    pub dropped: u64,
    pub reason: Option<DropReason>,
}

#[derive(Debug)]
pub(crate) enum BufferingStrategy {
    Latest {
        pending: Option<Buffer>,
        phase: Phase,
    },
    LatestFromKeyframe {
        queue: VecDeque<Buffer>,
        max_buffers: Option<NonZeroUsize>,
        overflow: OverflowPolicy,
        phase: Phase,
    },
}

impl BufferingStrategy {
    pub fn new(options: &ClientOptions) -> Self {
        match options.mode {
            BufferMode::Latest => BufferingStrategy::Latest {
                pending: None,
                phase: Phase::Preroll,
            },
            BufferMode::LatestFromKeyframe => BufferingStrategy::LatestFromKeyframe {
                queue: VecDeque::new(),
                max_buffers: options.max_buffers,
                overflow: options.overflow,
                phase: Phase::Preroll,
            },
        }
    }

    pub fn push(&mut self, buf: Buffer) -> Push {
        match self {
            BufferingStrategy::Latest { pending, .. } => {
                let dropped = u64::from(pending.replace(buf).is_some());
                Push::Done(replaced(dropped))
            }
            BufferingStrategy::LatestFromKeyframe {
                queue,
                phase: Phase::Started,
                ..
            } => {
                let dropped = queue.len() as u64;
                queue.clear();
                queue.push_back(buf);
                Push::Done(replaced(dropped))
            }
            BufferingStrategy::LatestFromKeyframe {
                queue,
                max_buffers,
                overflow,
                phase: Phase::Preroll,
            } => {
                let mut dropped = 0u64;
                let mut reason = None;

                // A sync point starts a new group; the old one is obsolete.
                if buf.is_sync_point() && !queue.is_empty() {
                    dropped += queue.len() as u64;
                    reason = Some(DropReason::Replaced);
                    queue.clear();
                }

                if let Some(max) = max_buffers {
                    if queue.len() >= max.get() {
                        match overflow {
                            OverflowPolicy::Block => return Push::Full(buf),
                            OverflowPolicy::DropAndResync => {
                                dropped += queue.len() as u64;
                                reason = Some(DropReason::QueueOverflow);
                                queue.clear();
                            }
                        }
                    }
                }

                let anchored = queue.front().is_some_and(Buffer::is_sync_point);
                if buf.is_sync_point() || anchored {
                    queue.push_back(buf);
                    Push::Done(PushOutcome {
                        queued: true,
                        dropped,
                        reason,
                    })
                } else {
                    Push::Done(PushOutcome {
                        queued: false,
                        dropped: dropped + 1,
                        reason: reason.or(Some(DropReason::AwaitingKeyframe)),
                    })
                }
            }
        }
    }

    /// Pops the oldest pending buffer and marks consumption started.
    pub fn pop(&mut self) -> Option<Buffer> {
        let (buf, phase) = match self {
            BufferingStrategy::Latest { pending, phase } => (pending.take(), phase),
            BufferingStrategy::LatestFromKeyframe { queue, phase, .. } => {
                (queue.pop_front(), phase)
            }
        };
        if buf.is_some() {
            *phase = Phase::Started;
        }
        buf
    }

    /// Discards pending data without leaving the current phase.
    pub fn clear(&mut self) -> u64 {
        match self {
            BufferingStrategy::Latest { pending, .. } => u64::from(pending.take().is_some()),
            BufferingStrategy::LatestFromKeyframe { queue, .. } => {
                let dropped = queue.len() as u64;
                queue.clear();
                dropped
            }
        }
    }

    /// Discards pending data and returns to pre-roll.
    pub fn reset(&mut self) -> u64 {
        let dropped = self.clear();
        match self {
            BufferingStrategy::Latest { phase, .. }
            | BufferingStrategy::LatestFromKeyframe { phase, .. } => *phase = Phase::Preroll,
        }
        dropped
    }

    pub fn len(&self) -> usize {
        match self {
            BufferingStrategy::Latest { pending, .. } => usize::from(pending.is_some()),
            BufferingStrategy::LatestFromKeyframe { queue, .. } => queue.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn phase(&self) -> Phase {
        match self {
            BufferingStrategy::Latest { phase, .. }
            | BufferingStrategy::LatestFromKeyframe { phase, .. } => *phase,
        }
    }
}

fn replaced(dropped: u64) -> PushOutcome {
    PushOutcome {
        queued: true,
        dropped,
        reason: (dropped > 0).then_some(DropReason::Replaced),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(tag: u8) -> Buffer {
        Buffer::new(vec![tag])
    }

    fn delta(tag: u8) -> Buffer {
        Buffer::delta(vec![tag])
    }

    fn keyframe_strategy(max: Option<usize>, overflow: OverflowPolicy) -> BufferingStrategy {
        BufferingStrategy::new(
            &ClientOptions::latest_from_keyframe(max.and_then(NonZeroUsize::new))
                .with_overflow(overflow),
        )
    }

    fn done(push: Push) -> PushOutcome {
        match push {
            Push::Done(outcome) => outcome,
            Push::Full(_) => panic!("unexpected Full"),
        }
    }

    #[test]
    fn test_latest_replaces_pending() {
        let mut strategy = BufferingStrategy::new(&ClientOptions::latest());

        assert_eq!(done(strategy.push(key(1))).dropped, 0);
        let outcome = done(strategy.push(delta(2)));
        assert_eq!(outcome.dropped, 1);
        assert_eq!(outcome.reason, Some(DropReason::Replaced));

        assert_eq!(strategy.len(), 1);
        assert_eq!(strategy.pop(), Some(delta(2)));
        assert_eq!(strategy.pop(), None);
    }

    #[test]
    fn test_latest_accepts_delta_first() {
        let mut strategy = BufferingStrategy::new(&ClientOptions::latest());
        assert!(done(strategy.push(delta(1))).queued);
    }

    #[test]
    fn test_preroll_rejects_leading_delta() {
        let mut strategy = keyframe_strategy(None, OverflowPolicy::DropAndResync);

        let outcome = done(strategy.push(delta(1)));
        assert!(!outcome.queued);
        assert_eq!(outcome.reason, Some(DropReason::AwaitingKeyframe));
        assert!(strategy.is_empty());
    }

    #[test]
    fn test_preroll_keeps_group_from_sync_point() {
        let mut strategy = keyframe_strategy(None, OverflowPolicy::DropAndResync);

        strategy.push(delta(0));
        strategy.push(key(1));
        strategy.push(delta(2));
        strategy.push(delta(3));

        assert_eq!(strategy.len(), 3);
        assert_eq!(strategy.pop(), Some(key(1)));
        assert_eq!(strategy.phase(), Phase::Started);
    }

    #[test]
    fn test_new_sync_point_restarts_group() {
        let mut strategy = keyframe_strategy(None, OverflowPolicy::DropAndResync);

        strategy.push(key(1));
        strategy.push(delta(2));
        let outcome = done(strategy.push(key(3)));

        assert_eq!(outcome.dropped, 2);
        assert_eq!(strategy.len(), 1);
        assert_eq!(strategy.pop(), Some(key(3)));
    }

    #[test]
    fn test_overflow_drops_and_resyncs() {
        let mut strategy = keyframe_strategy(Some(2), OverflowPolicy::DropAndResync);

        strategy.push(key(1));
        strategy.push(delta(2));
        let outcome = done(strategy.push(delta(3)));

        assert!(!outcome.queued);
        assert_eq!(outcome.dropped, 3);
        assert_eq!(outcome.reason, Some(DropReason::QueueOverflow));
        assert!(strategy.is_empty());

        // Deltas stay rejected until the next sync point.
        assert!(!done(strategy.push(delta(4))).queued);
        assert!(done(strategy.push(key(5))).queued);
    }

    #[test]
    fn test_overflow_block_reports_full() {
        let mut strategy = keyframe_strategy(Some(1), OverflowPolicy::Block);

        strategy.push(key(1));
        assert_eq!(strategy.push(delta(2)), Push::Full(delta(2)));
        assert_eq!(strategy.len(), 1);

        // A sync point never blocks: it replaces the group.
        assert!(done(strategy.push(key(3))).queued);
    }

    #[test]
    fn test_started_behaves_like_latest() {
        let mut strategy = keyframe_strategy(None, OverflowPolicy::DropAndResync);

        strategy.push(key(1));
        strategy.pop();

        assert!(done(strategy.push(delta(2))).queued);
        assert_eq!(done(strategy.push(delta(3))).dropped, 1);
        assert_eq!(strategy.pop(), Some(delta(3)));
    }

    #[test]
    fn test_reset_returns_to_preroll() {
        let mut strategy = keyframe_strategy(None, OverflowPolicy::DropAndResync);

        strategy.push(key(1));
        strategy.pop();
        strategy.push(delta(2));

        assert_eq!(strategy.reset(), 1);
        assert_eq!(strategy.phase(), Phase::Preroll);
        assert!(!done(strategy.push(delta(3))).queued);
    }

    #[test]
    fn test_clear_keeps_phase() {
        let mut strategy = BufferingStrategy::new(&ClientOptions::latest());
        strategy.push(key(1));
        strategy.pop();
        strategy.push(key(2));

        assert_eq!(strategy.clear(), 1);
        assert_eq!(strategy.phase(), Phase::Started);
    }

    #[test]
    fn test_options_serde_names() {
        let options = ClientOptions::latest_from_keyframe(NonZeroUsize::new(8))
            .with_overflow(OverflowPolicy::Block);
        let json = serde_json::to_string(&options).unwrap();

        assert!(json.contains("\"latest_from_keyframe\""));
        assert!(json.contains("\"block\""));
        assert_eq!(serde_json::from_str::<ClientOptions>(&json).unwrap(), options);
    }
}
