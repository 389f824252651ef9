//! Slot clock, fork-aware schedule, and per-slot phase timer (§4.1).

use crate::types::{Epoch, Slot};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::trace;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimeError {
    #[error("fork start_time {new} does not strictly exceed the previous fork's start_time {previous}")]
    NonIncreasingForkStart { previous: u64, new: u64 },
    #[error("fork seconds_per_slot must be non-zero")]
    ZeroSlotDuration,
}

/// `(genesis_time, seconds_per_slot)` slot clock (§4.1).
#[derive(Debug, Clone, Copy)]
pub struct SlotClock {
    genesis_time: u64,
    seconds_per_slot: u64,
}

impl SlotClock {
    pub fn new(genesis_time: u64, seconds_per_slot: u64) -> Self {
        SlotClock {
            genesis_time,
            seconds_per_slot,
        }
    }

    /// `current_slot(t) = max(0, (t - genesis) / seconds_per_slot)`.
    pub fn current_slot(&self, now: u64) -> Slot {
        if now <= self.genesis_time {
            return 0;
        }
        (now - self.genesis_time) / self.seconds_per_slot
    }

    pub fn epoch_of(&self, slot: Slot, slots_per_epoch: u64) -> Epoch {
        slot / slots_per_epoch
    }

    pub fn is_epoch_boundary(&self, slot: Slot, slots_per_epoch: u64) -> bool {
        (slot + 1) % slots_per_epoch == 0
    }

    pub fn attestation_deadline(&self) -> u64 {
        self.seconds_per_slot / 3
    }
}

/// A fork transition: at `start_time`, slot duration changes to
/// `seconds_per_slot`.
#[derive(Debug, Clone, Copy)]
struct ForkSegment {
    start_time: u64,
    seconds_per_slot: u64,
}

/// Ordered list of fork transitions (§4.1). Slot at time `t` sums
/// completed slots in every fully-elapsed segment plus partial slots
/// in the currently active one.
#[derive(Debug, Clone)]
pub struct ForkSchedule {
    segments: Vec<ForkSegment>,
}

impl ForkSchedule {
    pub fn new(genesis_time: u64, genesis_seconds_per_slot: u64) -> Result<Self, TimeError> {
        if genesis_seconds_per_slot == 0 {
            return Err(TimeError::ZeroSlotDuration);
        }
        Ok(ForkSchedule {
            segments: vec![ForkSegment {
                start_time: genesis_time,
                seconds_per_slot: genesis_seconds_per_slot,
            }],
        })
    }

    pub fn add_fork(&mut self, start_time: u64, seconds_per_slot: u64) -> Result<(), TimeError> {
        if seconds_per_slot == 0 {
            return Err(TimeError::ZeroSlotDuration);
        }
        let previous = self.segments.last().expect("at least genesis segment present").start_time;
        if start_time <= previous {
            return Err(TimeError::NonIncreasingForkStart { previous, new: start_time });
        }
        self.segments.push(ForkSegment { start_time, seconds_per_slot });
        Ok(())
    }

    /// Slot at time `t`, summing whole slots from each elapsed segment
    /// and partial slots from the segment `t` falls in.
    pub fn slot_at(&self, t: u64) -> Slot {
        let mut slot = 0u64;
        for (i, segment) in self.segments.iter().enumerate() {
            if t < segment.start_time {
                break;
            }
            let segment_end = self.segments.get(i + 1).map(|next| next.start_time);
            let elapsed = match segment_end {
                Some(end) if t >= end => end - segment.start_time,
                _ => t - segment.start_time,
            };
            slot += elapsed / segment.seconds_per_slot;
        }
        slot
    }
}

/// One of the three sub-phases a slot is divided into (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotPhase {
    Propose,
    Attest,
    Aggregate,
}

#[derive(Debug, Clone, Copy)]
pub struct PhaseBoundary {
    pub slot: Slot,
    pub phase: SlotPhase,
}

/// Subdivides each slot into (Propose, Attest, Aggregate) windows and
/// hands boundary events to subscribers over a bounded broadcast
/// channel. A slow subscriber drops events instead of blocking the
/// timer thread.
pub struct PhaseTimer {
    durations: [Duration; 3],
    sender: broadcast::Sender<PhaseBoundary>,
}

const SUBSCRIBER_CHANNEL_CAPACITY: usize = 8;

impl PhaseTimer {
    /// `propose_ms`/`attest_ms`/`aggregate_ms` are the requested
    /// durations in milliseconds; if all three are zero, the slot
    /// is split evenly with the remainder given to the last phase.
    pub fn new(slot_duration: Duration, propose_ms: u64, attest_ms: u64, aggregate_ms: u64) -> Self {
        let durations = if propose_ms == 0 && attest_ms == 0 && aggregate_ms == 0 {
            let total_ms = slot_duration.as_millis() as u64;
            let third = total_ms / 3;
            let remainder = total_ms - third * 2;
            [
                Duration::from_millis(third),
                Duration::from_millis(third),
                Duration::from_millis(remainder),
            ]
        } else {
            [
                Duration::from_millis(propose_ms),
                Duration::from_millis(attest_ms),
                Duration::from_millis(aggregate_ms),
            ]
        };
        let (sender, _) = broadcast::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        PhaseTimer { durations, sender }
    }

    pub fn durations(&self) -> [Duration; 3] {
        self.durations
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PhaseBoundary> {
        self.sender.subscribe()
    }

    /// Publishes a phase boundary; slow subscribers that have fallen
    /// behind the channel capacity simply miss it rather than stalling
    /// the publisher.
    pub fn publish(&self, slot: Slot, phase: SlotPhase) {
        let boundary = PhaseBoundary { slot, phase };
        if self.sender.send(boundary).is_err() {
            trace!(slot, ?phase, "no phase subscribers currently attached");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_slot_is_zero_before_genesis() {
        let clock = SlotClock::new(1_000, 12);
        assert_eq!(clock.current_slot(500), 0);
    }

    #[test]
    fn current_slot_advances_by_seconds_per_slot() {
        let clock = SlotClock::new(0, 12);
        assert_eq!(clock.current_slot(12), 1);
        assert_eq!(clock.current_slot(23), 1);
        assert_eq!(clock.current_slot(24), 2);
    }

    #[test]
    fn epoch_boundary_is_last_slot_of_epoch() {
        let clock = SlotClock::new(0, 12);
        assert!(clock.is_epoch_boundary(31, 32));
        assert!(!clock.is_epoch_boundary(30, 32));
    }

    #[test]
    fn fork_schedule_rejects_non_increasing_start() {
        let mut schedule = ForkSchedule::new(0, 12).unwrap();
        assert_eq!(
            schedule.add_fork(0, 6),
            Err(TimeError::NonIncreasingForkStart { previous: 0, new: 0 })
        );
    }

    #[test]
    fn fork_schedule_sums_slots_across_segments() {
        let mut schedule = ForkSchedule::new(0, 12).unwrap();
        schedule.add_fork(120, 6).unwrap();
        assert_eq!(schedule.slot_at(60), 5);
        assert_eq!(schedule.slot_at(120), 10);
        assert_eq!(schedule.slot_at(132), 12);
    }

    #[test]
    fn phase_timer_splits_evenly_when_unspecified() {
        let timer = PhaseTimer::new(Duration::from_millis(12_000), 0, 0, 0);
        let durations = timer.durations();
        let total: u64 = durations.iter().map(|d| d.as_millis() as u64).sum();
        assert_eq!(total, 12_000);
    }

    #[test]
    fn phase_timer_publish_without_subscribers_does_not_panic() {
        let timer = PhaseTimer::new(Duration::from_millis(12_000), 4_000, 4_000, 4_000);
        timer.publish(0, SlotPhase::Propose);
    }

    #[tokio::test]
    async fn subscriber_receives_published_boundary() {
        let timer = PhaseTimer::new(Duration::from_millis(12_000), 4_000, 4_000, 4_000);
        let mut rx = timer.subscribe();
        timer.publish(3, SlotPhase::Attest);
        let boundary = rx.recv().await.unwrap();
        assert_eq!(boundary.slot, 3);
        assert_eq!(boundary.phase, SlotPhase::Attest);
    }
}
