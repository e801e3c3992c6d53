//! Per-recipient event queue with priority buckets, aging and critical retention

use std::collections::{BTreeMap, HashSet};

use tracing::warn;

use super::kind::{kind_priority, EventKind, GameEvent};
use crate::game::model::BotId;

/// Events older than this many turns are dropped unless critical
pub const MAX_EVENT_AGE: u32 = 2;

/// Maximum number of queued events per recipient
pub const MAX_QUEUE_SIZE: usize = 256;

/// Queue errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QueueError {
    #[error("Event queue for bot {recipient} is full ({capacity} events)")]
    Full { recipient: BotId, capacity: usize },
}

#[derive(Debug, Clone)]
struct QueuedEvent {
    event: GameEvent,
    kind: EventKind,
    seq: u64,
}

/// Receives events during a dispatch pass.
///
/// The queue is handed back so a handler can queue follow-up events; those
/// are delivered in the same pass when their kind is not already being handled.
pub trait EventHandler {
    fn handle(&mut self, event: &GameEvent, queue: &mut EventQueue);
}

impl EventHandler for Vec<GameEvent> {
    fn handle(&mut self, event: &GameEvent, _queue: &mut EventQueue) {
        self.push(event.clone());
    }
}

/// Events waiting to be delivered to one bot
#[derive(Debug)]
pub struct EventQueue {
    recipient: BotId,
    capacity: usize,
    buckets: BTreeMap<u32, Vec<QueuedEvent>>,
    len: usize,
    next_seq: u64,
    dropped: u64,
}

impl EventQueue {
    pub fn new(recipient: BotId) -> Self {
        Self::with_capacity(recipient, MAX_QUEUE_SIZE)
    }

    pub fn with_capacity(recipient: BotId, capacity: usize) -> Self {
        Self {
            recipient,
            capacity,
            buckets: BTreeMap::new(),
            len: 0,
            next_seq: 0,
            dropped: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of events dropped because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn contains(&self, predicate: impl Fn(&GameEvent) -> bool) -> bool {
        self.buckets.values().flatten().any(|q| predicate(&q.event))
    }

    /// Queue an event for this recipient.
    ///
    /// A full queue drops non-critical events. A critical event evicts the
    /// oldest event of the lowest priority instead, or is kept above capacity
    /// when everything queued is critical.
    pub fn push(&mut self, event: GameEvent) -> Result<(), QueueError> {
        let kind = event.kind_for(self.recipient);

        if self.len >= self.capacity {
            if !kind.is_critical() {
                self.dropped += 1;
                warn!(
                    bot_id = %self.recipient,
                    capacity = self.capacity,
                    ?kind,
                    "Event queue full, dropping event"
                );
                return Err(QueueError::Full {
                    recipient: self.recipient,
                    capacity: self.capacity,
                });
            }
            if !self.evict_one() {
                warn!(bot_id = %self.recipient, ?kind, "Event queue over capacity with critical events only");
            }
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.buckets
            .entry(kind_priority(kind))
            .or_default()
            .push(QueuedEvent { event, kind, seq });
        self.len += 1;
        Ok(())
    }

    /// Drop the oldest non-critical event of the lowest priority
    fn evict_one(&mut self) -> bool {
        for (_, bucket) in self.buckets.iter_mut().rev() {
            if let Some(pos) = bucket.iter().position(|q| !q.kind.is_critical()) {
                bucket.remove(pos);
                self.len -= 1;
                self.dropped += 1;
                return true;
            }
        }
        false
    }

    /// Remove non-critical events that happened more than `MAX_EVENT_AGE` turns before `turn`
    pub fn age_out(&mut self, turn: u32) -> usize {
        let mut removed = 0;
        for bucket in self.buckets.values_mut() {
            let before = bucket.len();
            bucket.retain(|q| q.kind.is_critical() || turn.saturating_sub(q.event.turn()) <= MAX_EVENT_AGE);
            removed += before - bucket.len();
        }
        self.buckets.retain(|_, bucket| !bucket.is_empty());
        self.len -= removed;
        removed
    }

    /// Deliver queued events to `handler` in priority order.
    ///
    /// Within a bucket the most recently added event goes first. Events
    /// queued by a handler that are more urgent than the event being handled
    /// are delivered before it returns. Events of a kind whose handler is
    /// still active are held back for the next pass.
    pub fn dispatch(&mut self, turn: u32, handler: &mut impl EventHandler) -> usize {
        self.age_out(turn);

        let mut active = HashSet::new();
        let mut held = Vec::new();
        let delivered = self.dispatch_nested(handler, &mut active, &mut held, None);
        for event in held {
            self.requeue(event);
        }
        delivered
    }

    fn dispatch_nested(
        &mut self,
        handler: &mut impl EventHandler,
        active: &mut HashSet<EventKind>,
        held: &mut Vec<QueuedEvent>,
        floor: Option<u32>,
    ) -> usize {
        let mut delivered = 0;

        while let Some(priority) = self.first_priority() {
            if floor.is_some_and(|f| priority >= f) {
                break;
            }
            let Some(next) = self.pop_next() else {
                break;
            };
            if active.contains(&next.kind) {
                held.push(next);
                break;
            }

            let mark = self.next_seq;
            active.insert(next.kind);
            handler.handle(&next.event, self);
            delivered += 1;
            delivered += self.dispatch_nested(handler, active, held, Some(priority));
            active.remove(&next.kind);

            self.hold_since(mark, next.kind, held);
        }

        delivered
    }

    /// Move events of `kind` queued at or after `mark` into `held`
    fn hold_since(&mut self, mark: u64, kind: EventKind, held: &mut Vec<QueuedEvent>) {
        let Some(bucket) = self.buckets.get_mut(&kind_priority(kind)) else {
            return;
        };
        let (fresh, kept): (Vec<_>, Vec<_>) = bucket
            .drain(..)
            .partition(|q| q.kind == kind && q.seq >= mark);
        *bucket = kept;
        if bucket.is_empty() {
            self.buckets.remove(&kind_priority(kind));
        }
        self.len -= fresh.len();
        held.extend(fresh);
    }

    fn first_priority(&self) -> Option<u32> {
        self.buckets.keys().next().copied()
    }

    fn pop_next(&mut self) -> Option<QueuedEvent> {
        let (&priority, bucket) = self.buckets.iter_mut().next()?;
        let newest = bucket
            .iter()
            .enumerate()
            .max_by_key(|(_, q)| q.seq)
            .map(|(i, _)| i)?;
        let event = bucket.remove(newest);
        if bucket.is_empty() {
            self.buckets.remove(&priority);
        }
        self.len -= 1;
        Some(event)
    }

    fn requeue(&mut self, event: QueuedEvent) {
        self.buckets.entry(kind_priority(event.kind)).or_default().push(event);
        self.len += 1;
    }

    /// Take every queued event without handler semantics, in dispatch order
    pub fn drain(&mut self, turn: u32) -> Vec<GameEvent> {
        let mut out = Vec::with_capacity(self.len);
        self.dispatch(turn, &mut out);
        out
    }

    pub fn clear(&mut self) {
        self.buckets.clear();
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ME: BotId = BotId(1);

    fn scan(turn: u32) -> GameEvent {
        GameEvent::ScannedBot {
            turn,
            scanned_by_bot_id: ME,
            scanned_bot_id: BotId(2),
            energy: 100.0,
            x: 0.0,
            y: 0.0,
            direction: 0.0,
            speed: 0.0,
        }
    }

    fn hit_wall(turn: u32) -> GameEvent {
        GameEvent::HitWall { turn, bot_id: ME }
    }

    #[test]
    fn non_critical_event_ages_out_after_two_turns() {
        let mut queue = EventQueue::new(ME);
        queue.push(scan(5)).expect("push");

        queue.age_out(7);
        assert_eq!(queue.len(), 1, "still present at T+2");

        queue.age_out(8);
        assert!(queue.is_empty(), "gone at T+3");
    }

    #[test]
    fn critical_events_never_age() {
        let mut queue = EventQueue::new(ME);
        queue.push(GameEvent::SkippedTurn { turn: 1 }).expect("push");
        queue.push(GameEvent::BotDeath { turn: 1, victim_id: ME }).expect("push");
        queue.push(GameEvent::WonRound { turn: 1 }).expect("push");
        queue.push(GameEvent::BotDeath { turn: 1, victim_id: BotId(9) }).expect("push");

        queue.age_out(1_000);
        assert_eq!(queue.len(), 3);
        assert!(!queue.contains(|e| e.victim() == Some(BotId(9))));
    }

    #[test]
    fn dispatch_walks_priorities_then_newest_first() {
        let mut queue = EventQueue::new(ME);
        queue.push(scan(3)).expect("push");
        queue.push(hit_wall(2)).expect("push");
        queue.push(hit_wall(3)).expect("push");
        queue.push(GameEvent::SkippedTurn { turn: 3 }).expect("push");

        let events = queue.drain(3);
        assert_eq!(
            events,
            vec![GameEvent::SkippedTurn { turn: 3 }, hit_wall(3), hit_wall(2), scan(3)]
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn full_queue_reports_and_drops_non_critical() {
        let mut queue = EventQueue::with_capacity(ME, 2);
        queue.push(scan(1)).expect("push");
        queue.push(scan(1)).expect("push");

        assert_eq!(
            queue.push(hit_wall(1)),
            Err(QueueError::Full { recipient: ME, capacity: 2 })
        );
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dropped(), 1);
    }

    #[test]
    fn critical_event_evicts_lowest_priority() {
        let mut queue = EventQueue::with_capacity(ME, 2);
        queue.push(hit_wall(1)).expect("push");
        queue.push(scan(1)).expect("push");

        queue.push(GameEvent::SkippedTurn { turn: 1 }).expect("critical admitted");
        assert_eq!(queue.len(), 2);
        assert!(!queue.contains(|e| matches!(e, GameEvent::ScannedBot { .. })));
        assert!(queue.contains(|e| matches!(e, GameEvent::HitWall { .. })));
    }

    #[test]
    fn critical_events_may_exceed_capacity() {
        let mut queue = EventQueue::with_capacity(ME, 1);
        queue.push(GameEvent::SkippedTurn { turn: 1 }).expect("push");
        queue.push(GameEvent::SkippedTurn { turn: 2 }).expect("push");
        assert_eq!(queue.len(), 2);
    }

    /// Handler that queues another event of the kind it is handling
    struct Echo {
        seen: Vec<GameEvent>,
    }

    impl EventHandler for Echo {
        fn handle(&mut self, event: &GameEvent, queue: &mut EventQueue) {
            self.seen.push(event.clone());
            if let GameEvent::HitWall { turn, .. } = event {
                let _ = queue.push(hit_wall(turn + 1));
                let _ = queue.push(GameEvent::SkippedTurn { turn: *turn });
            }
        }
    }

    #[test]
    fn same_kind_is_not_reentered() {
        let mut queue = EventQueue::new(ME);
        queue.push(hit_wall(4)).expect("push");

        let mut echo = Echo { seen: Vec::new() };
        queue.dispatch(4, &mut echo);

        // The more urgent skipped turn is delivered inside the hit-wall
        // handler, the second hit-wall waits for the next pass.
        assert_eq!(echo.seen, vec![hit_wall(4), GameEvent::SkippedTurn { turn: 4 }]);
        assert_eq!(queue.len(), 1);
        assert!(queue.contains(|e| *e == hit_wall(5)));
    }
}
