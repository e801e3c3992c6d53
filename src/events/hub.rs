//! Event hub: one queue per participant plus the observer log of a turn

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::debug;

use super::condition::{Condition, ConditionContext, ConditionSet};
use super::kind::{route_facts, GameEvent};
use super::queue::{EventQueue, QueueError};
use crate::game::model::BotId;
use crate::game::step::{CollisionFact, TurnState};

/// Routes a battle's events to participant queues and the observer stream.
///
/// Appending only needs `&self`; each queue has its own lock, held for the
/// whole of a dispatch pass so two passes for one bot cannot interleave.
#[derive(Debug)]
pub struct EventHub {
    participants: Vec<BotId>,
    queues: HashMap<BotId, Mutex<EventQueue>>,
    conditions: HashMap<BotId, ConditionSet>,
    observer_log: Mutex<Vec<GameEvent>>,
}

impl EventHub {
    pub fn new(participants: &[BotId]) -> Self {
        Self {
            participants: participants.to_vec(),
            queues: participants
                .iter()
                .map(|&id| (id, Mutex::new(EventQueue::new(id))))
                .collect(),
            conditions: HashMap::new(),
            observer_log: Mutex::new(Vec::new()),
        }
    }

    /// Queue `event` for each of `recipients` and log it for observers.
    ///
    /// Recipients without a queue are skipped. Overflows are returned, the
    /// event still reaches every other recipient.
    pub fn record(&self, event: GameEvent, recipients: &[BotId]) -> Vec<QueueError> {
        let mut overflows = Vec::new();
        for id in recipients {
            if let Some(queue) = self.queues.get(id) {
                if let Err(e) = queue.lock().push(event.clone()) {
                    overflows.push(e);
                }
            }
        }
        self.observer_log.lock().push(event);
        overflows
    }

    /// Queue an event for every participant
    pub fn broadcast(&self, event: GameEvent) -> Vec<QueueError> {
        let everyone = self.participants.clone();
        self.record(event, &everyone)
    }

    /// Convert the facts of one turn into events and queue them
    pub fn record_facts(&self, turn: u32, facts: &[CollisionFact]) -> Vec<QueueError> {
        route_facts(turn, facts, &self.participants)
            .into_iter()
            .flat_map(|routed| self.record(routed.event, &routed.recipients))
            .collect()
    }

    pub fn register_condition(&mut self, bot: BotId, condition: Box<dyn Condition>) {
        self.conditions.entry(bot).or_default().add(condition);
    }

    pub fn unregister_condition(&mut self, bot: BotId, name: &str) -> bool {
        self.conditions.get_mut(&bot).is_some_and(|set| set.remove(name))
    }

    /// Test every alive bot's conditions against `state` and queue the ones met
    pub fn evaluate_conditions(&self, state: &TurnState) -> usize {
        let mut met_total = 0;
        for (id, set) in &self.conditions {
            let Some(bot) = state.bots.get(id) else {
                continue;
            };
            let ctx = ConditionContext {
                round: state.round,
                turn: state.turn,
                bot,
                alive_count: state.alive_count(),
            };
            for name in set.met(&ctx) {
                debug!(bot_id = %id, condition = %name, turn = state.turn, "Condition met");
                self.record(GameEvent::Condition { turn: state.turn, name }, &[*id]);
                met_total += 1;
            }
        }
        met_total
    }

    /// Events for `bot` at `turn`, in dispatch order
    pub fn dispatch(&self, bot: BotId, turn: u32) -> Vec<GameEvent> {
        match self.queues.get(&bot) {
            Some(queue) => queue.lock().drain(turn),
            None => Vec::new(),
        }
    }

    /// Everything recorded since the last call, in record order
    pub fn take_observer_events(&self) -> Vec<GameEvent> {
        std::mem::take(&mut *self.observer_log.lock())
    }

    /// Drop a participant's queue, e.g. after it disconnected
    pub fn remove(&mut self, bot: BotId) {
        self.queues.remove(&bot);
        self.conditions.remove(&bot);
    }

    /// Empty every queue at a round boundary. Registered conditions stay.
    pub fn clear(&self) {
        for queue in self.queues.values() {
            queue.lock().clear();
        }
        self.observer_log.lock().clear();
    }

    pub fn queued(&self, bot: BotId) -> usize {
        self.queues.get(&bot).map(|q| q.lock().len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::condition::LowEnergy;
    use crate::game::arena::Arena;
    use crate::game::model::{BulletId, BulletState};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn ids() -> Vec<BotId> {
        vec![BotId(1), BotId(2), BotId(3)]
    }

    #[test]
    fn facts_reach_only_interested_bots() {
        let hub = EventHub::new(&ids());
        let bullet = BulletState {
            id: BulletId(1),
            owner: BotId(1),
            x: 10.0,
            y: 10.0,
            direction: 0.0,
            power: 1.0,
            color: None,
        };
        hub.record_facts(
            4,
            &[
                CollisionFact::BulletFired { bullet: bullet.clone() },
                CollisionFact::BulletHitBot {
                    bullet,
                    victim: BotId(2),
                    damage: 4.0,
                    victim_energy: 96.0,
                    killed: false,
                },
            ],
        );

        assert_eq!(hub.dispatch(BotId(1), 4).len(), 2);
        assert_eq!(hub.dispatch(BotId(2), 4).len(), 1);
        assert!(hub.dispatch(BotId(3), 4).is_empty());
        assert_eq!(hub.take_observer_events().len(), 2);
        assert!(hub.take_observer_events().is_empty());
    }

    #[test]
    fn victim_sees_own_death_first() {
        let hub = EventHub::new(&ids());
        hub.broadcast(GameEvent::Tick { turn: 9, round: 1 });
        hub.record_facts(9, &[CollisionFact::BotDied { bot: BotId(2) }]);

        let victim = hub.dispatch(BotId(2), 9);
        assert!(matches!(victim[0], GameEvent::BotDeath { .. }));

        let other = hub.dispatch(BotId(1), 9);
        assert!(matches!(other[0], GameEvent::Tick { .. }));
    }

    #[test]
    fn concurrent_appends_are_all_kept() {
        let hub = EventHub::new(&ids());
        std::thread::scope(|s| {
            for t in 0..4 {
                let hub = &hub;
                s.spawn(move || {
                    for _ in 0..10 {
                        hub.record(GameEvent::HitWall { turn: t, bot_id: BotId(1) }, &[BotId(1)]);
                    }
                });
            }
        });
        assert_eq!(hub.queued(BotId(1)), 40);
        assert_eq!(hub.take_observer_events().len(), 40);
    }

    #[test]
    fn met_conditions_become_events() {
        let mut hub = EventHub::new(&ids());
        hub.register_condition(BotId(1), Box::new(LowEnergy { threshold: 150.0 }));
        hub.register_condition(BotId(2), Box::new(LowEnergy { threshold: 10.0 }));

        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let state = TurnState::new_round(1, &ids(), &Arena::new(800.0, 600.0), &mut rng);
        assert_eq!(hub.evaluate_conditions(&state), 1);

        let events = hub.dispatch(BotId(1), 0);
        assert_eq!(
            events,
            vec![GameEvent::Condition {
                turn: 0,
                name: "low_energy".to_string()
            }]
        );
        assert!(hub.unregister_condition(BotId(1), "low_energy"));
    }
}
