//! One running battle: world state, event hub and scores across rounds

use std::collections::{BTreeMap, BTreeSet, HashMap};

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{Audience, Candidate, Outbound};
use crate::config::GameSetup;
use crate::events::{Condition, EventHub, GameEvent};
use crate::game::model::{BotId, BotIntent};
use crate::game::step::{advance, CollisionFact, StepParams, TurnState};
use crate::scoring::{results_for, AccumulatedScores, BotResults, ScoreTracker};
use crate::ws::protocol::{BotSnapshot, BulletSnapshot, Participant, ServerMsg};

/// Outcome of closing a turn
#[derive(Debug, Default)]
pub struct TurnOutcome {
    pub outbound: Vec<Outbound>,
    /// The last round finished and final results were sent
    pub game_over: bool,
}

/// World, events and scores of a game in progress
#[derive(Debug)]
pub struct Battle {
    setup: GameSetup,
    params: StepParams,
    participants: BTreeMap<BotId, Candidate>,
    connected: BTreeSet<BotId>,
    rng: ChaCha8Rng,
    world: TurnState,
    hub: EventHub,
    round_scores: ScoreTracker,
    totals: AccumulatedScores,
    intents: HashMap<BotId, BotIntent>,
}

impl Battle {
    /// Set up round 1 at turn 0
    pub fn new(setup: GameSetup, participants: BTreeMap<BotId, Candidate>, seed: u64) -> Self {
        let ids: Vec<BotId> = participants.keys().copied().collect();
        let params = setup.step_params();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let world = TurnState::new_round(1, &ids, &params.arena, &mut rng);

        Self {
            setup,
            params,
            connected: ids.iter().copied().collect(),
            rng,
            world,
            hub: EventHub::new(&ids),
            round_scores: ScoreTracker::new(&ids),
            totals: AccumulatedScores::new(&ids),
            intents: HashMap::new(),
            participants,
        }
    }

    pub fn round(&self) -> u32 {
        self.world.round
    }

    pub fn turn(&self) -> u32 {
        self.world.turn
    }

    pub fn world(&self) -> &TurnState {
        &self.world
    }

    /// Test `condition` for `bot` every turn until the game ends
    pub fn register_condition(&mut self, bot: BotId, condition: Box<dyn Condition>) {
        self.hub.register_condition(bot, condition);
    }

    pub fn unregister_condition(&mut self, bot: BotId, name: &str) -> bool {
        self.hub.unregister_condition(bot, name)
    }

    pub fn participant_list(&self) -> Vec<Participant> {
        self.participants
            .iter()
            .map(|(&id, c)| Participant {
                id,
                client_id: c.client_id,
                name: c.name.clone(),
                version: c.version.clone(),
            })
            .collect()
    }

    pub fn bot_for_client(&self, client_id: Uuid) -> Option<BotId> {
        self.participants
            .iter()
            .find(|(_, c)| c.client_id == client_id)
            .map(|(&id, _)| id)
    }

    pub fn connected_count(&self) -> usize {
        self.connected.len()
    }

    /// Connected participants and observers
    pub fn everyone(&self, msg: ServerMsg) -> Vec<Outbound> {
        let mut out: Vec<Outbound> = self
            .connected
            .iter()
            .filter_map(|id| self.participants.get(id))
            .map(|c| Outbound::client(c.client_id, msg.clone()))
            .collect();
        out.push(Outbound::observers(msg));
        out
    }

    /// Buffer an intent for the current turn; a later one replaces it
    pub fn submit_intent(&mut self, bot: BotId, intent: BotIntent) {
        if self.world.bots.contains_key(&bot) {
            self.intents.insert(bot, intent);
        }
    }

    /// True when every alive, connected bot has submitted for this turn
    pub fn all_intents_received(&self) -> bool {
        self.world
            .bots
            .keys()
            .filter(|id| self.connected.contains(id))
            .all(|id| self.intents.contains_key(id))
    }

    /// Messages that open the current round: the round notice and the turn 0 tick
    pub fn round_start_messages(&self) -> Vec<Outbound> {
        let mut out = self.everyone(ServerMsg::RoundStarted { round: self.world.round });
        out.extend(self.tick_messages(&[]));
        out
    }

    /// Run one turn on the buffered intents and produce everything it sends
    pub fn close_turn(&mut self) -> TurnOutcome {
        let turn = self.world.turn;

        for id in self.world.bots.keys() {
            if self.connected.contains(id) && !self.intents.contains_key(id) {
                debug!(bot_id = %id, turn, "Skipped turn");
                self.hub.record(GameEvent::SkippedTurn { turn }, &[*id]);
            }
        }

        let intents = std::mem::take(&mut self.intents);
        let (next, facts) = advance(&self.world, &intents, &self.params);
        self.world = next;

        let died = self.score_facts(&facts);
        let overflows = self.hub.record_facts(self.world.turn, &facts);
        if !overflows.is_empty() {
            warn!(dropped = overflows.len(), turn = self.world.turn, "Events dropped on full queues");
        }
        self.hub.broadcast(GameEvent::Tick {
            turn: self.world.turn,
            round: self.world.round,
        });
        self.hub.evaluate_conditions(&self.world);

        if !self.round_over() {
            return TurnOutcome {
                outbound: self.tick_messages(&died),
                game_over: false,
            };
        }
        self.finish_round(&died)
    }

    /// Score one turn's facts in full; returns the bots that died
    fn score_facts(&mut self, facts: &[CollisionFact]) -> Vec<BotId> {
        let mut died = Vec::new();
        for fact in facts {
            match fact {
                CollisionFact::BulletHitBot {
                    bullet,
                    victim,
                    damage,
                    killed,
                    ..
                } => self
                    .round_scores
                    .register_bullet_hit(bullet.owner, *victim, *damage, *killed),
                CollisionFact::BotHitBot {
                    bot,
                    victim,
                    rammed: true,
                    victim_killed,
                    ..
                } => self.round_scores.register_ram_hit(*bot, *victim, *victim_killed),
                CollisionFact::BotDied { bot } => died.push(*bot),
                _ => {}
            }
        }
        if !died.is_empty() {
            self.round_scores.register_deaths(&died);
        }
        died
    }

    fn round_over(&self) -> bool {
        let alive = self.world.alive_count();
        alive == 0 || (self.participants.len() > 1 && alive <= 1)
    }

    fn finish_round(&mut self, died: &[BotId]) -> TurnOutcome {
        let round = self.world.round;
        let turn = self.world.turn;

        if let Some(&winner) = self.world.bots.keys().next().filter(|_| self.world.alive_count() == 1) {
            self.hub.record(GameEvent::WonRound { turn }, &[winner]);
        }
        self.round_scores.register_survivors();
        let scores = self.round_scores.round_scores();
        self.totals.add_round(&scores);

        info!(round, turn, alive = self.world.alive_count(), "Round ended");

        let mut outbound = self.tick_messages(died);
        let round_results = results_for(&scores, |id| self.describe(id));
        outbound.extend(self.everyone(ServerMsg::RoundEnded {
            round,
            turn,
            results: round_results,
        }));

        let enough_bots = self.participants.len() < 2 || self.connected.len() >= 2;
        if round < self.setup.number_of_rounds && enough_bots && !self.connected.is_empty() {
            self.start_next_round();
            outbound.extend(self.round_start_messages());
            return TurnOutcome {
                outbound,
                game_over: false,
            };
        }

        outbound.extend(self.everyone(ServerMsg::GameEnded {
            number_of_rounds: self.totals.rounds(),
            results: self.results(),
        }));
        TurnOutcome {
            outbound,
            game_over: true,
        }
    }

    fn start_next_round(&mut self) {
        let ids: Vec<BotId> = self.connected.iter().copied().collect();
        self.world = TurnState::new_round(self.world.round + 1, &ids, &self.params.arena, &mut self.rng);
        self.hub.clear();
        self.round_scores = ScoreTracker::new(&ids);
        self.intents.clear();
    }

    /// A participant's connection went away: its bot leaves the world for good
    pub fn disconnect(&mut self, bot: BotId) {
        if !self.connected.remove(&bot) {
            return;
        }
        self.intents.remove(&bot);
        self.hub.remove(bot);

        if self.world.remove_bot(bot).is_some() {
            self.round_scores.register_deaths(&[bot]);
        }
        let turn = self.world.turn;
        let remaining: Vec<BotId> = self.connected.iter().copied().collect();
        self.hub.record(GameEvent::BotDisconnected { turn, bot_id: bot }, &remaining);
        info!(bot_id = %bot, remaining = remaining.len(), "Participant disconnected");
    }

    /// Final standings over all finished rounds
    pub fn results(&self) -> Vec<BotResults> {
        self.totals.results(|id| self.describe(id))
    }

    fn describe(&self, id: BotId) -> (String, String) {
        self.participants
            .get(&id)
            .map(|c| (c.name.clone(), c.version.clone()))
            .unwrap_or_default()
    }

    /// Ticks for bots alive or killed this turn, and one for observers
    fn tick_messages(&self, died: &[BotId]) -> Vec<Outbound> {
        let round = self.world.round;
        let turn = self.world.turn;
        let bullet_states: Vec<BulletSnapshot> = self.world.bullets.iter().map(BulletSnapshot::from).collect();
        let mut out = Vec::new();

        let recipients: Vec<BotId> = self
            .world
            .bots
            .keys()
            .chain(died.iter())
            .copied()
            .filter(|id| self.connected.contains(id))
            .collect();

        for id in recipients {
            let (Some(bot), Some(candidate)) = (self.world.bot(id), self.participants.get(&id)) else {
                continue;
            };
            out.push(Outbound::client(
                candidate.client_id,
                ServerMsg::TickForBot {
                    round,
                    turn,
                    bot_state: BotSnapshot::from(bot),
                    bullet_states: self.world.bullets_of(id).map(BulletSnapshot::from).collect(),
                    events: self.hub.dispatch(id, turn),
                },
            ));
        }

        let bot_states = self
            .world
            .bots
            .values()
            .chain(died.iter().filter_map(|id| self.world.dead.get(id)))
            .map(BotSnapshot::from)
            .collect();
        out.push(Outbound {
            to: Audience::Observers,
            msg: ServerMsg::TickForObserver {
                round,
                turn,
                bot_states,
                bullet_states,
                events: self.hub.take_observer_events(),
            },
        });
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::condition::LowEnergy;

    fn candidates(n: u32) -> BTreeMap<BotId, Candidate> {
        (1..=n)
            .map(|i| {
                (
                    BotId(i),
                    Candidate {
                        client_id: Uuid::new_v4(),
                        name: format!("bot{i}"),
                        version: "1.0".to_string(),
                    },
                )
            })
            .collect()
    }

    fn setup(rounds: u32) -> GameSetup {
        GameSetup {
            number_of_rounds: rounds,
            ..GameSetup::for_type("classic").expect("preset")
        }
    }

    fn client_ticks(out: &[Outbound]) -> usize {
        out.iter()
            .filter(|o| matches!(o.msg, ServerMsg::TickForBot { .. }))
            .count()
    }

    #[test]
    fn round_start_sends_turn_zero_ticks() {
        let battle = Battle::new(setup(1), candidates(3), 7);
        let out = battle.round_start_messages();
        assert_eq!(client_ticks(&out), 3);
        assert!(out
            .iter()
            .any(|o| o.to == Audience::Observers && matches!(o.msg, ServerMsg::TickForObserver { turn: 0, .. })));
    }

    #[test]
    fn missing_intents_produce_skipped_turns() {
        let mut battle = Battle::new(setup(1), candidates(2), 7);
        battle.submit_intent(BotId(1), BotIntent::default());
        assert!(!battle.all_intents_received());

        let outcome = battle.close_turn();
        let skipped_for = |client: Uuid| {
            outcome.outbound.iter().any(|o| {
                o.to == Audience::Client(client)
                    && matches!(&o.msg, ServerMsg::TickForBot { events, .. }
                        if events.iter().any(|e| matches!(e, GameEvent::SkippedTurn { turn: 0 })))
            })
        };
        let clients: Vec<Uuid> = battle.participants.values().map(|c| c.client_id).collect();
        assert!(!skipped_for(clients[0]));
        assert!(skipped_for(clients[1]));
        assert_eq!(battle.turn(), 1);
    }

    #[test]
    fn last_intent_wins() {
        let mut battle = Battle::new(setup(1), candidates(2), 7);
        let slow = BotIntent {
            target_speed: Some(1.0),
            ..Default::default()
        };
        let fast = BotIntent {
            target_speed: Some(8.0),
            ..Default::default()
        };
        battle.submit_intent(BotId(1), slow);
        battle.submit_intent(BotId(1), fast);
        battle.submit_intent(BotId(2), BotIntent::default());
        assert!(battle.all_intents_received());

        battle.close_turn();
        assert_eq!(battle.world().bots[&BotId(1)].intent.target_speed, 8.0);
    }

    #[test]
    fn disconnect_ends_round_and_game() {
        let mut battle = Battle::new(setup(3), candidates(2), 7);
        battle.disconnect(BotId(2));
        assert_eq!(battle.connected_count(), 1);

        let outcome = battle.close_turn();
        assert!(outcome.game_over, "one connected bot cannot play further rounds");

        let ended = outcome.outbound.iter().find_map(|o| match &o.msg {
            ServerMsg::GameEnded { results, number_of_rounds } => Some((results.clone(), *number_of_rounds)),
            _ => None,
        });
        let (results, rounds) = ended.expect("game ended");
        assert_eq!(rounds, 1);
        assert_eq!(results[0].id, BotId(1));
        assert_eq!(results[0].first_places, 1);
    }

    #[test]
    fn winner_receives_won_round() {
        let mut battle = Battle::new(setup(2), candidates(2), 7);
        let winner_client = battle.participants[&BotId(1)].client_id;
        if let Some(loser) = battle.world.bots.get_mut(&BotId(2)) {
            loser.energy = -1.0;
        }
        let outcome = battle.close_turn();

        let won = outcome.outbound.iter().any(|o| {
            o.to == Audience::Client(winner_client)
                && matches!(&o.msg, ServerMsg::TickForBot { events, .. }
                    if events.iter().any(|e| matches!(e, GameEvent::WonRound { .. })))
        });
        assert!(won);
        assert!(!outcome.game_over);
        assert_eq!(battle.round(), 2);
        assert_eq!(battle.turn(), 0);
        assert!(outcome
            .outbound
            .iter()
            .any(|o| matches!(o.msg, ServerMsg::RoundStarted { round: 2 })));
    }

    #[test]
    fn conditions_carry_over_to_later_rounds() {
        let mut battle = Battle::new(setup(2), candidates(2), 7);
        battle.register_condition(BotId(1), Box::new(LowEnergy { threshold: 1000.0 }));
        let client = battle.participants[&BotId(1)].client_id;
        if let Some(loser) = battle.world.bots.get_mut(&BotId(2)) {
            loser.energy = -1.0;
        }
        battle.close_turn();
        assert_eq!(battle.round(), 2);

        let outcome = battle.close_turn();
        let met = outcome.outbound.iter().any(|o| {
            o.to == Audience::Client(client)
                && matches!(&o.msg, ServerMsg::TickForBot { round: 2, events, .. }
                    if events.iter().any(|e| matches!(e, GameEvent::Condition { name, .. } if name == "low_energy")))
        });
        assert!(met);
    }
}
