//! Session state machine.
//!
//! Pure and synchronous: every request returns the messages it produces and
//! leaves at most one timer armed. The owner measures time and reports a
//! timer back with [`SessionMachine::on_timer`]; timers are identified by an
//! epoch so one that was replaced or cancelled is ignored.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use tracing::{debug, info};
use uuid::Uuid;

use super::battle::Battle;
use super::registry::SessionStatus;
use super::{Candidate, Outbound, SessionError, SessionState};
use crate::config::GameSetup;
use crate::events::ConditionSpec;
use crate::game::model::{BotId, BotIntent};
use crate::ws::protocol::ServerMsg;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Candidates must report ready before it fires
    Ready,
    /// Closes the current turn
    Turn,
}

/// A deadline the owner should wait for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timer {
    pub kind: TimerKind,
    pub epoch: u64,
    /// Fire this long after arming
    pub after: Duration,
    /// Fire as early as this once every participant has submitted an intent
    pub early_after: Option<Duration>,
}

pub struct SessionMachine {
    id: Uuid,
    seed: u64,
    state: SessionState,
    setup: Option<GameSetup>,
    candidates: BTreeMap<BotId, Candidate>,
    ready: BTreeSet<BotId>,
    battle: Option<Battle>,
    tps: i32,
    timer: Option<Timer>,
    epoch: u64,
}

impl SessionMachine {
    pub fn new(id: Uuid, seed: u64) -> Self {
        Self {
            id,
            seed,
            state: SessionState::AwaitingParticipants,
            setup: None,
            candidates: BTreeMap::new(),
            ready: BTreeSet::new(),
            battle: None,
            tps: 0,
            timer: None,
            epoch: 0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn timer(&self) -> Option<Timer> {
        self.timer
    }

    pub fn tps(&self) -> i32 {
        self.tps
    }

    pub fn battle(&self) -> Option<&Battle> {
        self.battle.as_ref()
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            id: self.id,
            state: self.state,
            game_type: self.setup.as_ref().map(|s| s.game_type.clone()),
            round: self.battle.as_ref().map(Battle::round).unwrap_or(0),
            turn: self.battle.as_ref().map(Battle::turn).unwrap_or(0),
            participants: self.battle.as_ref().map(Battle::connected_count).unwrap_or(0),
        }
    }

    /// AwaitingParticipants -> AwaitingReady
    pub fn start_game(&mut self, setup: GameSetup, candidates: Vec<Candidate>) -> Result<Vec<Outbound>, SessionError> {
        self.expect_state("start a game", &[SessionState::AwaitingParticipants])?;
        setup.validate()?;
        setup.check_candidates(candidates.len())?;

        let mut seen = BTreeSet::new();
        for c in &candidates {
            if !seen.insert(c.client_id) {
                return Err(SessionError::DuplicateCandidate(c.client_id));
            }
        }

        self.candidates = candidates
            .into_iter()
            .enumerate()
            .map(|(i, c)| (BotId(i as u32 + 1), c))
            .collect();
        self.ready.clear();
        self.tps = setup.default_tps;

        let out = self
            .candidates
            .iter()
            .map(|(&id, c)| {
                Outbound::client(
                    c.client_id,
                    ServerMsg::GameStartedForBot {
                        my_id: id,
                        game_setup: setup.clone(),
                    },
                )
            })
            .collect();

        info!(
            session_id = %self.id,
            game_type = %setup.game_type,
            candidates = self.candidates.len(),
            "Game starting, awaiting ready"
        );
        self.arm(TimerKind::Ready, setup.ready_timeout(), None);
        self.setup = Some(setup);
        self.state = SessionState::AwaitingReady;
        Ok(out)
    }

    /// A candidate acknowledged the game start
    pub fn bot_ready(&mut self, client_id: Uuid) -> Result<Vec<Outbound>, SessionError> {
        self.expect_state("report ready", &[SessionState::AwaitingReady])?;
        let bot = self
            .candidate_bot(client_id)
            .ok_or(SessionError::NotACandidate(client_id))?;
        self.ready.insert(bot);

        if self.ready.len() >= self.min_participants() {
            return Ok(self.begin_battle());
        }
        Ok(Vec::new())
    }

    /// Buffer a participant's intent for the turn being collected
    pub fn submit_intent(&mut self, client_id: Uuid, intent: BotIntent) -> Result<(), SessionError> {
        self.expect_state("submit an intent", &[SessionState::Running, SessionState::Paused])?;
        let battle = self.battle.as_mut().ok_or(SessionError::NotAParticipant(client_id))?;
        let bot = battle
            .bot_for_client(client_id)
            .ok_or(SessionError::NotAParticipant(client_id))?;
        battle.submit_intent(bot, intent);
        Ok(())
    }

    pub fn all_intents_received(&self) -> bool {
        self.battle.as_ref().is_some_and(Battle::all_intents_received)
    }

    /// The armed timer with `epoch` fired
    pub fn on_timer(&mut self, epoch: u64) -> Vec<Outbound> {
        let Some(timer) = self.timer.filter(|t| t.epoch == epoch) else {
            return Vec::new();
        };
        self.timer = None;

        match (timer.kind, self.state) {
            (TimerKind::Ready, SessionState::AwaitingReady) => {
                if self.ready.len() >= self.min_participants() {
                    self.begin_battle()
                } else {
                    info!(
                        session_id = %self.id,
                        ready = self.ready.len(),
                        required = self.min_participants(),
                        "Ready timeout with too few bots"
                    );
                    self.back_to_lobby("Not enough bots were ready")
                }
            }
            (TimerKind::Turn, SessionState::Running) => self.run_turn(),
            _ => Vec::new(),
        }
    }

    pub fn pause(&mut self) -> Result<Vec<Outbound>, SessionError> {
        self.expect_state("pause", &[SessionState::Running])?;
        self.disarm();
        self.state = SessionState::Paused;
        info!(session_id = %self.id, "Game paused");
        Ok(self.everyone(ServerMsg::GamePaused))
    }

    pub fn resume(&mut self) -> Result<Vec<Outbound>, SessionError> {
        self.expect_state("resume", &[SessionState::Paused])?;
        self.state = SessionState::Running;
        self.arm_turn_timer();
        info!(session_id = %self.id, "Game resumed");
        Ok(self.everyone(ServerMsg::GameResumed))
    }

    /// Run exactly one turn while paused, then stay paused
    pub fn next_turn(&mut self) -> Result<Vec<Outbound>, SessionError> {
        self.expect_state("step a turn", &[SessionState::Paused])?;
        Ok(self.run_turn())
    }

    pub fn change_tps(&mut self, tps: i32) -> Result<Vec<Outbound>, SessionError> {
        if tps < -1 {
            return Err(SessionError::InvalidTps(tps));
        }
        self.tps = tps;
        if self.state == SessionState::Running {
            self.arm_turn_timer();
        }
        info!(session_id = %self.id, tps, "Turns per second changed");
        Ok(self.everyone(ServerMsg::TpsChanged { tps }))
    }

    /// Stop the session from any state. Stopping twice does nothing.
    pub fn abort(&mut self, reason: &str) -> Vec<Outbound> {
        if self.state == SessionState::Stopped {
            return Vec::new();
        }
        let out = self.everyone(ServerMsg::GameAborted {
            reason: reason.to_string(),
        });
        self.disarm();
        self.state = SessionState::Stopped;
        info!(session_id = %self.id, reason, "Game aborted");
        out
    }

    /// A client connection closed
    pub fn disconnect(&mut self, client_id: Uuid) -> Vec<Outbound> {
        match self.state {
            SessionState::AwaitingReady => {
                let Some(bot) = self.candidate_bot(client_id) else {
                    return Vec::new();
                };
                self.candidates.remove(&bot);
                self.ready.remove(&bot);
                if self.candidates.len() < self.min_participants() {
                    return self.back_to_lobby("Not enough bots left");
                }
                if self.ready.len() >= self.min_participants() && self.ready.len() == self.candidates.len() {
                    return self.begin_battle();
                }
                Vec::new()
            }
            SessionState::Running | SessionState::Paused => {
                let Some(battle) = self.battle.as_mut() else {
                    return Vec::new();
                };
                let Some(bot) = battle.bot_for_client(client_id) else {
                    return Vec::new();
                };
                battle.disconnect(bot);
                if battle.connected_count() == 0 {
                    return self.abort("All participants disconnected");
                }
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    /// Register a built-in condition for the requesting bot; it stays until
    /// removed or the game ends
    pub fn add_condition(&mut self, client_id: Uuid, spec: &ConditionSpec) -> Result<(), SessionError> {
        self.expect_state("add a condition", &[SessionState::Running, SessionState::Paused])?;
        let battle = self.battle.as_mut().ok_or(SessionError::NotAParticipant(client_id))?;
        let bot = battle
            .bot_for_client(client_id)
            .ok_or(SessionError::NotAParticipant(client_id))?;
        debug!(session_id = %self.id, bot_id = %bot, ?spec, "Condition added");
        battle.register_condition(bot, spec.build());
        Ok(())
    }

    pub fn remove_condition(&mut self, client_id: Uuid, name: &str) -> Result<(), SessionError> {
        self.expect_state("remove a condition", &[SessionState::Running, SessionState::Paused])?;
        let battle = self.battle.as_mut().ok_or(SessionError::NotAParticipant(client_id))?;
        let bot = battle
            .bot_for_client(client_id)
            .ok_or(SessionError::NotAParticipant(client_id))?;
        if !battle.unregister_condition(bot, name) {
            debug!(session_id = %self.id, bot_id = %bot, condition = name, "No such condition");
        }
        Ok(())
    }

    fn begin_battle(&mut self) -> Vec<Outbound> {
        let Some(setup) = self.setup.clone() else {
            return Vec::new();
        };

        let mut out = Vec::new();
        let mut participants = BTreeMap::new();
        for (id, candidate) in std::mem::take(&mut self.candidates) {
            if self.ready.contains(&id) {
                participants.insert(id, candidate);
            } else {
                out.push(Outbound::client(
                    candidate.client_id,
                    ServerMsg::GameAborted {
                        reason: "Not ready before the game started".to_string(),
                    },
                ));
            }
        }
        self.ready.clear();

        let battle = Battle::new(setup.clone(), participants, self.seed);
        out.push(Outbound::observers(ServerMsg::GameStartedForObserver {
            game_setup: setup,
            participants: battle.participant_list(),
        }));
        out.extend(battle.round_start_messages());

        info!(
            session_id = %self.id,
            participants = battle.connected_count(),
            "Game running"
        );
        self.battle = Some(battle);
        self.state = SessionState::Running;
        self.arm_turn_timer();
        out
    }

    fn run_turn(&mut self) -> Vec<Outbound> {
        let Some(battle) = self.battle.as_mut() else {
            return Vec::new();
        };
        let outcome = battle.close_turn();

        if outcome.game_over {
            info!(session_id = %self.id, rounds = battle.round(), "Game ended");
            self.disarm();
            self.state = SessionState::Stopped;
        } else if self.state == SessionState::Running {
            self.arm_turn_timer();
        }
        outcome.outbound
    }

    /// Return to AwaitingParticipants, telling candidates and observers
    fn back_to_lobby(&mut self, reason: &str) -> Vec<Outbound> {
        let out = self.everyone(ServerMsg::GameAborted {
            reason: reason.to_string(),
        });
        self.disarm();
        self.candidates.clear();
        self.ready.clear();
        self.setup = None;
        self.state = SessionState::AwaitingParticipants;
        out
    }

    /// Candidates (before the battle) or connected participants, plus observers
    fn everyone(&self, msg: ServerMsg) -> Vec<Outbound> {
        if let Some(battle) = &self.battle {
            return battle.everyone(msg);
        }
        let mut out: Vec<Outbound> = self
            .candidates
            .values()
            .map(|c| Outbound::client(c.client_id, msg.clone()))
            .collect();
        out.push(Outbound::observers(msg));
        out
    }

    fn candidate_bot(&self, client_id: Uuid) -> Option<BotId> {
        self.candidates
            .iter()
            .find(|(_, c)| c.client_id == client_id)
            .map(|(&id, _)| id)
    }

    fn min_participants(&self) -> usize {
        self.setup.as_ref().map(|s| s.min_participants as usize).unwrap_or(1)
    }

    fn expect_state(&self, request: &'static str, allowed: &[SessionState]) -> Result<(), SessionError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(SessionError::InvalidState {
                request,
                state: self.state,
            })
        }
    }

    fn arm(&mut self, kind: TimerKind, after: Duration, early_after: Option<Duration>) {
        self.epoch += 1;
        self.timer = Some(Timer {
            kind,
            epoch: self.epoch,
            after,
            early_after,
        });
    }

    /// Turn deadline: the turn timeout, stretched to the tps period; 0 tps holds
    fn arm_turn_timer(&mut self) {
        let Some(turn_timeout) = self.setup.as_ref().map(GameSetup::turn_timeout) else {
            return;
        };
        let period = match self.tps {
            0 => {
                self.disarm();
                return;
            }
            tps if tps > 0 => Duration::from_secs(1) / tps as u32,
            _ => Duration::ZERO,
        };
        self.arm(TimerKind::Turn, turn_timeout.max(period), Some(period));
    }

    fn disarm(&mut self) {
        self.epoch += 1;
        self.timer = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::GameEvent;
    use crate::session::Audience;

    fn candidates(n: usize) -> Vec<Candidate> {
        (0..n)
            .map(|i| Candidate {
                client_id: Uuid::new_v4(),
                name: format!("bot{i}"),
                version: "1.0".to_string(),
            })
            .collect()
    }

    fn classic() -> GameSetup {
        GameSetup::for_type("classic").expect("preset")
    }

    fn awaiting_ready(n: usize) -> (SessionMachine, Vec<Candidate>) {
        let mut machine = SessionMachine::new(Uuid::new_v4(), 42);
        let cands = candidates(n);
        machine.start_game(classic(), cands.clone()).expect("start");
        (machine, cands)
    }

    fn running() -> (SessionMachine, Vec<Candidate>) {
        let (mut machine, cands) = awaiting_ready(2);
        for c in &cands {
            machine.bot_ready(c.client_id).expect("ready");
        }
        assert_eq!(machine.state(), SessionState::Running);
        (machine, cands)
    }

    #[test]
    fn start_notifies_each_candidate_and_arms_ready_timer() {
        let mut machine = SessionMachine::new(Uuid::new_v4(), 1);
        let cands = candidates(3);
        let out = machine.start_game(classic(), cands.clone()).expect("start");

        assert_eq!(machine.state(), SessionState::AwaitingReady);
        assert_eq!(out.len(), 3);
        assert_eq!(
            out[1],
            Outbound::client(
                cands[1].client_id,
                ServerMsg::GameStartedForBot {
                    my_id: BotId(2),
                    game_setup: classic()
                }
            )
        );
        let timer = machine.timer().expect("armed");
        assert_eq!(timer.kind, TimerKind::Ready);
        assert_eq!(timer.after, Duration::from_millis(1_000));
    }

    #[test]
    fn start_rejects_unreachable_minimum() {
        let mut machine = SessionMachine::new(Uuid::new_v4(), 1);
        let err = machine.start_game(classic(), candidates(1)).expect_err("too few");
        assert_eq!(err.code(), "invalid_setup");
        assert_eq!(machine.state(), SessionState::AwaitingParticipants);
    }

    #[test]
    fn start_is_only_valid_while_awaiting_participants() {
        let (mut machine, _) = awaiting_ready(2);
        assert!(matches!(
            machine.start_game(classic(), candidates(2)),
            Err(SessionError::InvalidState { .. })
        ));
    }

    #[test]
    fn reaching_minimum_runs_without_waiting_for_timeout() {
        let (mut machine, cands) = awaiting_ready(3);
        assert!(machine.bot_ready(cands[0].client_id).expect("ready").is_empty());
        let out = machine.bot_ready(cands[2].client_id).expect("ready");

        assert_eq!(machine.state(), SessionState::Running);
        assert_eq!(machine.timer().map(|t| t.kind), Some(TimerKind::Turn));
        assert!(out
            .iter()
            .any(|o| matches!(o.msg, ServerMsg::GameStartedForObserver { ref participants, .. } if participants.len() == 2)));
        // The candidate that was not ready is told it is out
        assert!(out.iter().any(|o| o.to == Audience::Client(cands[1].client_id)
            && matches!(o.msg, ServerMsg::GameAborted { .. })));
    }

    #[test]
    fn ready_timeout_below_minimum_aborts_to_lobby() {
        let (mut machine, cands) = awaiting_ready(2);
        machine.bot_ready(cands[0].client_id).expect("ready");

        let epoch = machine.timer().expect("armed").epoch;
        let out = machine.on_timer(epoch);

        assert_eq!(machine.state(), SessionState::AwaitingParticipants);
        assert!(machine.timer().is_none());
        let aborted = out
            .iter()
            .filter(|o| matches!(o.msg, ServerMsg::GameAborted { .. }))
            .count();
        assert_eq!(aborted, 3, "two candidates and the observers");
    }

    #[test]
    fn stale_timer_is_ignored() {
        let (mut machine, _) = running();
        let stale = machine.timer().expect("armed").epoch;
        machine.pause().expect("pause");
        assert!(machine.on_timer(stale).is_empty());
        assert_eq!(machine.state(), SessionState::Paused);
    }

    #[test]
    fn turn_timer_advances_the_battle() {
        let (mut machine, _) = running();
        let epoch = machine.timer().expect("armed").epoch;
        let out = machine.on_timer(epoch);

        assert_eq!(machine.battle().map(Battle::turn), Some(1));
        assert!(out.iter().any(|o| matches!(o.msg, ServerMsg::TickForObserver { turn: 1, .. })));
        assert!(machine.timer().expect("rearmed").epoch > epoch);
    }

    #[test]
    fn bot_condition_is_reported_on_its_next_tick() {
        let (mut machine, cands) = running();
        let spec = ConditionSpec::LowEnergy { threshold: 1000.0 };
        machine.add_condition(cands[0].client_id, &spec).expect("added");
        assert!(matches!(
            machine.add_condition(Uuid::new_v4(), &spec),
            Err(SessionError::NotAParticipant(_))
        ));

        let epoch = machine.timer().expect("armed").epoch;
        let out = machine.on_timer(epoch);
        let met_for = |client: Uuid| {
            out.iter().any(|o| {
                o.to == Audience::Client(client)
                    && matches!(&o.msg, ServerMsg::TickForBot { events, .. }
                        if events.iter().any(|e| matches!(e, GameEvent::Condition { .. })))
            })
        };
        assert!(met_for(cands[0].client_id));
        assert!(!met_for(cands[1].client_id));

        machine.remove_condition(cands[0].client_id, "low_energy").expect("removed");
        let epoch = machine.timer().expect("armed").epoch;
        let out = machine.on_timer(epoch);
        assert!(!out.iter().any(|o| matches!(&o.msg, ServerMsg::TickForBot { events, .. }
            if events.iter().any(|e| matches!(e, GameEvent::Condition { .. })))));
    }

    #[test]
    fn conditions_need_a_running_battle() {
        let (mut machine, cands) = awaiting_ready(2);
        assert!(matches!(
            machine.add_condition(cands[0].client_id, &ConditionSpec::LastBotStanding),
            Err(SessionError::InvalidState { .. })
        ));
    }

    #[test]
    fn single_step_while_paused_stays_paused() {
        let (mut machine, cands) = running();
        machine.pause().expect("pause");
        machine
            .submit_intent(cands[0].client_id, BotIntent::default())
            .expect("intents accepted while paused");

        machine.next_turn().expect("step");
        assert_eq!(machine.state(), SessionState::Paused);
        assert_eq!(machine.battle().map(Battle::turn), Some(1));
        assert!(machine.timer().is_none());

        machine.resume().expect("resume");
        assert_eq!(machine.state(), SessionState::Running);
        assert!(machine.next_turn().is_err());
    }

    #[test]
    fn abort_is_idempotent() {
        let (mut machine, _) = running();
        let first = machine.abort("stop requested");
        assert_eq!(machine.state(), SessionState::Stopped);
        assert_eq!(first.len(), 3);
        assert!(machine.abort("again").is_empty());
        assert!(machine.pause().is_err());
    }

    #[test]
    fn losing_every_participant_aborts() {
        let (mut machine, cands) = running();
        assert!(machine.disconnect(cands[0].client_id).is_empty());
        let out = machine.disconnect(cands[1].client_id);
        assert_eq!(machine.state(), SessionState::Stopped);
        assert!(out.iter().any(|o| matches!(o.msg, ServerMsg::GameAborted { .. })));
    }

    #[test]
    fn zero_tps_holds_the_battle() {
        let (mut machine, _) = running();
        machine.change_tps(0).expect("tps");
        assert!(machine.timer().is_none());

        machine.change_tps(-1).expect("tps");
        let timer = machine.timer().expect("armed");
        assert_eq!(timer.after, Duration::from_millis(30));
        assert_eq!(timer.early_after, Some(Duration::ZERO));

        assert_eq!(machine.change_tps(-2), Err(SessionError::InvalidTps(-2)));
    }

    #[test]
    fn intents_from_strangers_are_rejected() {
        let (mut machine, _) = running();
        assert_eq!(
            machine.submit_intent(Uuid::nil(), BotIntent::default()),
            Err(SessionError::NotAParticipant(Uuid::nil()))
        );
    }
}
