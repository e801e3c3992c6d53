//! Session task: owns a state machine and turns its timers into real deadlines

use std::future::pending;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{info, warn};
use uuid::Uuid;

use super::machine::SessionMachine;
use super::registry::SessionStatus;
use super::{Candidate, Outbound, SessionError, SessionState};
use crate::config::GameSetup;
use crate::events::ConditionSpec;
use crate::game::model::BotIntent;
use crate::ws::protocol::ServerMsg;

/// Requests delivered to a session task. `from` is the requesting connection.
#[derive(Debug)]
pub enum SessionCommand {
    Start {
        from: Uuid,
        setup: GameSetup,
        candidates: Vec<Candidate>,
    },
    Ready {
        client_id: Uuid,
    },
    Intent {
        client_id: Uuid,
        intent: BotIntent,
    },
    AddCondition {
        client_id: Uuid,
        condition: ConditionSpec,
    },
    RemoveCondition {
        client_id: Uuid,
        name: String,
    },
    Pause {
        from: Uuid,
    },
    Resume {
        from: Uuid,
    },
    NextTurn {
        from: Uuid,
    },
    ChangeTps {
        from: Uuid,
        tps: i32,
    },
    Stop {
        from: Uuid,
    },
    Disconnect {
        client_id: Uuid,
    },
}

/// Handle to a running session
#[derive(Clone)]
pub struct SessionHandle {
    pub id: Uuid,
    pub commands: mpsc::Sender<SessionCommand>,
    status: Arc<RwLock<SessionStatus>>,
}

impl SessionHandle {
    pub async fn send(&self, command: SessionCommand) -> Result<(), SessionError> {
        self.commands.send(command).await.map_err(|_| SessionError::Closed)
    }

    pub fn status(&self) -> SessionStatus {
        self.status.read().clone()
    }

    pub fn state(&self) -> SessionState {
        self.status.read().state
    }
}

/// The task driving one session
pub struct GameSession {
    machine: SessionMachine,
    commands: mpsc::Receiver<SessionCommand>,
    outbound: mpsc::Sender<Outbound>,
    status: Arc<RwLock<SessionStatus>>,
    /// Epoch of the machine timer being waited for and when it was armed
    armed: Option<(u64, Instant)>,
    deadline: Option<Instant>,
}

impl GameSession {
    /// Create a session; its messages go to `outbound`
    pub fn new(id: Uuid, seed: u64, outbound: mpsc::Sender<Outbound>) -> (Self, SessionHandle) {
        let (command_tx, command_rx) = mpsc::channel(256);
        let machine = SessionMachine::new(id, seed);
        let status = Arc::new(RwLock::new(machine.status()));

        let handle = SessionHandle {
            id,
            commands: command_tx,
            status: status.clone(),
        };

        let session = Self {
            machine,
            commands: command_rx,
            outbound,
            status,
            armed: None,
            deadline: None,
        };

        (session, handle)
    }

    /// Serve commands and deadlines until the session stops
    pub async fn run(mut self) {
        let id = self.machine.id();
        info!(session_id = %id, "Session opened");

        loop {
            let deadline = self.deadline;
            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        // Every handle is gone
                        let out = self.machine.abort("Server shutting down");
                        self.emit(out).await;
                        break;
                    };
                    let out = self.handle(command);
                    self.emit(out).await;
                }
                _ = wait_until(deadline) => {
                    if let Some((epoch, _)) = self.armed.take() {
                        let out = self.machine.on_timer(epoch);
                        self.emit(out).await;
                    }
                }
            }

            self.sync_timer();
            *self.status.write() = self.machine.status();

            if self.machine.state() == SessionState::Stopped {
                break;
            }
        }

        info!(session_id = %id, "Session closed");
    }

    fn handle(&mut self, command: SessionCommand) -> Vec<Outbound> {
        let (from, result) = match command {
            SessionCommand::Start {
                from,
                setup,
                candidates,
            } => (from, self.machine.start_game(setup, candidates)),
            SessionCommand::Ready { client_id } => (client_id, self.machine.bot_ready(client_id)),
            SessionCommand::Intent { client_id, intent } => (
                client_id,
                self.machine.submit_intent(client_id, intent).map(|()| Vec::new()),
            ),
            SessionCommand::AddCondition { client_id, condition } => (
                client_id,
                self.machine.add_condition(client_id, &condition).map(|()| Vec::new()),
            ),
            SessionCommand::RemoveCondition { client_id, name } => (
                client_id,
                self.machine.remove_condition(client_id, &name).map(|()| Vec::new()),
            ),
            SessionCommand::Pause { from } => (from, self.machine.pause()),
            SessionCommand::Resume { from } => (from, self.machine.resume()),
            SessionCommand::NextTurn { from } => (from, self.machine.next_turn()),
            SessionCommand::ChangeTps { from, tps } => (from, self.machine.change_tps(tps)),
            SessionCommand::Stop { from } => (from, Ok(self.machine.abort("Stopped by controller"))),
            SessionCommand::Disconnect { client_id } => return self.machine.disconnect(client_id),
        };

        match result {
            Ok(out) => out,
            Err(e) => {
                warn!(session_id = %self.machine.id(), client_id = %from, error = %e, "Session request rejected");
                vec![Outbound::client(from, ServerMsg::error(e.code(), e.to_string()))]
            }
        }
    }

    /// Follow the machine's timer: re-arm on a new epoch, close early once
    /// every intent is in
    fn sync_timer(&mut self) {
        let Some(timer) = self.machine.timer() else {
            self.armed = None;
            self.deadline = None;
            return;
        };

        let armed_at = match self.armed {
            Some((epoch, at)) if epoch == timer.epoch => at,
            _ => {
                let now = Instant::now();
                self.armed = Some((timer.epoch, now));
                self.deadline = Some(now + timer.after);
                now
            }
        };

        if let Some(early) = timer.early_after {
            if self.machine.all_intents_received() {
                let early_deadline = armed_at + early;
                self.deadline = Some(self.deadline.map_or(early_deadline, |d| d.min(early_deadline)));
            }
        }
    }

    async fn emit(&self, out: Vec<Outbound>) {
        for message in out {
            if self.outbound.send(message).await.is_err() {
                warn!(session_id = %self.machine.id(), "Outbound channel closed");
                return;
            }
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Audience;
    use std::time::Duration;
    use tokio::time::timeout;

    struct Harness {
        handle: SessionHandle,
        rx: mpsc::Receiver<Outbound>,
        bots: Vec<Candidate>,
        controller: Uuid,
    }

    fn spawn_session() -> Harness {
        let (tx, rx) = mpsc::channel(1024);
        let (session, handle) = GameSession::new(Uuid::new_v4(), 9, tx);
        tokio::spawn(session.run());
        let bots = (0..2)
            .map(|i| Candidate {
                client_id: Uuid::new_v4(),
                name: format!("bot{i}"),
                version: "1.0".to_string(),
            })
            .collect();
        Harness {
            handle,
            rx,
            bots,
            controller: Uuid::new_v4(),
        }
    }

    impl Harness {
        async fn start(&self) {
            let setup = GameSetup::for_type("classic").expect("preset");
            self.handle
                .send(SessionCommand::Start {
                    from: self.controller,
                    setup,
                    candidates: self.bots.clone(),
                })
                .await
                .expect("send");
        }

        async fn ready(&self, index: usize) {
            self.handle
                .send(SessionCommand::Ready {
                    client_id: self.bots[index].client_id,
                })
                .await
                .expect("send");
        }

        /// Receive until a message matches
        async fn expect(&mut self, pred: impl Fn(&Outbound) -> bool) -> Outbound {
            loop {
                let next = timeout(Duration::from_secs(10), self.rx.recv())
                    .await
                    .expect("message in time")
                    .expect("channel open");
                if pred(&next) {
                    return next;
                }
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn game_runs_turns_on_its_own() {
        let mut h = spawn_session();
        h.start().await;
        h.ready(0).await;
        h.ready(1).await;

        h.expect(|o| matches!(o.msg, ServerMsg::GameStartedForObserver { .. })).await;
        h.expect(|o| matches!(o.msg, ServerMsg::TickForObserver { turn: 3, .. })).await;
        assert_eq!(h.handle.state(), SessionState::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn ready_timeout_returns_to_awaiting_participants() {
        let mut h = spawn_session();
        h.start().await;
        h.ready(0).await;

        let started = Instant::now();
        h.expect(|o| matches!(o.msg, ServerMsg::GameAborted { .. })).await;
        assert!(started.elapsed() >= Duration::from_millis(1_000));

        // Status is published after the messages went out
        tokio::task::yield_now().await;
        assert_eq!(h.handle.state(), SessionState::AwaitingParticipants);
    }

    #[tokio::test(start_paused = true)]
    async fn turn_closes_early_once_every_intent_is_in() {
        let mut h = spawn_session();
        h.start().await;
        h.ready(0).await;
        h.ready(1).await;
        h.handle
            .send(SessionCommand::ChangeTps {
                from: h.controller,
                tps: -1,
            })
            .await
            .expect("send");

        let started = Instant::now();
        for bot in &h.bots {
            h.handle
                .send(SessionCommand::Intent {
                    client_id: bot.client_id,
                    intent: BotIntent::default(),
                })
                .await
                .expect("send");
        }

        h.expect(|o| matches!(o.msg, ServerMsg::TickForObserver { turn: 1, .. })).await;
        assert!(started.elapsed() < Duration::from_millis(30));
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_request_answers_the_sender_only() {
        let mut h = spawn_session();
        h.handle
            .send(SessionCommand::Pause { from: h.controller })
            .await
            .expect("send");

        let reply = h.expect(|_| true).await;
        assert_eq!(reply.to, Audience::Client(h.controller));
        assert!(matches!(reply.msg, ServerMsg::Error { ref code, .. } if code == "invalid_state"));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_aborts_and_ends_the_task() {
        let mut h = spawn_session();
        h.start().await;
        h.ready(0).await;
        h.ready(1).await;
        h.handle
            .send(SessionCommand::Stop { from: h.controller })
            .await
            .expect("send");

        h.expect(|o| matches!(o.msg, ServerMsg::GameAborted { .. })).await;
        // Drain until the task drops its sender
        while timeout(Duration::from_secs(10), h.rx.recv())
            .await
            .expect("closed in time")
            .is_some()
        {}
        assert_eq!(h.handle.state(), SessionState::Stopped);
    }
}
