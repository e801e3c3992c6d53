//! Lobby service - client registry and routing between connections and sessions

use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{Config, GAME_TYPES};
use crate::session::{
    Audience, Candidate, GameSession, Outbound, SessionCommand, SessionError, SessionHandle, SessionRegistry,
};
use crate::util::time::unix_millis;
use crate::ws::protocol::{BotInfo, ClientMsg, ServerMsg};

use super::{LobbyError, Role};

/// Capacity of the channel between a session task and its router
const SESSION_OUTBOUND_CAPACITY: usize = 1024;

/// Connection handle for routing messages
struct ClientConnection {
    role: Role,
    name: String,
    /// Set for bots
    bot: Option<BotInfo>,
    outbound: mpsc::Sender<ServerMsg>,
}

/// An admitted handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub client_id: Uuid,
    pub role: Role,
}

/// Lobby service
pub struct Lobby {
    config: Arc<Config>,
    sessions: Arc<SessionRegistry>,
    clients: DashMap<Uuid, ClientConnection>,
    /// Session that receives client requests; replaced once it stops
    current: RwLock<SessionHandle>,
    this: Weak<Lobby>,
}

impl Lobby {
    /// Create the lobby and open its first session. Must be called from
    /// within a tokio runtime.
    pub fn start(config: Arc<Config>, sessions: Arc<SessionRegistry>) -> Arc<Self> {
        Arc::new_cyclic(|this: &Weak<Lobby>| {
            let current = spawn_session(&sessions, this.clone());
            Self {
                config,
                sessions,
                clients: DashMap::new(),
                current: RwLock::new(current),
                this: this.clone(),
            }
        })
    }

    pub fn current_session(&self) -> SessionHandle {
        self.current.read().clone()
    }

    pub fn connected_clients(&self) -> usize {
        self.clients.len()
    }

    pub fn connected_bots(&self) -> usize {
        self.clients.iter().filter(|c| c.value().role == Role::Bot).count()
    }

    /// Admit a connection from its first message. On success the client is
    /// registered and `outbound` has received the server handshake.
    pub fn admit(&self, msg: ClientMsg, outbound: mpsc::Sender<ServerMsg>) -> Result<Admission, LobbyError> {
        let client_id = Uuid::new_v4();

        let (role, name, bot, secret) = match msg {
            ClientMsg::BotHandshake {
                name,
                version,
                authors,
                secret,
            } => {
                let info = BotInfo {
                    client_id,
                    name: name.clone(),
                    version,
                    authors,
                };
                (Role::Bot, name, Some(info), secret)
            }
            ClientMsg::ObserverHandshake { name, secret } => (Role::Observer, name, None, secret),
            ClientMsg::ControllerHandshake { name, secret } => (Role::Controller, name, None, secret),
            _ => return Err(LobbyError::NotAHandshake),
        };

        let accepted = match role {
            Role::Bot => &self.config.bot_secrets,
            Role::Observer | Role::Controller => &self.config.controller_secrets,
        };
        if !admits(accepted, secret.as_deref()) {
            warn!(role = %role, name = %name, "Handshake rejected");
            return Err(LobbyError::Rejected(role));
        }

        let handshake = ServerMsg::ServerHandshake {
            client_id,
            session_id: self.current_session().id,
            server_time: unix_millis(),
            game_types: GAME_TYPES.iter().map(|t| t.to_string()).collect(),
        };
        let _ = outbound.try_send(handshake);
        if role.observes() {
            let _ = outbound.try_send(self.bot_list());
        }

        self.clients.insert(
            client_id,
            ClientConnection {
                role,
                name: name.clone(),
                bot,
                outbound,
            },
        );
        info!(client_id = %client_id, role = %role, name = %name, "Client admitted");

        if role == Role::Bot {
            self.broadcast_bot_list();
        }

        Ok(Admission { client_id, role })
    }

    /// Handle a message from an admitted client. Failed requests are answered
    /// with an error message; an error is returned only when the client must
    /// be disconnected.
    pub async fn handle(&self, client_id: Uuid, msg: ClientMsg) -> Result<(), LobbyError> {
        match self.dispatch(client_id, msg).await {
            Err(e) if !e.disconnects() => {
                warn!(client_id = %client_id, error = %e, "Request failed");
                self.send_to(client_id, ServerMsg::error(e.code(), e.to_string()));
                Ok(())
            }
            other => other,
        }
    }

    async fn dispatch(&self, client_id: Uuid, msg: ClientMsg) -> Result<(), LobbyError> {
        let role = self
            .clients
            .get(&client_id)
            .map(|c| c.role)
            .ok_or(LobbyError::UnknownClient(client_id))?;

        let command = match (role, msg) {
            (Role::Bot, ClientMsg::BotReady) => SessionCommand::Ready { client_id },
            (Role::Bot, ClientMsg::BotIntent { intent }) => SessionCommand::Intent { client_id, intent },
            (Role::Bot, ClientMsg::AddCondition { condition }) => SessionCommand::AddCondition { client_id, condition },
            (Role::Bot, ClientMsg::RemoveCondition { name }) => SessionCommand::RemoveCondition { client_id, name },
            (
                Role::Controller,
                ClientMsg::StartGame {
                    game_type,
                    game_setup,
                    bot_ids,
                },
            ) => {
                let setup = match game_setup {
                    Some(setup) => setup,
                    None => self
                        .config
                        .game_setup(game_type.as_deref())
                        .map_err(SessionError::from)?,
                };
                let candidates = bot_ids
                    .iter()
                    .map(|id| self.candidate(*id))
                    .collect::<Result<Vec<_>, _>>()?;
                SessionCommand::Start {
                    from: client_id,
                    setup,
                    candidates,
                }
            }
            (Role::Controller, ClientMsg::StopGame) => SessionCommand::Stop { from: client_id },
            (Role::Controller, ClientMsg::PauseGame) => SessionCommand::Pause { from: client_id },
            (Role::Controller, ClientMsg::ResumeGame) => SessionCommand::Resume { from: client_id },
            (Role::Controller, ClientMsg::NextTurn) => SessionCommand::NextTurn { from: client_id },
            (Role::Controller, ClientMsg::ChangeTps { tps }) => SessionCommand::ChangeTps { from: client_id, tps },
            (role, msg) => {
                return Err(LobbyError::WrongRole {
                    role,
                    message: msg.name(),
                })
            }
        };

        self.current_session().send(command).await?;
        Ok(())
    }

    /// Forget a connection and report it to the current session
    pub async fn disconnect(&self, client_id: Uuid) {
        let Some((_, client)) = self.clients.remove(&client_id) else {
            return;
        };
        info!(client_id = %client_id, role = %client.role, name = %client.name, "Client disconnected");

        if client.role == Role::Bot {
            self.broadcast_bot_list();
            if self
                .current_session()
                .send(SessionCommand::Disconnect { client_id })
                .await
                .is_err()
            {
                debug!(client_id = %client_id, "Session already closed");
            }
        }
    }

    fn candidate(&self, client_id: Uuid) -> Result<Candidate, LobbyError> {
        self.clients
            .get(&client_id)
            .and_then(|c| {
                c.bot.as_ref().map(|bot| Candidate {
                    client_id,
                    name: bot.name.clone(),
                    version: bot.version.clone(),
                })
            })
            .ok_or(LobbyError::UnknownBot(client_id))
    }

    fn bot_list(&self) -> ServerMsg {
        let mut bots: Vec<BotInfo> = self.clients.iter().filter_map(|c| c.value().bot.clone()).collect();
        bots.sort_by(|a, b| a.name.cmp(&b.name).then(a.client_id.cmp(&b.client_id)));
        ServerMsg::BotListUpdate { bots }
    }

    fn broadcast_bot_list(&self) {
        self.send_observers(self.bot_list());
    }

    fn deliver(&self, out: Outbound) {
        match out.to {
            Audience::Client(client_id) => self.send_to(client_id, out.msg),
            Audience::Observers => self.send_observers(out.msg),
        }
    }

    fn send_to(&self, client_id: Uuid, msg: ServerMsg) {
        let Some(client) = self.clients.get(&client_id) else {
            debug!(client_id = %client_id, "Dropping message for departed client");
            return;
        };
        push(client_id, &client.outbound, msg);
    }

    fn send_observers(&self, msg: ServerMsg) {
        for entry in self.clients.iter().filter(|c| c.value().role.observes()) {
            push(*entry.key(), &entry.value().outbound, msg.clone());
        }
    }

    /// A session task ended: drop it and open a fresh one if it was current
    fn session_closed(&self, session_id: Uuid) {
        self.sessions.remove(&session_id);

        let mut current = self.current.write();
        if current.id == session_id {
            *current = spawn_session(&self.sessions, self.this.clone());
        }
    }
}

/// Whether `secret` is in the accepted list. An empty list admits everyone.
fn admits(accepted: &[String], secret: Option<&str>) -> bool {
    accepted.is_empty() || secret.is_some_and(|s| accepted.iter().any(|a| a == s))
}

fn push(client_id: Uuid, outbound: &mpsc::Sender<ServerMsg>, msg: ServerMsg) {
    match outbound.try_send(msg) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => {
            warn!(client_id = %client_id, "Client lagged, dropping message");
        }
        Err(TrySendError::Closed(_)) => {
            debug!(client_id = %client_id, "Client channel closed");
        }
    }
}

/// Spawn a session task plus the router that forwards its messages to clients
fn spawn_session(sessions: &SessionRegistry, lobby: Weak<Lobby>) -> SessionHandle {
    let session_id = Uuid::new_v4();
    let (outbound_tx, outbound_rx) = mpsc::channel(SESSION_OUTBOUND_CAPACITY);
    let (session, handle) = GameSession::new(session_id, rand::random::<u64>(), outbound_tx);

    sessions.insert(handle.clone());
    tokio::spawn(session.run());
    tokio::spawn(route_session(lobby, session_id, outbound_rx));

    info!(session_id = %session_id, "Session created");
    handle
}

async fn route_session(lobby: Weak<Lobby>, session_id: Uuid, mut outbound: mpsc::Receiver<Outbound>) {
    while let Some(out) = outbound.recv().await {
        let Some(lobby) = lobby.upgrade() else {
            return;
        };
        lobby.deliver(out);
    }

    if let Some(lobby) = lobby.upgrade() {
        lobby.session_closed(session_id);
        info!(session_id = %session_id, "Session removed from registry");
    }
}
