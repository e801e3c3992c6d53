//! Event kinds, priorities and the translation of collision facts into events

use serde::{Deserialize, Serialize};

use crate::game::model::BotId;
use crate::game::step::CollisionFact;
use crate::ws::protocol::BulletSnapshot;

/// Something that happened during a turn, as delivered to bots and observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GameEvent {
    Tick {
        turn: u32,
        round: u32,
    },
    BotDeath {
        turn: u32,
        victim_id: BotId,
    },
    HitWall {
        turn: u32,
        bot_id: BotId,
    },
    HitBot {
        turn: u32,
        bot_id: BotId,
        victim_id: BotId,
        energy: f64,
        x: f64,
        y: f64,
        rammed: bool,
    },
    BulletFired {
        turn: u32,
        bullet: BulletSnapshot,
    },
    BulletHitWall {
        turn: u32,
        bullet: BulletSnapshot,
    },
    BulletHitBullet {
        turn: u32,
        bullet: BulletSnapshot,
        hit_bullet: BulletSnapshot,
    },
    BulletHitBot {
        turn: u32,
        victim_id: BotId,
        bullet: BulletSnapshot,
        damage: f64,
        energy: f64,
    },
    ScannedBot {
        turn: u32,
        scanned_by_bot_id: BotId,
        scanned_bot_id: BotId,
        energy: f64,
        x: f64,
        y: f64,
        direction: f64,
        speed: f64,
    },
    SkippedTurn {
        turn: u32,
    },
    Condition {
        turn: u32,
        name: String,
    },
    WonRound {
        turn: u32,
    },
    BotDisconnected {
        turn: u32,
        bot_id: BotId,
    },
}

/// Event kind after resolving who receives it.
///
/// `Death` and `HitByBullet` are the recipient-as-victim views of
/// `BotDeath` and `BulletHitBot`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    Death,
    WonRound,
    SkippedTurn,
    Tick,
    Condition,
    BotDeath,
    BulletHitWall,
    BulletHitBullet,
    BulletHitBot,
    BulletFired,
    HitByBullet,
    HitWall,
    HitBot,
    ScannedBot,
    BotDisconnected,
}

/// Who an event is being resolved for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecipientContext {
    /// True when the recipient is the event's victim
    pub is_victim: bool,
}

impl RecipientContext {
    pub const OBSERVER: Self = Self { is_victim: false };

    /// Context for delivering `event` to bot `recipient`
    pub fn for_bot(recipient: BotId, event: &GameEvent) -> Self {
        Self {
            is_victim: event.victim() == Some(recipient),
        }
    }
}

/// Static priority of a resolved kind. Lower numbers are dispatched first.
pub const fn kind_priority(kind: EventKind) -> u32 {
    match kind {
        EventKind::Death => 10,
        EventKind::WonRound => 20,
        EventKind::SkippedTurn => 30,
        EventKind::Tick => 40,
        EventKind::Condition => 50,
        EventKind::BotDeath => 60,
        EventKind::BulletHitWall => 70,
        EventKind::BulletHitBullet => 80,
        EventKind::BulletHitBot => 90,
        EventKind::BulletFired => 100,
        EventKind::HitByBullet => 110,
        EventKind::HitWall => 120,
        EventKind::HitBot => 130,
        EventKind::ScannedBot => 140,
        EventKind::BotDisconnected => 150,
    }
}

/// Priority of an event kind as seen by a recipient
pub fn priority_of(kind: EventKind, ctx: RecipientContext) -> u32 {
    kind_priority(kind.resolve(ctx))
}

impl EventKind {
    /// Turn the observer view of a kind into the victim view where one exists
    pub fn resolve(self, ctx: RecipientContext) -> Self {
        match (self, ctx.is_victim) {
            (EventKind::BotDeath, true) => EventKind::Death,
            (EventKind::BulletHitBot, true) => EventKind::HitByBullet,
            (kind, _) => kind,
        }
    }

    /// Critical events are never aged out of a queue
    pub fn is_critical(self) -> bool {
        matches!(self, EventKind::Death | EventKind::SkippedTurn | EventKind::WonRound)
    }
}

impl GameEvent {
    pub fn turn(&self) -> u32 {
        match self {
            GameEvent::Tick { turn, .. }
            | GameEvent::BotDeath { turn, .. }
            | GameEvent::HitWall { turn, .. }
            | GameEvent::HitBot { turn, .. }
            | GameEvent::BulletFired { turn, .. }
            | GameEvent::BulletHitWall { turn, .. }
            | GameEvent::BulletHitBullet { turn, .. }
            | GameEvent::BulletHitBot { turn, .. }
            | GameEvent::ScannedBot { turn, .. }
            | GameEvent::SkippedTurn { turn }
            | GameEvent::Condition { turn, .. }
            | GameEvent::WonRound { turn }
            | GameEvent::BotDisconnected { turn, .. } => *turn,
        }
    }

    /// Kind as seen by an observer
    pub fn kind(&self) -> EventKind {
        match self {
            GameEvent::Tick { .. } => EventKind::Tick,
            GameEvent::BotDeath { .. } => EventKind::BotDeath,
            GameEvent::HitWall { .. } => EventKind::HitWall,
            GameEvent::HitBot { .. } => EventKind::HitBot,
            GameEvent::BulletFired { .. } => EventKind::BulletFired,
            GameEvent::BulletHitWall { .. } => EventKind::BulletHitWall,
            GameEvent::BulletHitBullet { .. } => EventKind::BulletHitBullet,
            GameEvent::BulletHitBot { .. } => EventKind::BulletHitBot,
            GameEvent::ScannedBot { .. } => EventKind::ScannedBot,
            GameEvent::SkippedTurn { .. } => EventKind::SkippedTurn,
            GameEvent::Condition { .. } => EventKind::Condition,
            GameEvent::WonRound { .. } => EventKind::WonRound,
            GameEvent::BotDisconnected { .. } => EventKind::BotDisconnected,
        }
    }

    /// Kind as seen by bot `recipient`
    pub fn kind_for(&self, recipient: BotId) -> EventKind {
        self.kind().resolve(RecipientContext::for_bot(recipient, self))
    }

    /// The bot on the receiving end of a death or bullet hit
    pub fn victim(&self) -> Option<BotId> {
        match self {
            GameEvent::BotDeath { victim_id, .. } | GameEvent::BulletHitBot { victim_id, .. } => Some(*victim_id),
            _ => None,
        }
    }
}

/// An event together with the bots whose queues receive it
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedEvent {
    pub event: GameEvent,
    pub recipients: Vec<BotId>,
}

impl RoutedEvent {
    fn to(event: GameEvent, recipients: Vec<BotId>) -> Self {
        Self { event, recipients }
    }
}

/// Convert one turn's raw facts into routed events.
///
/// `participants` lists every bot that should hear about deaths.
pub fn route_facts(turn: u32, facts: &[CollisionFact], participants: &[BotId]) -> Vec<RoutedEvent> {
    facts
        .iter()
        .map(|fact| match fact {
            CollisionFact::BulletFired { bullet } => RoutedEvent::to(
                GameEvent::BulletFired {
                    turn,
                    bullet: bullet.into(),
                },
                vec![bullet.owner],
            ),
            CollisionFact::BotHitWall { bot, .. } => {
                RoutedEvent::to(GameEvent::HitWall { turn, bot_id: *bot }, vec![*bot])
            }
            CollisionFact::BotHitBot {
                bot,
                victim,
                victim_energy,
                victim_x,
                victim_y,
                rammed,
                ..
            } => RoutedEvent::to(
                GameEvent::HitBot {
                    turn,
                    bot_id: *bot,
                    victim_id: *victim,
                    energy: *victim_energy,
                    x: *victim_x,
                    y: *victim_y,
                    rammed: *rammed,
                },
                vec![*bot],
            ),
            CollisionFact::BulletHitWall { bullet } => RoutedEvent::to(
                GameEvent::BulletHitWall {
                    turn,
                    bullet: bullet.into(),
                },
                vec![bullet.owner],
            ),
            CollisionFact::BulletHitBullet { bullet, hit_bullet } => RoutedEvent::to(
                GameEvent::BulletHitBullet {
                    turn,
                    bullet: bullet.into(),
                    hit_bullet: hit_bullet.into(),
                },
                vec![bullet.owner],
            ),
            CollisionFact::BulletHitBot {
                bullet,
                victim,
                damage,
                victim_energy,
                ..
            } => {
                let mut recipients = vec![bullet.owner];
                if *victim != bullet.owner {
                    recipients.push(*victim);
                }
                RoutedEvent::to(
                    GameEvent::BulletHitBot {
                        turn,
                        victim_id: *victim,
                        bullet: bullet.into(),
                        damage: *damage,
                        energy: *victim_energy,
                    },
                    recipients,
                )
            }
            CollisionFact::BotScanned {
                scanner,
                scanned,
                energy,
                x,
                y,
                direction,
                speed,
            } => RoutedEvent::to(
                GameEvent::ScannedBot {
                    turn,
                    scanned_by_bot_id: *scanner,
                    scanned_bot_id: *scanned,
                    energy: *energy,
                    x: *x,
                    y: *y,
                    direction: *direction,
                    speed: *speed,
                },
                vec![*scanner],
            ),
            CollisionFact::BotDied { bot } => RoutedEvent::to(
                GameEvent::BotDeath { turn, victim_id: *bot },
                participants.to_vec(),
            ),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::model::{BulletId, BulletState};

    fn bullet(owner: u32) -> BulletState {
        BulletState {
            id: BulletId(1),
            owner: BotId(owner),
            x: 0.0,
            y: 0.0,
            direction: 0.0,
            power: 1.0,
            color: None,
        }
    }

    #[test]
    fn death_priority_depends_on_recipient() {
        let victim = RecipientContext { is_victim: true };
        assert_eq!(priority_of(EventKind::BotDeath, victim), 10);
        assert_eq!(priority_of(EventKind::BotDeath, RecipientContext::OBSERVER), 60);
        assert!(priority_of(EventKind::BotDeath, victim) < priority_of(EventKind::Tick, victim));
    }

    #[test]
    fn bullet_hit_priority_depends_on_recipient() {
        let event = GameEvent::BulletHitBot {
            turn: 3,
            victim_id: BotId(2),
            bullet: (&bullet(1)).into(),
            damage: 4.0,
            energy: 96.0,
        };
        assert_eq!(event.kind_for(BotId(1)), EventKind::BulletHitBot);
        assert_eq!(event.kind_for(BotId(2)), EventKind::HitByBullet);
    }

    #[test]
    fn non_victim_kinds_ignore_context() {
        let victim = RecipientContext { is_victim: true };
        assert_eq!(
            priority_of(EventKind::ScannedBot, victim),
            priority_of(EventKind::ScannedBot, RecipientContext::OBSERVER)
        );
    }

    #[test]
    fn only_terminal_kinds_are_critical() {
        assert!(EventKind::Death.is_critical());
        assert!(EventKind::SkippedTurn.is_critical());
        assert!(EventKind::WonRound.is_critical());
        assert!(!EventKind::BotDeath.is_critical());
        assert!(!EventKind::ScannedBot.is_critical());
    }

    #[test]
    fn bullet_hit_routes_to_shooter_and_victim() {
        let facts = [CollisionFact::BulletHitBot {
            bullet: bullet(1),
            victim: BotId(2),
            damage: 4.0,
            victim_energy: 96.0,
            killed: false,
        }];
        let routed = route_facts(5, &facts, &[BotId(1), BotId(2), BotId(3)]);
        assert_eq!(routed.len(), 1);
        assert_eq!(routed[0].recipients, vec![BotId(1), BotId(2)]);
        assert_eq!(routed[0].event.turn(), 5);
    }

    #[test]
    fn deaths_route_to_every_participant() {
        let facts = [CollisionFact::BotDied { bot: BotId(3) }];
        let routed = route_facts(1, &facts, &[BotId(1), BotId(2), BotId(3)]);
        assert_eq!(routed[0].recipients.len(), 3);
        assert_eq!(routed[0].event.kind_for(BotId(3)), EventKind::Death);
        assert_eq!(routed[0].event.kind_for(BotId(1)), EventKind::BotDeath);
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let json = serde_json::to_value(GameEvent::SkippedTurn { turn: 7 }).expect("serialize");
        assert_eq!(json["type"], "skipped_turn");
        assert_eq!(json["turn"], 7);
    }
}
