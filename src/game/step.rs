//! Physics & collision step: advances the world by exactly one turn

use std::collections::{BTreeMap, HashMap};

use rand_chacha::ChaCha8Rng;

use super::arena::Arena;
use super::combat::CombatSystem;
use super::model::{BotId, BotIntent, BotState, BulletId, BulletState};
use super::physics::PhysicsSystem;
use super::rules::{BOT_RADIUS, INACTIVITY_ZAP, RADAR_RADIUS, RAM_DAMAGE, START_ENERGY, START_GUN_HEAT};

/// Read-only inputs of the step, taken from the game setup
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepParams {
    pub arena: Arena,
    pub gun_cooling_rate: f64,
    pub max_inactivity_turns: u32,
}

/// Raw facts produced by one turn, in the order they happened
#[derive(Debug, Clone, PartialEq)]
pub enum CollisionFact {
    BulletFired {
        bullet: BulletState,
    },
    BotHitWall {
        bot: BotId,
        x: f64,
        y: f64,
        damage: f64,
    },
    /// One directed side of a bot/bot collision
    BotHitBot {
        bot: BotId,
        victim: BotId,
        victim_energy: f64,
        victim_x: f64,
        victim_y: f64,
        rammed: bool,
        victim_killed: bool,
    },
    BulletHitWall {
        bullet: BulletState,
    },
    BulletHitBullet {
        bullet: BulletState,
        hit_bullet: BulletState,
    },
    BulletHitBot {
        bullet: BulletState,
        victim: BotId,
        damage: f64,
        victim_energy: f64,
        killed: bool,
    },
    BotScanned {
        scanner: BotId,
        scanned: BotId,
        energy: f64,
        x: f64,
        y: f64,
        direction: f64,
        speed: f64,
    },
    BotDied {
        bot: BotId,
    },
}

/// Complete world state at the end of a turn
#[derive(Debug, Clone, PartialEq)]
pub struct TurnState {
    pub round: u32,
    pub turn: u32,
    /// Active (alive) bots
    pub bots: BTreeMap<BotId, BotState>,
    /// Terminal state of bots that died this round
    pub dead: BTreeMap<BotId, BotState>,
    pub bullets: Vec<BulletState>,
    pub next_bullet_id: u32,
    /// Turns since any bot last dealt damage to another
    pub inactive_turns: u32,
}

impl TurnState {
    /// World at turn 0 of a round
    pub fn new_round(round: u32, ids: &[BotId], arena: &Arena, rng: &mut ChaCha8Rng) -> Self {
        let positions = arena.start_positions(ids.len(), rng);
        let bots = ids
            .iter()
            .zip(positions)
            .map(|(&id, p)| (id, BotState::new(id, p.x, p.y, p.direction, START_ENERGY, START_GUN_HEAT)))
            .collect();

        Self {
            round,
            turn: 0,
            bots,
            dead: BTreeMap::new(),
            bullets: Vec::new(),
            next_bullet_id: 1,
            inactive_turns: 0,
        }
    }

    pub fn alive_count(&self) -> usize {
        self.bots.len()
    }

    /// Look up a bot whether it is alive or died this round
    pub fn bot(&self, id: BotId) -> Option<&BotState> {
        self.bots.get(&id).or_else(|| self.dead.get(&id))
    }

    pub fn bullets_of(&self, owner: BotId) -> impl Iterator<Item = &BulletState> {
        self.bullets.iter().filter(move |b| b.owner == owner)
    }

    /// Remove a bot from the active set without a collision (e.g. it disconnected)
    pub fn remove_bot(&mut self, id: BotId) -> Option<BotState> {
        let mut bot = self.bots.remove(&id)?;
        bot.energy = bot.energy.min(0.0) - 1.0;
        self.dead.insert(id, bot.clone());
        Some(bot)
    }
}

/// Advance the world by one turn.
///
/// `intents` holds the submissions received for this turn; bots without one
/// keep integrating their previously set targets. Every bot's outcome is
/// computed from the `previous` snapshot, pairs and bullets are resolved in id
/// order, so the same input always yields the same output.
pub fn advance(
    previous: &TurnState,
    intents: &HashMap<BotId, BotIntent>,
    params: &StepParams,
) -> (TurnState, Vec<CollisionFact>) {
    let mut next = previous.clone();
    next.turn += 1;
    let mut facts = Vec::new();

    for (id, intent) in intents {
        if let Some(bot) = next.bots.get_mut(id) {
            bot.intent.merge(intent);
            if let Some(colors) = &intent.colors {
                bot.colors.merge(colors);
            }
        }
    }

    for bot in next.bots.values_mut() {
        bot.gun_heat = CombatSystem::cool_gun(bot.gun_heat, params.gun_cooling_rate);
    }

    move_bots(previous, &mut next);
    resolve_wall_collisions(&mut next, params, &mut facts);
    let mut damage_dealt = resolve_bot_collisions(previous, &mut next, &mut facts);
    damage_dealt |= move_bullets(previous, &mut next, params, &mut facts);
    fire_guns(&mut next, &mut facts);
    scan(previous, &next, &mut facts);
    apply_inactivity(&mut next, params, damage_dealt);

    let died: Vec<BotId> = next.bots.values().filter(|b| b.is_dead()).map(|b| b.id).collect();
    for id in died {
        if let Some(bot) = next.bots.remove(&id) {
            next.dead.insert(id, bot);
            facts.push(CollisionFact::BotDied { bot: id });
        }
    }

    for bot in next.bots.values_mut() {
        bot.intent.clear_one_shot();
    }

    (next, facts)
}

fn move_bots(previous: &TurnState, next: &mut TurnState) {
    for (id, bot) in next.bots.iter_mut() {
        let Some(prev) = previous.bots.get(id) else {
            continue;
        };

        bot.radar_sweep_start = prev.radar_direction;

        if prev.is_disabled() {
            bot.speed = 0.0;
            bot.turn_rate = 0.0;
            bot.gun_turn_rate = 0.0;
            bot.radar_turn_rate = 0.0;
            continue;
        }

        let turns = PhysicsSystem::resolve_turns(prev.speed, &bot.intent);
        let (direction, gun, radar) =
            PhysicsSystem::apply_turns(prev.direction, prev.gun_direction, prev.radar_direction, &turns);
        let speed = PhysicsSystem::new_speed(prev.speed, bot.intent.target_speed);
        let (x, y) = PhysicsSystem::move_along(prev.x, prev.y, direction, speed);

        bot.direction = direction;
        bot.gun_direction = gun;
        bot.radar_direction = radar;
        bot.turn_rate = turns.body;
        bot.gun_turn_rate = turns.gun;
        bot.radar_turn_rate = turns.radar;
        bot.speed = speed;
        bot.x = x;
        bot.y = y;
    }
}

fn resolve_wall_collisions(next: &mut TurnState, params: &StepParams, facts: &mut Vec<CollisionFact>) {
    for bot in next.bots.values_mut() {
        let (x, y, hit) =
            PhysicsSystem::clamp_to_arena(bot.x, bot.y, BOT_RADIUS, params.arena.width, params.arena.height);
        if !hit {
            continue;
        }
        let damage = super::rules::wall_damage(bot.speed);
        bot.x = x;
        bot.y = y;
        bot.speed = 0.0;
        CombatSystem::apply_damage(bot, damage);
        facts.push(CollisionFact::BotHitWall {
            bot: bot.id,
            x,
            y,
            damage,
        });
    }
}

fn resolve_bot_collisions(previous: &TurnState, next: &mut TurnState, facts: &mut Vec<CollisionFact>) -> bool {
    // Tentative positions after movement; checks never see corrections made
    // for other pairs in this turn.
    let tentative: Vec<BotState> = next.bots.values().filter(|b| b.is_alive()).cloned().collect();
    let mut any = false;

    for (i, a) in tentative.iter().enumerate() {
        for b in &tentative[i + 1..] {
            if !PhysicsSystem::circles_collide(a.x, a.y, BOT_RADIUS, b.x, b.y, BOT_RADIUS) {
                continue;
            }
            any = true;

            let a_rams = PhysicsSystem::is_driving_towards(a.x, a.y, a.direction, a.speed, b.x, b.y);
            let b_rams = PhysicsSystem::is_driving_towards(b.x, b.y, b.direction, b.speed, a.x, a.y);

            let a_killed = next
                .bots
                .get_mut(&a.id)
                .map(|bot| CombatSystem::apply_damage(bot, RAM_DAMAGE))
                .unwrap_or(false);
            let b_killed = next
                .bots
                .get_mut(&b.id)
                .map(|bot| CombatSystem::apply_damage(bot, RAM_DAMAGE))
                .unwrap_or(false);

            for (rammer, rams) in [(a, a_rams), (b, b_rams)] {
                if !rams {
                    continue;
                }
                if let (Some(bot), Some(prev)) = (next.bots.get_mut(&rammer.id), previous.bots.get(&rammer.id)) {
                    bot.x = prev.x;
                    bot.y = prev.y;
                    bot.speed = 0.0;
                }
            }

            let energy = |id: BotId| next.bots.get(&id).map(|b| b.energy).unwrap_or(0.0);
            facts.push(CollisionFact::BotHitBot {
                bot: a.id,
                victim: b.id,
                victim_energy: energy(b.id),
                victim_x: b.x,
                victim_y: b.y,
                rammed: a_rams,
                victim_killed: b_killed,
            });
            facts.push(CollisionFact::BotHitBot {
                bot: b.id,
                victim: a.id,
                victim_energy: energy(a.id),
                victim_x: a.x,
                victim_y: a.y,
                rammed: b_rams,
                victim_killed: a_killed,
            });
        }
    }

    any
}

fn move_bullets(
    previous: &TurnState,
    next: &mut TurnState,
    params: &StepParams,
    facts: &mut Vec<CollisionFact>,
) -> bool {
    let paths: Vec<(BulletState, (f64, f64), (f64, f64))> = previous
        .bullets
        .iter()
        .map(|b| {
            let end = b.next_position();
            let mut moved = b.clone();
            moved.x = end.0;
            moved.y = end.1;
            (moved, (b.x, b.y), end)
        })
        .collect();

    let mut destroyed = vec![false; paths.len()];
    let mut damage_dealt = false;
    // (bullet index, victim), settled together once every bullet has moved
    let mut hits: Vec<(usize, BotId)> = Vec::new();

    for i in 0..paths.len() {
        for j in (i + 1)..paths.len() {
            if destroyed[i] || destroyed[j] {
                continue;
            }
            let (a, a_start, a_end) = &paths[i];
            let (b, b_start, b_end) = &paths[j];
            if PhysicsSystem::segments_intersect(*a_start, *a_end, *b_start, *b_end) {
                destroyed[i] = true;
                destroyed[j] = true;
                facts.push(CollisionFact::BulletHitBullet {
                    bullet: a.clone(),
                    hit_bullet: b.clone(),
                });
                facts.push(CollisionFact::BulletHitBullet {
                    bullet: b.clone(),
                    hit_bullet: a.clone(),
                });
            }
        }
    }

    for (idx, (bullet, start, end)) in paths.iter().enumerate() {
        if destroyed[idx] {
            continue;
        }

        // Nearest bot along the path takes the hit
        let victim = next
            .bots
            .values()
            .filter(|bot| bot.id != bullet.owner && bot.is_alive())
            .filter(|bot| PhysicsSystem::segment_hits_circle(start.0, start.1, end.0, end.1, bot.x, bot.y, BOT_RADIUS))
            .min_by(|a, b| {
                let da = (a.x - start.0).powi(2) + (a.y - start.1).powi(2);
                let db = (b.x - start.0).powi(2) + (b.y - start.1).powi(2);
                da.total_cmp(&db)
            })
            .map(|bot| bot.id);

        if let Some(victim_id) = victim {
            destroyed[idx] = true;
            damage_dealt = true;
            hits.push((idx, victim_id));
            continue;
        }

        if !params.arena.contains(end.0, end.1) {
            destroyed[idx] = true;
            facts.push(CollisionFact::BulletHitWall { bullet: bullet.clone() });
        }
    }

    settle_bullet_hits(next, &paths, &hits, facts);

    next.bullets = paths
        .into_iter()
        .zip(destroyed)
        .filter(|(_, gone)| !gone)
        .map(|((bullet, _, _), _)| bullet)
        .collect();

    damage_dealt
}

/// Apply every hit of the turn against the energies left after ramming, so no
/// hit sees the damage or shooter bonus of another. A victim is reported killed
/// by the hit whose running damage first exceeds its energy plus its own bonus.
fn settle_bullet_hits(
    next: &mut TurnState,
    paths: &[(BulletState, (f64, f64), (f64, f64))],
    hits: &[(usize, BotId)],
    facts: &mut Vec<CollisionFact>,
) {
    let mut bonus: BTreeMap<BotId, f64> = BTreeMap::new();
    let mut taken: BTreeMap<BotId, f64> = BTreeMap::new();
    for &(idx, victim) in hits {
        let bullet = &paths[idx].0;
        *taken.entry(victim).or_default() += CombatSystem::hit_damage(bullet.power);
        if next.bots.get(&bullet.owner).is_some_and(BotState::is_alive) {
            *bonus.entry(bullet.owner).or_default() += CombatSystem::shooter_bonus(bullet.power);
        }
    }

    let budget = |next: &TurnState, id: BotId| {
        next.bots.get(&id).map_or(0.0, |b| b.energy) + bonus.get(&id).copied().unwrap_or(0.0)
    };

    let mut running: BTreeMap<BotId, f64> = BTreeMap::new();
    for &(idx, victim) in hits {
        let bullet = &paths[idx].0;
        let damage = CombatSystem::hit_damage(bullet.power);
        let limit = budget(next, victim);
        let before = running.get(&victim).copied().unwrap_or(0.0);
        let after = before + damage;
        running.insert(victim, after);

        facts.push(CollisionFact::BulletHitBot {
            bullet: bullet.clone(),
            victim,
            damage,
            victim_energy: limit - taken.get(&victim).copied().unwrap_or(0.0),
            killed: before <= limit && after > limit,
        });
    }

    for (id, bot) in next.bots.iter_mut() {
        bot.energy += bonus.get(id).copied().unwrap_or(0.0) - taken.get(id).copied().unwrap_or(0.0);
    }
}

fn fire_guns(next: &mut TurnState, facts: &mut Vec<CollisionFact>) {
    for bot in next.bots.values_mut() {
        if let Some(bullet) = CombatSystem::try_fire(bot, BulletId(next.next_bullet_id)) {
            next.next_bullet_id += 1;
            facts.push(CollisionFact::BulletFired { bullet: bullet.clone() });
            next.bullets.push(bullet);
        }
    }
}

fn scan(previous: &TurnState, next: &TurnState, facts: &mut Vec<CollisionFact>) {
    for scanner in next.bots.values().filter(|b| b.is_alive()) {
        let (start, end) = if scanner.intent.rescan && scanner.radar_sweep_start == scanner.radar_direction {
            // Repeat last turn's sweep
            match previous.bots.get(&scanner.id) {
                Some(prev) => (prev.radar_sweep_start, prev.radar_direction),
                None => continue,
            }
        } else {
            (scanner.radar_sweep_start, scanner.radar_direction)
        };

        for target in next.bots.values() {
            if target.id == scanner.id || !target.is_alive() {
                continue;
            }
            if PhysicsSystem::in_radar_sweep(scanner.x, scanner.y, start, end, RADAR_RADIUS, target.x, target.y) {
                facts.push(CollisionFact::BotScanned {
                    scanner: scanner.id,
                    scanned: target.id,
                    energy: target.energy,
                    x: target.x,
                    y: target.y,
                    direction: target.direction,
                    speed: target.speed,
                });
            }
        }
    }
}

fn apply_inactivity(next: &mut TurnState, params: &StepParams, damage_dealt: bool) {
    if damage_dealt {
        next.inactive_turns = 0;
        return;
    }
    next.inactive_turns += 1;
    if next.inactive_turns > params.max_inactivity_turns {
        for bot in next.bots.values_mut() {
            CombatSystem::apply_damage(bot, INACTIVITY_ZAP);
        }
    }
}
