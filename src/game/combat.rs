//! Combat system - firing, gun heat and damage

use super::model::{BotState, BulletId, BulletState};
use super::rules::{bullet_damage, bullet_hit_energy_bonus, gun_heat, MAX_FIREPOWER, MIN_FIREPOWER};

/// Combat system for guns and damage
pub struct CombatSystem;

impl CombatSystem {
    /// A gun fires only when it is completely cool
    pub fn can_fire(heat: f64) -> bool {
        heat == 0.0
    }

    /// Cool a gun by one turn, floored at zero
    pub fn cool_gun(heat: f64, cooling_rate: f64) -> f64 {
        (heat - cooling_rate).max(0.0)
    }

    /// Resolve the power a bot actually fires with, if it fires at all.
    ///
    /// Requests below the minimum mean "hold fire"; larger requests are clamped
    /// to the maximum and to the energy the bot has left.
    pub fn accepted_firepower(requested: f64, energy: f64) -> Option<f64> {
        if !requested.is_finite() || requested < MIN_FIREPOWER {
            return None;
        }
        let power = requested.clamp(MIN_FIREPOWER, MAX_FIREPOWER).min(energy);
        if power < MIN_FIREPOWER {
            return None;
        }
        Some(power)
    }

    /// Try to fire the bot's gun. On success the bot pays the energy cost,
    /// its gun heats up and the new bullet is returned.
    pub fn try_fire(bot: &mut BotState, bullet_id: BulletId) -> Option<BulletState> {
        if bot.is_disabled() || !bot.is_alive() || !Self::can_fire(bot.gun_heat) {
            return None;
        }
        let power = Self::accepted_firepower(bot.intent.firepower, bot.energy)?;

        bot.energy -= power;
        bot.gun_heat = gun_heat(power);

        Some(BulletState {
            id: bullet_id,
            owner: bot.id,
            x: bot.x,
            y: bot.y,
            direction: bot.gun_direction,
            power,
            color: bot.colors.bullet.clone(),
        })
    }

    /// Damage a bullet of the given power deals on impact
    pub fn hit_damage(power: f64) -> f64 {
        bullet_damage(power)
    }

    /// Energy the shooter regains from a hit
    pub fn shooter_bonus(power: f64) -> f64 {
        bullet_hit_energy_bonus(power)
    }

    /// Apply generic damage, returns true when the damage killed the bot
    pub fn apply_damage(bot: &mut BotState, damage: f64) -> bool {
        let was_alive = bot.is_alive();
        bot.energy -= damage;
        was_alive && bot.is_dead()
    }
}
