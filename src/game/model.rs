//! Entity model - plain state records for bots and bullets

use serde::{Deserialize, Serialize};
use std::fmt;

use super::rules::{MAX_FIREPOWER, MAX_GUN_TURN_RATE, MAX_RADAR_TURN_RATE, MAX_SPEED, MAX_TURN_RATE};

/// Participant id, unique within a session (assigned 1..n at game start)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BotId(pub u32);

impl fmt::Display for BotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Bullet id, unique within a round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BulletId(pub u32);

/// Normalize an absolute angle into [0, 360)
pub fn normalize_absolute_degrees(angle: f64) -> f64 {
    let normalized = angle.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs
    if normalized >= 360.0 {
        0.0
    } else {
        normalized
    }
}

/// Normalize a relative angle into (-180, 180]
pub fn normalize_relative_degrees(angle: f64) -> f64 {
    let a = normalize_absolute_degrees(angle);
    if a > 180.0 {
        a - 360.0
    } else {
        a
    }
}

/// Cosmetic colors a bot may request, as `#RRGGBB` strings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotColors {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub radar: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bullet: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scan: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracks: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gun: Option<String>,
}

impl BotColors {
    /// Apply the colors present in `changes`; malformed colors are ignored
    pub fn merge(&mut self, changes: &BotColors) {
        fn pick(target: &mut Option<String>, change: &Option<String>) {
            if let Some(color) = change {
                if is_valid_color(color) {
                    *target = Some(color.clone());
                }
            }
        }
        pick(&mut self.body, &changes.body);
        pick(&mut self.turret, &changes.turret);
        pick(&mut self.radar, &changes.radar);
        pick(&mut self.bullet, &changes.bullet);
        pick(&mut self.scan, &changes.scan);
        pick(&mut self.tracks, &changes.tracks);
        pick(&mut self.gun, &changes.gun);
    }
}

fn is_valid_color(color: &str) -> bool {
    let Some(hex) = color.strip_prefix('#') else {
        return false;
    };
    matches!(hex.len(), 3 | 6) && hex.chars().all(|c| c.is_ascii_hexdigit())
}

/// Control values a participant submits for a turn.
///
/// Every field is optional: an absent field means "no change requested" and
/// the previously set value stays in effect.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BotIntent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_speed: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gun_turn_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radar_turn_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firepower: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adjust_gun_for_body_turn: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adjust_radar_for_body_turn: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adjust_radar_for_gun_turn: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rescan: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub colors: Option<BotColors>,
}

/// The intent currently in effect for a bot, after merging submissions
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActiveIntent {
    pub target_speed: f64,
    pub turn_rate: f64,
    pub gun_turn_rate: f64,
    pub radar_turn_rate: f64,
    /// Requested firepower for the next firing attempt (0 = hold fire)
    pub firepower: f64,
    pub adjust_gun_for_body_turn: bool,
    pub adjust_radar_for_body_turn: bool,
    pub adjust_radar_for_gun_turn: bool,
    pub rescan: bool,
}

impl ActiveIntent {
    /// Merge a submitted intent, clamping numeric fields to their natural bounds
    pub fn merge(&mut self, intent: &BotIntent) {
        if let Some(v) = intent.target_speed.filter(|v| v.is_finite()) {
            self.target_speed = v.clamp(-MAX_SPEED, MAX_SPEED);
        }
        if let Some(v) = intent.turn_rate.filter(|v| v.is_finite()) {
            self.turn_rate = v.clamp(-MAX_TURN_RATE, MAX_TURN_RATE);
        }
        if let Some(v) = intent.gun_turn_rate.filter(|v| v.is_finite()) {
            self.gun_turn_rate = v.clamp(-MAX_GUN_TURN_RATE, MAX_GUN_TURN_RATE);
        }
        if let Some(v) = intent.radar_turn_rate.filter(|v| v.is_finite()) {
            self.radar_turn_rate = v.clamp(-MAX_RADAR_TURN_RATE, MAX_RADAR_TURN_RATE);
        }
        if let Some(v) = intent.firepower.filter(|v| v.is_finite()) {
            self.firepower = v.clamp(0.0, MAX_FIREPOWER);
        }
        if let Some(v) = intent.adjust_gun_for_body_turn {
            self.adjust_gun_for_body_turn = v;
        }
        if let Some(v) = intent.adjust_radar_for_body_turn {
            self.adjust_radar_for_body_turn = v;
        }
        if let Some(v) = intent.adjust_radar_for_gun_turn {
            self.adjust_radar_for_gun_turn = v;
        }
        if let Some(v) = intent.rescan {
            self.rescan = v;
        }
    }

    /// One-shot fields are consumed by the turn they were submitted for
    pub fn clear_one_shot(&mut self) {
        self.firepower = 0.0;
        self.rescan = false;
    }
}

/// Authoritative bot state for one turn
#[derive(Debug, Clone, PartialEq)]
pub struct BotState {
    pub id: BotId,
    pub x: f64,
    pub y: f64,
    /// Body heading in degrees, always in [0, 360)
    pub direction: f64,
    pub gun_direction: f64,
    pub radar_direction: f64,
    /// Radar heading before this turn's sweep
    pub radar_sweep_start: f64,
    pub speed: f64,
    pub energy: f64,
    pub gun_heat: f64,
    /// Effective turn rates applied this turn
    pub turn_rate: f64,
    pub gun_turn_rate: f64,
    pub radar_turn_rate: f64,
    pub intent: ActiveIntent,
    pub colors: BotColors,
}

impl BotState {
    pub fn new(id: BotId, x: f64, y: f64, direction: f64, energy: f64, gun_heat: f64) -> Self {
        let direction = normalize_absolute_degrees(direction);
        Self {
            id,
            x,
            y,
            direction,
            gun_direction: direction,
            radar_direction: direction,
            radar_sweep_start: direction,
            speed: 0.0,
            energy,
            gun_heat,
            turn_rate: 0.0,
            gun_turn_rate: 0.0,
            radar_turn_rate: 0.0,
            intent: ActiveIntent::default(),
            colors: BotColors::default(),
        }
    }

    /// Energy >= 0
    pub fn is_alive(&self) -> bool {
        self.energy >= 0.0
    }

    /// Alive with no energy left: cannot move, turn or fire
    pub fn is_disabled(&self) -> bool {
        self.energy == 0.0
    }

    pub fn is_dead(&self) -> bool {
        self.energy < 0.0
    }

    /// Debug check of the stored-state invariants
    pub fn check_invariants(&self) -> bool {
        let in_range = |a: f64| (0.0..360.0).contains(&a);
        in_range(self.direction)
            && in_range(self.gun_direction)
            && in_range(self.radar_direction)
            && self.gun_heat >= 0.0
            && self.speed.abs() <= MAX_SPEED
    }
}

/// A bullet in flight
#[derive(Debug, Clone, PartialEq)]
pub struct BulletState {
    pub id: BulletId,
    pub owner: BotId,
    pub x: f64,
    pub y: f64,
    pub direction: f64,
    pub power: f64,
    pub color: Option<String>,
}

impl BulletState {
    pub fn speed(&self) -> f64 {
        super::rules::bullet_speed(self.power)
    }

    /// Position after one more turn of flight
    pub fn next_position(&self) -> (f64, f64) {
        let rad = self.direction.to_radians();
        let speed = self.speed();
        (self.x + rad.cos() * speed, self.y + rad.sin() * speed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_angles_are_normalized() {
        assert_eq!(normalize_absolute_degrees(370.0), 10.0);
        assert_eq!(normalize_absolute_degrees(-90.0), 270.0);
        assert_eq!(normalize_absolute_degrees(360.0), 0.0);
        assert!(normalize_absolute_degrees(-1e-18) < 360.0);
    }

    #[test]
    fn relative_angles_are_normalized() {
        assert_eq!(normalize_relative_degrees(190.0), -170.0);
        assert_eq!(normalize_relative_degrees(-190.0), 170.0);
        assert_eq!(normalize_relative_degrees(180.0), 180.0);
    }

    #[test]
    fn intent_merge_keeps_absent_fields() {
        let mut active = ActiveIntent::default();
        active.merge(&BotIntent {
            target_speed: Some(5.0),
            turn_rate: Some(4.0),
            ..Default::default()
        });
        active.merge(&BotIntent {
            gun_turn_rate: Some(-3.0),
            ..Default::default()
        });

        assert_eq!(active.target_speed, 5.0);
        assert_eq!(active.turn_rate, 4.0);
        assert_eq!(active.gun_turn_rate, -3.0);
    }

    #[test]
    fn intent_merge_clamps_out_of_range_values() {
        let mut active = ActiveIntent::default();
        active.merge(&BotIntent {
            target_speed: Some(100.0),
            turn_rate: Some(-50.0),
            radar_turn_rate: Some(90.0),
            firepower: Some(10.0),
            ..Default::default()
        });

        assert_eq!(active.target_speed, MAX_SPEED);
        assert_eq!(active.turn_rate, -MAX_TURN_RATE);
        assert_eq!(active.radar_turn_rate, MAX_RADAR_TURN_RATE);
        assert_eq!(active.firepower, MAX_FIREPOWER);
    }

    #[test]
    fn intent_merge_ignores_nan() {
        let mut active = ActiveIntent {
            target_speed: 3.0,
            ..Default::default()
        };
        active.merge(&BotIntent {
            target_speed: Some(f64::NAN),
            ..Default::default()
        });
        assert_eq!(active.target_speed, 3.0);
    }

    #[test]
    fn colors_merge_rejects_malformed_values() {
        let mut colors = BotColors::default();
        colors.merge(&BotColors {
            body: Some("#FF0000".into()),
            gun: Some("red".into()),
            ..Default::default()
        });
        assert_eq!(colors.body.as_deref(), Some("#FF0000"));
        assert_eq!(colors.gun, None);
    }

    #[test]
    fn energy_levels_classify_bot() {
        let mut bot = BotState::new(BotId(1), 0.0, 0.0, 0.0, 0.0, 0.0);
        assert!(bot.is_alive() && bot.is_disabled());
        bot.energy = -0.1;
        assert!(bot.is_dead() && !bot.is_alive());
    }
}
