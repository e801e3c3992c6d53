//! Fixed game rules shared by the physics step, combat and scoring

/// Maximum absolute driving speed (units per turn)
pub const MAX_SPEED: f64 = 8.0;
/// Speed gained per turn when speeding up
pub const ACCELERATION: f64 = 1.0;
/// Speed lost per turn when braking (applied as a negative step)
pub const DECELERATION: f64 = -2.0;

/// Maximum body turn rate in degrees per turn (at standstill)
pub const MAX_TURN_RATE: f64 = 10.0;
/// Maximum gun turn rate in degrees per turn
pub const MAX_GUN_TURN_RATE: f64 = 20.0;
/// Maximum radar turn rate in degrees per turn
pub const MAX_RADAR_TURN_RATE: f64 = 45.0;
/// Body turn rate lost per unit of speed
pub const TURN_RATE_SPEED_PENALTY: f64 = 0.75;

/// Bounding circle radius of every bot
pub const BOT_RADIUS: f64 = 18.0;
/// How far the radar can see
pub const RADAR_RADIUS: f64 = 1200.0;

/// Firepower bounds
pub const MIN_FIREPOWER: f64 = 0.1;
pub const MAX_FIREPOWER: f64 = 3.0;

/// Energy every bot starts a round with
pub const START_ENERGY: f64 = 100.0;
/// Gun heat every bot starts a round with (cannot fire on the first turns)
pub const START_GUN_HEAT: f64 = 3.0;

/// Damage both bots take when they collide
pub const RAM_DAMAGE: f64 = 0.6;
/// Energy drained per turn from every bot once the battle is inactive
pub const INACTIVITY_ZAP: f64 = 0.1;

/// Score constants
pub mod score {
    /// Score per point of bullet damage dealt
    pub const BULLET_DAMAGE: f64 = 1.0;
    /// Share of the damage dealt to a victim awarded when the bullet kills it
    pub const BULLET_KILL_BONUS_PER_DAMAGE: f64 = 0.20;
    /// Score per point of ram damage dealt
    pub const RAM_DAMAGE: f64 = 2.0;
    /// Share of the ram damage dealt to a victim awarded when the ram kills it
    pub const RAM_KILL_BONUS_PER_DAMAGE: f64 = 0.30;
    /// Score for every enemy death outlived
    pub const SURVIVAL: f64 = 50.0;
    /// Bonus per enemy for being the last bot alive
    pub const LAST_SURVIVOR_BONUS_PER_ENEMY: f64 = 10.0;
}

/// Bullet speed is a monotonic (decreasing) function of firepower
pub fn bullet_speed(power: f64) -> f64 {
    20.0 - 3.0 * power
}

/// Damage a bullet of the given power inflicts on the bot it hits
pub fn bullet_damage(power: f64) -> f64 {
    let mut damage = 4.0 * power;
    if power > 1.0 {
        damage += 2.0 * (power - 1.0);
    }
    damage
}

/// Gun heat produced by firing with the given power
pub fn gun_heat(power: f64) -> f64 {
    1.0 + power / 5.0
}

/// Energy returned to the shooter when its bullet hits a bot
pub fn bullet_hit_energy_bonus(power: f64) -> f64 {
    3.0 * power
}

/// Damage taken by a bot driving into a wall
pub fn wall_damage(speed: f64) -> f64 {
    (speed.abs() / 2.0 - 1.0).max(0.0)
}

/// Body turn rate limit, shrinking as speed grows
pub fn max_turn_rate(speed: f64) -> f64 {
    MAX_TURN_RATE - TURN_RATE_SPEED_PENALTY * speed.abs().min(MAX_SPEED)
}
