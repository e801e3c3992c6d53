//! Bot movement rules and collision geometry

use super::model::{normalize_absolute_degrees, normalize_relative_degrees, ActiveIntent};
use super::rules::{
    max_turn_rate, ACCELERATION, DECELERATION, MAX_GUN_TURN_RATE, MAX_RADAR_TURN_RATE, MAX_SPEED,
};

/// Turns resolved for one bot in one turn (degrees, relative to the parent part)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ResolvedTurns {
    pub body: f64,
    /// Gun turn relative to the body
    pub gun: f64,
    /// Radar turn relative to the gun
    pub radar: f64,
}

/// Physics system for bot movement and collision checks
pub struct PhysicsSystem;

impl PhysicsSystem {
    /// New speed after one turn of accelerating towards `target_speed`.
    ///
    /// Speeding up gains at most `ACCELERATION`, braking loses at most
    /// `|DECELERATION|`. When braking through zero, the part of the turn left
    /// after standing still is spent accelerating in the new direction.
    pub fn new_speed(speed: f64, target_speed: f64) -> f64 {
        let target = target_speed.clamp(-MAX_SPEED, MAX_SPEED);
        if speed < 0.0 {
            return -Self::new_speed(-speed, -target);
        }

        let brake = -DECELERATION;
        let next = if target >= speed {
            (speed + ACCELERATION).min(target)
        } else if target >= 0.0 {
            (speed - brake).max(target)
        } else if speed >= brake {
            speed - brake
        } else {
            let remaining = 1.0 - speed / brake;
            (-ACCELERATION * remaining).max(target)
        };
        next.clamp(-MAX_SPEED, MAX_SPEED)
    }

    /// Clamp the requested turn rates given the current speed.
    ///
    /// With the adjust flags set the dependent part's own turn is reduced by
    /// the parent's turn, then clamped to the dependent part's own maximum.
    pub fn resolve_turns(speed: f64, intent: &ActiveIntent) -> ResolvedTurns {
        let body_limit = max_turn_rate(speed);
        let body = intent.turn_rate.clamp(-body_limit, body_limit);

        let mut gun = intent.gun_turn_rate;
        if intent.adjust_gun_for_body_turn {
            gun -= body;
        }
        let gun = gun.clamp(-MAX_GUN_TURN_RATE, MAX_GUN_TURN_RATE);

        let mut radar = intent.radar_turn_rate;
        if intent.adjust_radar_for_body_turn {
            radar -= body;
        }
        if intent.adjust_radar_for_gun_turn {
            radar -= gun;
        }
        let radar = radar.clamp(-MAX_RADAR_TURN_RATE, MAX_RADAR_TURN_RATE);

        ResolvedTurns { body, gun, radar }
    }

    /// Apply resolved turns to the three headings.
    /// Returns (body, gun, radar) absolute headings, normalized.
    pub fn apply_turns(
        direction: f64,
        gun_direction: f64,
        radar_direction: f64,
        turns: &ResolvedTurns,
    ) -> (f64, f64, f64) {
        let body = normalize_absolute_degrees(direction + turns.body);
        let gun = normalize_absolute_degrees(gun_direction + turns.body + turns.gun);
        let radar =
            normalize_absolute_degrees(radar_direction + turns.body + turns.gun + turns.radar);
        (body, gun, radar)
    }

    /// Move along a heading (degrees, 0 = east, counter-clockwise)
    pub fn move_along(x: f64, y: f64, direction: f64, distance: f64) -> (f64, f64) {
        let rad = direction.to_radians();
        (x + rad.cos() * distance, y + rad.sin() * distance)
    }

    /// Clamp a bot inside the arena. Returns the clamped position and whether
    /// it had to be moved. On an axis too short for the bot it is pinned to
    /// the middle of that axis.
    pub fn clamp_to_arena(x: f64, y: f64, radius: f64, width: f64, height: f64) -> (f64, f64, bool) {
        let cx = clamp_axis(x, radius, width);
        let cy = clamp_axis(y, radius, height);
        (cx, cy, cx != x || cy != y)
    }

    /// Bounding circle check: squared center distance against squared sum of
    /// radii, no square root needed
    pub fn circles_collide(x1: f64, y1: f64, r1: f64, x2: f64, y2: f64, r2: f64) -> bool {
        let dx = x2 - x1;
        let dy = y2 - y1;
        let dist_sq = dx * dx + dy * dy;
        let combined = r1 + r2;
        dist_sq <= combined * combined
    }

    /// Does the segment (x1,y1)-(x2,y2) touch the circle at (cx,cy)?
    pub fn segment_hits_circle(x1: f64, y1: f64, x2: f64, y2: f64, cx: f64, cy: f64, r: f64) -> bool {
        let dx = x2 - x1;
        let dy = y2 - y1;
        let len_sq = dx * dx + dy * dy;
        let t = if len_sq > 0.0 {
            (((cx - x1) * dx + (cy - y1) * dy) / len_sq).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let px = x1 + t * dx - cx;
        let py = y1 + t * dy - cy;
        px * px + py * py <= r * r
    }

    /// Do two line segments intersect (touching counts)?
    pub fn segments_intersect(a: (f64, f64), b: (f64, f64), c: (f64, f64), d: (f64, f64)) -> bool {
        fn orient(p: (f64, f64), q: (f64, f64), r: (f64, f64)) -> f64 {
            (q.0 - p.0) * (r.1 - p.1) - (q.1 - p.1) * (r.0 - p.0)
        }
        fn on_segment(p: (f64, f64), q: (f64, f64), r: (f64, f64)) -> bool {
            r.0 >= p.0.min(q.0) && r.0 <= p.0.max(q.0) && r.1 >= p.1.min(q.1) && r.1 <= p.1.max(q.1)
        }

        let d1 = orient(c, d, a);
        let d2 = orient(c, d, b);
        let d3 = orient(a, b, c);
        let d4 = orient(a, b, d);

        if ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
            && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
        {
            return true;
        }

        (d1 == 0.0 && on_segment(c, d, a))
            || (d2 == 0.0 && on_segment(c, d, b))
            || (d3 == 0.0 && on_segment(a, b, c))
            || (d4 == 0.0 && on_segment(a, b, d))
    }

    /// Absolute bearing from one point to another, degrees in [0, 360)
    pub fn bearing(from_x: f64, from_y: f64, to_x: f64, to_y: f64) -> f64 {
        normalize_absolute_degrees((to_y - from_y).atan2(to_x - from_x).to_degrees())
    }

    /// Is the target point inside the radar arc swept from `start` to `end`?
    /// A zero-width sweep sees nothing.
    pub fn in_radar_sweep(
        x: f64,
        y: f64,
        start: f64,
        end: f64,
        radius: f64,
        target_x: f64,
        target_y: f64,
    ) -> bool {
        let dx = target_x - x;
        let dy = target_y - y;
        if dx * dx + dy * dy > radius * radius {
            return false;
        }

        let sweep = normalize_relative_degrees(end - start);
        if sweep == 0.0 {
            return false;
        }

        let angle = Self::bearing(x, y, target_x, target_y);
        if sweep > 0.0 {
            normalize_absolute_degrees(angle - start) <= sweep
        } else {
            normalize_absolute_degrees(start - angle) <= -sweep
        }
    }

    /// Is the target in front of a bot driving at `speed` along `direction`?
    /// Used to decide which side of a collision did the ramming.
    pub fn is_driving_towards(
        x: f64,
        y: f64,
        direction: f64,
        speed: f64,
        target_x: f64,
        target_y: f64,
    ) -> bool {
        if speed == 0.0 {
            return false;
        }
        let travel = if speed > 0.0 { direction } else { direction + 180.0 };
        let bearing = Self::bearing(x, y, target_x, target_y);
        normalize_relative_degrees(bearing - travel).abs() < 90.0
    }
}

fn clamp_axis(value: f64, radius: f64, length: f64) -> f64 {
    let (low, high) = (radius, length - radius);
    if low <= high {
        value.clamp(low, high)
    } else {
        length / 2.0
    }
}
