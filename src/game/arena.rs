//! Arena bounds and round start positions

use rand::Rng;
use rand_chacha::ChaCha8Rng;

use super::physics::PhysicsSystem;
use super::rules::BOT_RADIUS;

/// Rectangular battlefield, origin at the bottom-left corner
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Arena {
    pub width: f64,
    pub height: f64,
}

/// Start pose for one bot
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StartPosition {
    pub x: f64,
    pub y: f64,
    pub direction: f64,
}

impl Arena {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// Is the point inside the arena (edges included)?
    pub fn contains(&self, x: f64, y: f64) -> bool {
        (0.0..=self.width).contains(&x) && (0.0..=self.height).contains(&y)
    }

    /// Generate non-overlapping start positions for `count` bots.
    ///
    /// Falls back to accepting an overlap after a bounded number of attempts so
    /// a crowded arena can never stall a round start.
    pub fn start_positions(&self, count: usize, rng: &mut ChaCha8Rng) -> Vec<StartPosition> {
        const MAX_ATTEMPTS: usize = 100;
        let margin = BOT_RADIUS;
        let mut positions: Vec<StartPosition> = Vec::with_capacity(count);

        for _ in 0..count {
            let mut candidate = self.random_position(margin, rng);
            for _ in 0..MAX_ATTEMPTS {
                let overlaps = positions.iter().any(|p| {
                    PhysicsSystem::circles_collide(p.x, p.y, BOT_RADIUS, candidate.x, candidate.y, BOT_RADIUS)
                });
                if !overlaps {
                    break;
                }
                candidate = self.random_position(margin, rng);
            }
            positions.push(candidate);
        }

        positions
    }

    fn random_position(&self, margin: f64, rng: &mut ChaCha8Rng) -> StartPosition {
        let max_x = (self.width - margin).max(margin);
        let max_y = (self.height - margin).max(margin);
        StartPosition {
            x: rng.gen_range(margin..=max_x),
            y: rng.gen_range(margin..=max_y),
            direction: rng.gen_range(0.0..360.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn start_positions_are_inside_and_apart() {
        let arena = Arena::new(800.0, 600.0);
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let positions = arena.start_positions(10, &mut rng);

        assert_eq!(positions.len(), 10);
        for (i, a) in positions.iter().enumerate() {
            assert!(a.x >= BOT_RADIUS && a.x <= 800.0 - BOT_RADIUS);
            assert!(a.y >= BOT_RADIUS && a.y <= 600.0 - BOT_RADIUS);
            for b in &positions[i + 1..] {
                assert!(!PhysicsSystem::circles_collide(a.x, a.y, BOT_RADIUS, b.x, b.y, BOT_RADIUS));
            }
        }
    }

    #[test]
    fn same_seed_same_positions() {
        let arena = Arena::new(1000.0, 1000.0);
        let a = arena.start_positions(5, &mut ChaCha8Rng::seed_from_u64(42));
        let b = arena.start_positions(5, &mut ChaCha8Rng::seed_from_u64(42));
        assert_eq!(a, b);
    }
}
