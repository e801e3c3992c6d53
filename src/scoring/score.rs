//! Score records and competition ranking

use serde::{Deserialize, Serialize};

use crate::game::model::BotId;

/// Score components of one bot. Components only ever grow.
#[derive(Debug, Clone, PartialEq)]
pub struct Score {
    pub bot_id: BotId,
    pub bullet_damage: f64,
    pub bullet_kill_bonus: f64,
    pub ram_damage: f64,
    pub ram_kill_bonus: f64,
    pub survival: f64,
    pub last_survivor_bonus: f64,
    pub first_places: u32,
    pub second_places: u32,
    pub third_places: u32,
}

impl Score {
    pub fn new(bot_id: BotId) -> Self {
        Self {
            bot_id,
            bullet_damage: 0.0,
            bullet_kill_bonus: 0.0,
            ram_damage: 0.0,
            ram_kill_bonus: 0.0,
            survival: 0.0,
            last_survivor_bonus: 0.0,
            first_places: 0,
            second_places: 0,
            third_places: 0,
        }
    }

    pub fn total(&self) -> f64 {
        self.bullet_damage
            + self.bullet_kill_bonus
            + self.ram_damage
            + self.ram_kill_bonus
            + self.survival
            + self.last_survivor_bonus
    }

    /// Count a finishing place (1st, 2nd, 3rd; anything lower is not counted)
    pub fn add_placement(&mut self, place: u32) {
        match place {
            1 => self.first_places += 1,
            2 => self.second_places += 1,
            3 => self.third_places += 1,
            _ => {}
        }
    }

    /// Add every component and counter of `other`
    pub fn accumulate(&mut self, other: &Score) {
        self.bullet_damage += other.bullet_damage;
        self.bullet_kill_bonus += other.bullet_kill_bonus;
        self.ram_damage += other.ram_damage;
        self.ram_kill_bonus += other.ram_kill_bonus;
        self.survival += other.survival;
        self.last_survivor_bonus += other.last_survivor_bonus;
        self.first_places += other.first_places;
        self.second_places += other.second_places;
        self.third_places += other.third_places;
    }
}

/// Final standing of one bot, as sent to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotResults {
    pub id: BotId,
    pub name: String,
    pub version: String,
    pub rank: u32,
    pub total_score: f64,
    pub survival: f64,
    pub last_survivor_bonus: f64,
    pub bullet_damage: f64,
    pub bullet_kill_bonus: f64,
    pub ram_damage: f64,
    pub ram_kill_bonus: f64,
    pub first_places: u32,
    pub second_places: u32,
    pub third_places: u32,
}

impl BotResults {
    pub fn from_score(score: &Score, rank: u32, name: &str, version: &str) -> Self {
        Self {
            id: score.bot_id,
            name: name.to_string(),
            version: version.to_string(),
            rank,
            total_score: score.total(),
            survival: score.survival,
            last_survivor_bonus: score.last_survivor_bonus,
            bullet_damage: score.bullet_damage,
            bullet_kill_bonus: score.bullet_kill_bonus,
            ram_damage: score.ram_damage,
            ram_kill_bonus: score.ram_kill_bonus,
            first_places: score.first_places,
            second_places: score.second_places,
            third_places: score.third_places,
        }
    }
}

/// Competition ranks for totals, in input order.
///
/// Equal totals share a rank and consume the following numbers:
/// `[100, 90, 90, 80]` ranks as `[1, 2, 2, 4]`.
pub fn competition_ranks(totals: &[f64]) -> Vec<u32> {
    totals
        .iter()
        .map(|&t| 1 + totals.iter().filter(|&&other| other > t).count() as u32)
        .collect()
}

/// Sort scores by total (highest first, ties by bot id) and pair each with its rank
pub fn ranked(scores: &[Score]) -> Vec<(u32, Score)> {
    let mut sorted = scores.to_vec();
    sorted.sort_by(|a, b| b.total().total_cmp(&a.total()).then(a.bot_id.cmp(&b.bot_id)));
    let totals: Vec<f64> = sorted.iter().map(Score::total).collect();
    competition_ranks(&totals).into_iter().zip(sorted).collect()
}
