//! Score tracking for one round and accumulation across rounds

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::debug;

use super::score::{ranked, BotResults, Score};
use crate::game::model::BotId;
use crate::game::rules::{score, RAM_DAMAGE};

/// Scores of one round.
///
/// Deaths must be registered in the order they happen: survival credit,
/// the last survivor bonus and placements all depend on it.
#[derive(Debug, Clone)]
pub struct ScoreTracker {
    participant_count: usize,
    scores: BTreeMap<BotId, Score>,
    alive: BTreeSet<BotId>,
    /// Raw bullet damage dealt per (attacker, victim)
    bullet_damage_to: HashMap<(BotId, BotId), f64>,
    /// Ram score dealt per (attacker, victim)
    ram_damage_to: HashMap<(BotId, BotId), f64>,
    placements: BTreeMap<BotId, u32>,
    last_survivor: Option<BotId>,
}

impl ScoreTracker {
    pub fn new(participants: &[BotId]) -> Self {
        Self {
            participant_count: participants.len(),
            scores: participants.iter().map(|&id| (id, Score::new(id))).collect(),
            alive: participants.iter().copied().collect(),
            bullet_damage_to: HashMap::new(),
            ram_damage_to: HashMap::new(),
            placements: BTreeMap::new(),
            last_survivor: None,
        }
    }

    pub fn alive_count(&self) -> usize {
        self.alive.len()
    }

    pub fn is_alive(&self, id: BotId) -> bool {
        self.alive.contains(&id)
    }

    pub fn last_survivor(&self) -> Option<BotId> {
        self.last_survivor
    }

    pub fn placement(&self, id: BotId) -> Option<u32> {
        self.placements.get(&id).copied()
    }

    pub fn score(&self, id: BotId) -> Option<&Score> {
        self.scores.get(&id)
    }

    /// A bullet from `attacker` hit `victim`.
    ///
    /// A killing hit adds a bonus proportional to all the bullet damage the
    /// attacker dealt to that victim this round, the killing hit included.
    pub fn register_bullet_hit(&mut self, attacker: BotId, victim: BotId, damage: f64, is_kill: bool) {
        if attacker == victim || !damage.is_finite() || damage < 0.0 {
            return;
        }
        let Some(s) = self.scores.get_mut(&attacker) else {
            return;
        };

        s.bullet_damage += damage * score::BULLET_DAMAGE;
        let dealt = self.bullet_damage_to.entry((attacker, victim)).or_insert(0.0);
        *dealt += damage;

        if is_kill {
            s.bullet_kill_bonus += *dealt * score::BULLET_KILL_BONUS_PER_DAMAGE;
            debug!(attacker = %attacker, victim = %victim, bonus = *dealt * score::BULLET_KILL_BONUS_PER_DAMAGE, "Bullet kill");
        }
    }

    /// `attacker` rammed `victim`
    pub fn register_ram_hit(&mut self, attacker: BotId, victim: BotId, is_kill: bool) {
        if attacker == victim {
            return;
        }
        let Some(s) = self.scores.get_mut(&attacker) else {
            return;
        };

        let gained = RAM_DAMAGE * score::RAM_DAMAGE;
        s.ram_damage += gained;
        let dealt = self.ram_damage_to.entry((attacker, victim)).or_insert(0.0);
        *dealt += gained;

        if is_kill {
            s.ram_kill_bonus += *dealt * score::RAM_KILL_BONUS_PER_DAMAGE;
        }
    }

    /// Register bots that died together in one turn.
    ///
    /// Every bot still alive afterwards gains survival score per death. The
    /// group shares one placement: with `n` alive before, `k` simultaneous
    /// deaths all finish at place `n - k + 1`. When exactly one bot is left it
    /// earns the last survivor bonus, and keeps it even if it dies later.
    /// Returns the shared placement, or None if no listed bot was alive.
    pub fn register_deaths(&mut self, ids: &[BotId]) -> Option<u32> {
        let dying: BTreeSet<BotId> = ids.iter().copied().filter(|id| self.alive.contains(id)).collect();
        if dying.is_empty() {
            return None;
        }

        let alive_before = self.alive.len();
        for id in &dying {
            self.alive.remove(id);
        }

        for survivor in &self.alive {
            if let Some(s) = self.scores.get_mut(survivor) {
                s.survival += score::SURVIVAL * dying.len() as f64;
            }
        }

        let place = (alive_before - dying.len() + 1) as u32;
        for id in &dying {
            self.placements.insert(*id, place);
        }

        if self.alive.len() == 1 && self.last_survivor.is_none() {
            if let Some(&last) = self.alive.iter().next() {
                self.last_survivor = Some(last);
                if let Some(s) = self.scores.get_mut(&last) {
                    s.last_survivor_bonus +=
                        score::LAST_SURVIVOR_BONUS_PER_ENEMY * (self.participant_count - 1) as f64;
                }
            }
        }

        Some(place)
    }

    /// Bots alive at the end of the round share first place
    pub fn register_survivors(&mut self) {
        for id in &self.alive {
            self.placements.insert(*id, 1);
        }
    }

    /// Scores of the round with placement counters filled in
    pub fn round_scores(&self) -> Vec<Score> {
        self.scores
            .values()
            .map(|s| {
                let mut s = s.clone();
                if let Some(&place) = self.placements.get(&s.bot_id) {
                    s.add_placement(place);
                }
                s
            })
            .collect()
    }
}

/// Scores summed over every finished round of a battle
#[derive(Debug, Clone, Default)]
pub struct AccumulatedScores {
    totals: BTreeMap<BotId, Score>,
    rounds: u32,
}

impl AccumulatedScores {
    pub fn new(participants: &[BotId]) -> Self {
        Self {
            totals: participants.iter().map(|&id| (id, Score::new(id))).collect(),
            rounds: 0,
        }
    }

    pub fn rounds(&self) -> u32 {
        self.rounds
    }

    pub fn add_round(&mut self, round: &[Score]) {
        for s in round {
            self.totals
                .entry(s.bot_id)
                .or_insert_with(|| Score::new(s.bot_id))
                .accumulate(s);
        }
        self.rounds += 1;
    }

    pub fn scores(&self) -> Vec<Score> {
        self.totals.values().cloned().collect()
    }

    /// Ranked results; `describe` supplies each bot's name and version
    pub fn results<F>(&self, describe: F) -> Vec<BotResults>
    where
        F: Fn(BotId) -> (String, String),
    {
        results_for(&self.scores(), describe)
    }
}

/// Rank `scores` and attach names
pub fn results_for<F>(scores: &[Score], describe: F) -> Vec<BotResults>
where
    F: Fn(BotId) -> (String, String),
{
    ranked(scores)
        .into_iter()
        .map(|(rank, s)| {
            let (name, version) = describe(s.bot_id);
            BotResults::from_score(&s, rank, &name, &version)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn four() -> ScoreTracker {
        ScoreTracker::new(&[BotId(1), BotId(2), BotId(3), BotId(4)])
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn non_kill_hits_sum_without_bonus() {
        let mut t = four();
        let damages = [4.0, 0.4, 16.0, 7.5, 1.25];
        for (i, d) in damages.iter().enumerate() {
            let victim = BotId(2 + (i % 3) as u32);
            t.register_bullet_hit(BotId(1), victim, *d, false);
        }
        let s = t.score(BotId(1)).expect("score");
        assert!(approx(s.bullet_damage, damages.iter().sum::<f64>()));
        assert_eq!(s.bullet_kill_bonus, 0.0);
    }

    #[test]
    fn kill_bonus_counts_all_damage_to_the_victim() {
        let mut t = four();
        t.register_bullet_hit(BotId(2), BotId(3), 0.25, false);
        t.register_bullet_hit(BotId(2), BotId(4), 10.0, false);
        t.register_bullet_hit(BotId(2), BotId(3), 0.75, false);
        t.register_bullet_hit(BotId(2), BotId(3), 2.33, true);

        let s = t.score(BotId(2)).expect("score");
        assert!(approx(s.bullet_damage, 13.33));
        assert!(approx(s.bullet_kill_bonus, 3.33 * score::BULLET_KILL_BONUS_PER_DAMAGE));
    }

    #[test]
    fn end_to_end_kill_scenario() {
        let mut t = four();
        t.register_bullet_hit(BotId(2), BotId(3), 0.25, false);
        t.register_bullet_hit(BotId(2), BotId(3), 0.75, false);
        t.register_bullet_hit(BotId(2), BotId(3), 2.33, true);

        let s = t.score(BotId(2)).expect("score");
        assert!(approx(s.bullet_damage, 3.33));
        assert!(approx(s.bullet_kill_bonus, 3.33 * score::BULLET_KILL_BONUS_PER_DAMAGE));
        assert!(approx(
            s.total(),
            3.33 * score::BULLET_DAMAGE + 3.33 * score::BULLET_KILL_BONUS_PER_DAMAGE
        ));
    }

    #[test]
    fn ram_kill_bonus_uses_ram_damage_dealt() {
        let mut t = four();
        t.register_ram_hit(BotId(1), BotId(2), false);
        t.register_ram_hit(BotId(1), BotId(2), true);

        let s = t.score(BotId(1)).expect("score");
        let per_ram = RAM_DAMAGE * score::RAM_DAMAGE;
        assert!(approx(s.ram_damage, 2.0 * per_ram));
        assert!(approx(s.ram_kill_bonus, 2.0 * per_ram * score::RAM_KILL_BONUS_PER_DAMAGE));
    }

    #[test]
    fn survival_goes_to_everyone_still_alive() {
        let mut t = four();
        t.register_deaths(&[BotId(4)]);
        t.register_deaths(&[BotId(3)]);

        assert_eq!(t.score(BotId(1)).map(|s| s.survival), Some(100.0));
        assert_eq!(t.score(BotId(2)).map(|s| s.survival), Some(100.0));
        assert_eq!(t.score(BotId(3)).map(|s| s.survival), Some(50.0));
        assert_eq!(t.score(BotId(4)).map(|s| s.survival), Some(0.0));
    }

    #[test]
    fn simultaneous_deaths_share_a_place() {
        let mut t = four();
        assert_eq!(t.register_deaths(&[BotId(3), BotId(4)]), Some(3));
        assert_eq!(t.register_deaths(&[BotId(2)]), Some(2));
        t.register_survivors();

        assert_eq!(t.placement(BotId(3)), Some(3));
        assert_eq!(t.placement(BotId(4)), Some(3));
        assert_eq!(t.placement(BotId(2)), Some(2));
        assert_eq!(t.placement(BotId(1)), Some(1));

        let scores = t.round_scores();
        let thirds: u32 = scores.iter().map(|s| s.third_places).sum();
        assert_eq!(thirds, 2);
    }

    #[test]
    fn last_survivor_bonus_is_sticky() {
        let mut t = four();
        t.register_deaths(&[BotId(2), BotId(3)]);
        t.register_deaths(&[BotId(4)]);
        assert_eq!(t.last_survivor(), Some(BotId(1)));

        // The survivor dies afterwards (e.g. inactivity) and keeps the bonus
        t.register_deaths(&[BotId(1)]);
        let bonus = t.score(BotId(1)).map(|s| s.last_survivor_bonus);
        assert_eq!(bonus, Some(30.0));
        assert_eq!(t.alive_count(), 0);
    }

    #[test]
    fn nobody_survives_a_wipeout() {
        let mut t = four();
        t.register_deaths(&[BotId(1), BotId(2)]);
        t.register_deaths(&[BotId(3), BotId(4)]);
        assert_eq!(t.last_survivor(), None);
        assert_eq!(t.placement(BotId(3)), Some(1));
    }

    #[test]
    fn dead_bots_are_not_registered_twice() {
        let mut t = four();
        assert_eq!(t.register_deaths(&[BotId(4)]), Some(4));
        assert_eq!(t.register_deaths(&[BotId(4)]), None);
        assert_eq!(t.score(BotId(1)).map(|s| s.survival), Some(50.0));
    }

    #[test]
    fn rounds_accumulate_and_rank() {
        let ids = [BotId(1), BotId(2)];
        let mut total = AccumulatedScores::new(&ids);

        for winner in [BotId(1), BotId(2), BotId(1)] {
            let loser = if winner == BotId(1) { BotId(2) } else { BotId(1) };
            let mut round = ScoreTracker::new(&ids);
            round.register_bullet_hit(winner, loser, 20.0, true);
            round.register_deaths(&[loser]);
            round.register_survivors();
            total.add_round(&round.round_scores());
        }

        let results = total.results(|id| (format!("bot-{id}"), "1.0".to_string()));
        assert_eq!(total.rounds(), 3);
        assert_eq!(results[0].id, BotId(1));
        assert_eq!(results[0].rank, 1);
        assert_eq!(results[0].first_places, 2);
        assert_eq!(results[0].second_places, 1);
        assert_eq!(results[1].rank, 2);
        assert_eq!(results[1].name, "bot-2");
    }
}
