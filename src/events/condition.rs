//! Per-turn condition predicates that synthesize condition events

use std::panic::{catch_unwind, AssertUnwindSafe};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::game::model::BotState;

/// What a condition can look at when tested
#[derive(Debug, Clone, Copy)]
pub struct ConditionContext<'a> {
    pub round: u32,
    pub turn: u32,
    /// The bot the condition is registered for
    pub bot: &'a BotState,
    /// Bots still alive this round, including `bot`
    pub alive_count: usize,
}

/// A named predicate tested once per turn for one bot
pub trait Condition: Send + Sync {
    fn name(&self) -> &str;

    fn test(&self, ctx: &ConditionContext<'_>) -> anyhow::Result<bool>;
}

/// Test a condition, treating errors and panics as "not met"
pub fn evaluate(condition: &dyn Condition, ctx: &ConditionContext<'_>) -> bool {
    match catch_unwind(AssertUnwindSafe(|| condition.test(ctx))) {
        Ok(Ok(met)) => met,
        Ok(Err(e)) => {
            debug!(bot_id = %ctx.bot.id, condition = condition.name(), error = %e, "Condition failed");
            false
        }
        Err(_) => {
            debug!(bot_id = %ctx.bot.id, condition = condition.name(), "Condition panicked");
            false
        }
    }
}

/// Condition built from a closure
pub struct FnCondition<F> {
    name: String,
    predicate: F,
}

impl<F> FnCondition<F>
where
    F: Fn(&ConditionContext<'_>) -> anyhow::Result<bool> + Send + Sync,
{
    pub fn new(name: impl Into<String>, predicate: F) -> Self {
        Self {
            name: name.into(),
            predicate,
        }
    }
}

impl<F> Condition for FnCondition<F>
where
    F: Fn(&ConditionContext<'_>) -> anyhow::Result<bool> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn test(&self, ctx: &ConditionContext<'_>) -> anyhow::Result<bool> {
        (self.predicate)(ctx)
    }
}

/// Met while the bot's energy is at or below a threshold
pub struct LowEnergy {
    pub threshold: f64,
}

impl Condition for LowEnergy {
    fn name(&self) -> &str {
        "low_energy"
    }

    fn test(&self, ctx: &ConditionContext<'_>) -> anyhow::Result<bool> {
        Ok(ctx.bot.energy <= self.threshold)
    }
}

/// Met when the bot is the last one standing
pub struct LastBotStanding;

impl Condition for LastBotStanding {
    fn name(&self) -> &str {
        "last_bot_standing"
    }

    fn test(&self, ctx: &ConditionContext<'_>) -> anyhow::Result<bool> {
        Ok(ctx.alive_count == 1 && ctx.bot.is_alive())
    }
}

/// Built-in condition a bot can ask the server to test for it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConditionSpec {
    LowEnergy { threshold: f64 },
    LastBotStanding,
}

impl ConditionSpec {
    pub fn build(&self) -> Box<dyn Condition> {
        match *self {
            ConditionSpec::LowEnergy { threshold } => Box::new(LowEnergy { threshold }),
            ConditionSpec::LastBotStanding => Box::new(LastBotStanding),
        }
    }
}

/// Conditions registered for one bot
#[derive(Default)]
pub struct ConditionSet {
    conditions: Vec<Box<dyn Condition>>,
}

impl ConditionSet {
    pub fn add(&mut self, condition: Box<dyn Condition>) {
        self.conditions.push(condition);
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.conditions.len();
        self.conditions.retain(|c| c.name() != name);
        before != self.conditions.len()
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Names of the conditions met this turn, in registration order
    pub fn met(&self, ctx: &ConditionContext<'_>) -> Vec<String> {
        self.conditions
            .iter()
            .filter(|c| evaluate(c.as_ref(), ctx))
            .map(|c| c.name().to_string())
            .collect()
    }
}

impl std::fmt::Debug for ConditionSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.conditions.iter().map(|c| c.name())).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::model::BotId;

    fn ctx(bot: &BotState) -> ConditionContext<'_> {
        ConditionContext {
            round: 1,
            turn: 10,
            bot,
            alive_count: 2,
        }
    }

    #[test]
    fn failing_condition_is_not_met() {
        let bot = BotState::new(BotId(1), 0.0, 0.0, 0.0, 100.0, 0.0);
        let failing = FnCondition::new("broken", |_: &ConditionContext<'_>| Err(anyhow::anyhow!("boom")));
        assert!(!evaluate(&failing, &ctx(&bot)));
    }

    #[test]
    fn panicking_condition_is_not_met() {
        let bot = BotState::new(BotId(1), 0.0, 0.0, 0.0, 100.0, 0.0);
        let panicking = FnCondition::new("panics", |_: &ConditionContext<'_>| -> anyhow::Result<bool> {
            panic!("bad predicate")
        });
        assert!(!evaluate(&panicking, &ctx(&bot)));
    }

    #[test]
    fn set_reports_met_conditions_only() {
        let mut bot = BotState::new(BotId(1), 0.0, 0.0, 0.0, 100.0, 0.0);
        let mut set = ConditionSet::default();
        set.add(Box::new(LowEnergy { threshold: 20.0 }));
        set.add(Box::new(FnCondition::new("late", |c: &ConditionContext<'_>| Ok(c.turn > 5))));
        set.add(Box::new(LastBotStanding));

        assert_eq!(set.met(&ctx(&bot)), vec!["late".to_string()]);

        bot.energy = 10.0;
        assert_eq!(set.met(&ctx(&bot)), vec!["low_energy".to_string(), "late".to_string()]);

        assert!(set.remove("late"));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn spec_builds_named_condition() {
        let spec: ConditionSpec = serde_json::from_str(r#"{"kind":"low_energy","threshold":30.0}"#).expect("spec");
        assert_eq!(spec, ConditionSpec::LowEnergy { threshold: 30.0 });
        assert_eq!(spec.build().name(), "low_energy");
        assert_eq!(ConditionSpec::LastBotStanding.build().name(), "last_bot_standing");
    }
}
