//! Game simulation modules

pub mod arena;
pub mod combat;
pub mod model;
pub mod physics;
pub mod rules;
pub mod step;

pub use arena::Arena;
pub use model::{BotId, BotIntent, BotState, BulletId, BulletState};
pub use step::{advance, CollisionFact, StepParams, TurnState};
