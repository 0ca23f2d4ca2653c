pub mod authorization;
pub mod debt;
pub mod follow_up;
pub mod history;
pub mod rule;
pub mod state;
