pub mod escalation;
pub mod planner;
pub mod reaper;
pub mod sessions;
pub mod turns;
