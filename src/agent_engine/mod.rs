pub mod engine;
pub mod event_bus;
pub mod history;
pub mod loop_control;
pub mod prompts;
pub mod regeneration;
pub mod scheduler;
pub mod state;
pub mod verification;
