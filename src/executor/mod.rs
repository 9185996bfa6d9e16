pub mod command;
pub mod coordinator;
pub mod input;
pub mod motion;
