pub mod automation;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod generation;
pub mod lifecycle;
pub mod notify;
pub mod persistence;
pub mod scheduler;
pub mod store;
pub mod terminal;
pub mod workflow;
