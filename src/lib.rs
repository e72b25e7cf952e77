pub mod actions;
pub mod battery;
pub mod config;
pub mod error;
pub mod events;
pub mod inhibit;
pub mod manager;
pub mod modes;
pub mod platform;
pub mod scheduler;
