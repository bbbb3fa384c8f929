pub mod backup_exchange;
pub mod core;
pub mod curriculum;
pub mod lessons;
pub mod setup;
