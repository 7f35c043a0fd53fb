pub mod models;
pub mod persister;
