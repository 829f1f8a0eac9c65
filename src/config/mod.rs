// src/config/mod.rs
pub mod ai;
pub mod settings;
pub mod sources;

pub use settings::Settings;
pub use sources::{load_seed_default, SeedConfig};
