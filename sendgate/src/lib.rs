pub mod config;
pub mod controller;

pub use config::{Config, find_config_file};
pub use controller::{Components, Sendgate};
