pub mod config;
pub mod logging;
pub mod patterns;
pub mod source;

pub use config::TrafficConfig;
pub use source::{TrafficSource, TrafficStats};
