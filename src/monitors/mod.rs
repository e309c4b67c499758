//! Probing of monitored targets and interpretation of what a probe saw

pub mod health;
pub mod transition;

pub use health::HealthChecker;
pub use transition::NodeTransition;
