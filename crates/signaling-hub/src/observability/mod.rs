//! Health and readiness reporting.

pub mod health;

pub use health::{health_router, HealthState};
