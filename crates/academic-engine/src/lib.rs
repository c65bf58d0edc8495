//! Weighted grade computation and end-of-session promotion for multi-tenant schools.
//!
//! The [`academics`] module holds the domain: grading templates, teacher component
//! mappings, the weighted calculator, class ranking, and the promotion planner and
//! executor. Persistence and notification delivery are collaborators behind the traits in
//! [`academics::repository`].

pub mod academics;
pub mod config;
pub mod error;
pub mod telemetry;
