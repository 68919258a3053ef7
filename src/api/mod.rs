//! HTTP surface, spec.md §6 (ambient — see SPEC_FULL.md §6).

pub mod routes;

pub use routes::{router, AppState};
