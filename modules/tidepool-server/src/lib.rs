//! Thin HTTP adapter over the core: route wiring, API-key check, and the
//! error-to-status mapping. All domain behavior lives below this crate.

pub mod routes;
pub mod state;

pub use routes::build_router;
pub use state::AppState;
