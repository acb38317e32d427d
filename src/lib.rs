//! Case Desk · answer submission backend for detective cases.
//!
//! A submission session validates a free-text answer, compares it to the
//! case's solution and, when correct, records progress on the remote
//! backend (completed case ids + experience).

pub mod backend;
pub mod config;
pub mod domain;
pub mod error;
pub mod progress;
pub mod protocol;
pub mod routes;
pub mod seeds;
pub mod state;
pub mod submission;
pub mod telemetry;
pub mod util;
pub mod validation;

pub use routes::build_router;
pub use state::AppState;
