//! Management API: script results, manual runs, alert state and counters

pub mod handlers;
pub mod server;

pub use handlers::{ApiError, AppState};
pub use server::{build_router, run_server};
