/// Esplora Mock Server Library
///
/// An in-memory Esplora API for tests and local development. Chain state is
/// seeded directly (or from a JSON fixture) instead of coming from a node,
/// and any path can be made to fail with a chosen HTTP status.

pub mod handlers;
pub mod server;
pub mod state;
pub mod types;

// Re-export commonly used types
pub use server::{create_router, run_server, spawn_server, MockServer};
pub use state::{AppState, MockChain};
pub use types::*;
