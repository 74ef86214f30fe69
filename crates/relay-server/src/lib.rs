pub mod server;

pub use server::{admit, build_router, start, AppState, Discard, ServerConfig, ServerHandle};
