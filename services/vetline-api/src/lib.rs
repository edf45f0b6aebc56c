//! HTTP and WebSocket surface of Vetline.

pub mod error;
pub mod extract;
pub mod handlers;
pub mod routes;
pub mod state;
pub mod ws;

pub use error::{ApiError, ApiResult};
pub use routes::router;
pub use state::AppState;
pub use ws::WsServer;
