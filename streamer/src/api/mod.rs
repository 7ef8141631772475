//! HTTP façade over the session lifecycle.

pub mod error;
pub mod routes;
pub mod server;

pub use error::{ApiError, ApiResult};
pub use server::{ApiServer, AppState, build_router};
