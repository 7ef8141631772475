//! On-demand live TV transcoding front end.
//!
//! One encoder process per channel, started by the first manifest request
//! and stopped once no viewer has fetched a segment for a while.

pub mod api;
pub mod app;
pub mod config;
pub mod encoder;
pub mod error;
pub mod logging;
pub mod readiness;
pub mod session;
pub mod storage;
pub mod supervisor;
pub mod utils;

pub use error::{Error, Result};
