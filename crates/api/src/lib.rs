// API crate clippy configuration
// Test code patterns:
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! PayBridge API Library
//!
//! HTTP surface for the billing backend: the inbound Stripe webhook
//! endpoint plus tenant-facing wrappers over the payment provider.

pub mod config;
pub mod error;
pub mod relay;
pub mod routes;
pub mod state;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
