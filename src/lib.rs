pub mod audit;
pub mod circuit_breaker;
pub mod clock;
pub mod config;
pub mod config_validator;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod health;
pub mod key_generator;
pub mod metrics;
pub mod middleware;
pub mod rate_limit_config;
pub mod rate_limiter;
pub mod response;
pub mod retry;
pub mod server;
pub mod sheets;
pub mod validation;

pub use config::Config;
pub use error::{GatewayError, Result};
pub use response::ApiResponse;
pub use server::create_app;
