pub mod client;
pub mod config;
pub mod credentials;
pub mod error;
pub mod guard;
pub mod http_client;
pub mod model;
pub mod source;
pub mod sse;
pub mod stream;
pub mod telemetry;
