//! HistoriCam Server - HTTP API for landmark identification
//!
//! Exposes the identification pipeline from the `historicam` crate over
//! HTTP: upload a photo, get back the building it shows (or an
//! `uncertain`/`no_match` verdict).
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use server::ServerConfig;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ServerConfig::load()?;
//!     server::start_server(config).await?;
//!     Ok(())
//! }
//! ```
//!
//! # API Endpoints
//!
//! ## Public Endpoints
//!
//! - `GET /` - API information
//! - `GET /health` - Liveness probe
//! - `GET /ready` - Readiness probe
//! - `GET /metrics` - Prometheus metrics
//! - `POST /identify` - Identify a building from a multipart photo upload
//!
//! ## Protected Endpoints (API key required when keys are configured)
//!
//! - `POST /api/v1/identify` - Same as `/identify`
//! - `POST /api/v1/identify/embedding` - Classify a raw query embedding
//! - `GET /api/v1/index/stats` - Reference index statistics
//! - `GET /api/v1/metadata` - Server metadata
//!
//! Errors use a `{"error": {"code", "message"}}` envelope.

pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod state;
pub mod telemetry;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use server::{build_router, start_server};
pub use state::ServerState;
