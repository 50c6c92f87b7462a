//! HTTP and WebSocket client library for the Velox API.
//!
//! This crate provides a typed client for the Velox trading backend: accounts,
//! strategies, trading, market data, option chains and the live stream.
//!
//! # Example
//!
//! ```no_run
//! use velox_client::{ClientConfig, LoginRequest, VeloxClient};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), velox_client::Error> {
//!     let client = VeloxClient::new(ClientConfig {
//!         base_url: "http://localhost:8000".into(),
//!         timeout: Duration::from_secs(30),
//!     })?;
//!
//!     let session = client
//!         .login(&LoginRequest {
//!             username: "alice".into(),
//!             password: "s3cretpass".into(),
//!         })
//!         .await?;
//!     let client = client.with_token(&session.token);
//!
//!     let quote = client.get_quote("NIFTY").await?;
//!     println!("NIFTY: {}", quote.ltp);
//!
//!     Ok(())
//! }
//! ```

mod client;
mod error;
mod types;
mod websocket;

pub use client::{ClientConfig, VeloxClient};
pub use error::Error;
pub use types::*;
pub use websocket::{ClientCommand, StreamSubscriptions, WsClient, WsMessage};
