//! HTTP and WebSocket API.

pub mod accounts;
pub mod audit;
pub mod extract;
pub mod handlers;
pub mod market_data;
pub mod middleware;
pub mod option_chain;
pub mod risk;
pub mod routes;
pub mod settings;
pub mod strategies;
pub mod trading;
pub mod webhooks;
pub mod websocket;

pub use routes::{ApiDoc, create_app, create_router};
