//! OmniDesk server: the agent HTTP API, company-scoped WebSocket
//! notifications and the read-through query cache.

pub mod app_state;
pub mod auth;
pub mod db;
pub mod handlers;
pub mod http;
pub mod middleware;
pub mod openapi;
pub mod routes;
pub mod server;
pub mod services;
pub mod tracer;

pub use server::{create_app_router, metrics_handle};
