//! HTTP API: routing, authentication and request/response mapping for the
//! billing services.

pub mod app;
pub mod authz;
pub mod context;
pub mod middleware;
