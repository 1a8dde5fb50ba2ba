//! Middleware for the HTTP API.

pub mod cors;
pub mod headers;

pub use cors::create_cors_layer;
pub use headers::no_store_headers;
