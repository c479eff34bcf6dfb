//! HTTP API Module
//!
//! Provides the REST API for client writes and replica calls.

mod http;

pub use http::{
    primary_router, secondary_router, ErrorResponse, FlushResponse, HttpServer,
    PrimaryStatusResponse, SecondaryStatusResponse,
};
