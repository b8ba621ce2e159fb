//! Request/response model and live network access.

mod client;
mod types;

pub use client::{HttpNetwork, Network};
pub use types::{request_key, Method, Request, RequestMode, Response};
