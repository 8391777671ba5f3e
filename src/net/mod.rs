//! Request/response model and the network seam the strategies fetch through.

pub mod client;
pub mod types;

pub use client::{HttpNetwork, Network};
pub use types::{CacheMode, Method, Request, RequestKey, RequestMode, Response};
