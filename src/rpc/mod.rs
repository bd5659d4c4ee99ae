//! Throttled Esplora client
//!
//! [`BitcoinRpc`] is the only component that performs network I/O. It is
//! built on the [`HttpClient`] primitive, queues requests per host behind a
//! [`RequestThrottle`] and reshapes response bodies before typed parsing.

pub mod client;
pub mod http;
pub mod shaping;
pub mod throttle;

pub use client::BitcoinRpc;
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, ReqwestHttpClient};
pub use throttle::RequestThrottle;
