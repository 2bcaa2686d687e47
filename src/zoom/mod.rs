//! Recording source backed by the Zoom REST API (v2).

pub mod auth;
pub mod client;
pub mod models;

pub use client::ZoomClient;
