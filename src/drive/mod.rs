//! Destination store backed by the Google Drive v3 API.

pub mod auth;
pub mod client;

pub use client::DriveClient;
