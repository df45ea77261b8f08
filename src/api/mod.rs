//! Librarian backend API client

pub mod client;
pub mod errors;
pub mod types;

pub use client::{ApiClient, Transport, DEFAULT_API_URL};
pub use errors::ApiError;
pub use types::*;
