//! Google Gemini backend.
//!
//! Implements [`crate::ModelBackend`] over the Generative Language API's
//! SSE streaming endpoint, and [`crate::FileStore`] over its Files API.

mod api;
mod client;
mod config;
mod files;

pub use api::GeminiSession;
pub use client::GeminiClient;
pub use config::GeminiConfig;
