//! REST client for the chat history service.
//!
//! Implements [`banter_common::HistoryStore`] against the service's small
//! JSON API: chat records, appended messages, raw file uploads, and paged
//! chat listings.

pub mod client;

pub use client::StoreClient;
