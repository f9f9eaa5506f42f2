//! `CivicChat` relay library.
//!
//! Exposes the event hub and history server for use in tests and embedding.
//! The relay authenticates sessions, stores and routes messages between a
//! citizen and an administrator, forwards seen receipts, typing and presence,
//! and serves conversation history over HTTP.

pub mod config;
pub mod relay;
pub mod store;
