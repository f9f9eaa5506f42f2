//! `CivicChat`: client core for citizen/administrator chat.
//!
//! The [`chat::ChatClient`] owns message state for one signed-in user and
//! talks to the event hub through a [`transport::connection::Connection`].

pub mod app;
pub mod chat;
pub mod config;
pub mod scheduler;
pub mod transport;
pub mod visibility;
