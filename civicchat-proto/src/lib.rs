//! Shared protocol definitions for the CivicChat wire format.

pub mod codec;
pub mod conversation;
pub mod events;
pub mod message;
