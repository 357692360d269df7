//! Data models for chat entities

mod message;
mod room;
mod user;

pub use message::*;
pub use room::*;
pub use user::*;

#[cfg(test)]
pub(crate) use message::fixtures;
