//! Request/response models for the HTTP API.

pub mod delivery;
pub mod events;
pub mod intake;
pub mod subscriptions;
