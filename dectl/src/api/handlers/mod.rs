//! HTTP handlers, grouped by the surface they serve.

pub mod delivery;
pub mod events;
pub mod health;
pub mod intake;
pub mod subscriptions;
