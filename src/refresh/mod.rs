//! Background re-fetching of cached data.
//!
//! Consumers register a trigger per cache key. The coordinator runs those
//! triggers on per-subscription timers, on administrative sweeps
//! (everything, or everything under a key prefix), and on rising edges of
//! connectivity and foreground state reported by the platform.

mod ambient;
mod coordinator;

pub use ambient::{AmbientState, Edge, Signal, SignalSource};
pub use coordinator::{RefreshCoordinator, Registration, SubscriptionId, TriggerFn};
