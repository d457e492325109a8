//! Shared type definitions for the Tandem co-simulation controller.
//!
//! This crate is the single source of truth for the data model shared
//! across the workspace: identifiers, geometry, stations, geobroadcast
//! messages, and subscriptions. It holds no I/O and no policy; wire
//! encodings live in `tandem-proto`, behavior in `tandem-core`.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe integer wrappers for all entity identifiers
//! - [`geometry`] -- Positions and geobroadcast dissemination areas
//! - [`station`] -- Stations, traffic variables, per-step snapshots
//! - [`message`] -- Broadcast message lifecycle and receptions
//! - [`subscription`] -- Scopes, windows, and cancellation notices

pub mod geometry;
pub mod ids;
pub mod message;
pub mod station;
pub mod subscription;

/// Discrete simulation step index shared by both simulators.
///
/// Monotonically increasing, 1:1 with a fixed step length; the sole
/// authority for "when" across the whole co-simulation.
pub type SimStep = u64;

// Re-export all public types at crate root for convenience.
pub use geometry::{AreaError, GeoArea, Position};
pub use ids::{AppId, MessageId, StationId, SubscriptionId};
pub use message::{BroadcastMessage, MessageState, Reception};
pub use station::{Station, StationKind, StationSnapshot, TrafficVariable, VariableValue};
pub use subscription::{StepWindow, Subscription, SubscriptionNotice, SubscriptionScope};
