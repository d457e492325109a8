//! Socket-backed simulator clients for the Tandem controller.
//!
//! The controller core drives both simulators through traits; this
//! crate provides the live implementations that speak the framed wire
//! protocol over TCP. Both clients share one link layer that owns the
//! connect-retry, response-deadline, and reconnect-and-resend policy.
//!
//! # Modules
//!
//! - [`link`] -- [`SimLink`]: one framed TCP connection plus the
//!   shared retry and timeout policy.
//! - [`traffic`] -- [`TrafficClient`], the road traffic simulator
//!   client with connect-time delta subscription.
//! - [`network`] -- [`NetworkClient`], the wireless network simulator
//!   client.
//!
//! [`SimLink`]: link::SimLink
//! [`TrafficClient`]: traffic::TrafficClient
//! [`NetworkClient`]: network::NetworkClient

pub mod link;
pub mod network;
pub mod traffic;

pub use link::SimLink;
pub use network::NetworkClient;
pub use traffic::TrafficClient;
