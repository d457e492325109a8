//! Step clock, lockstep cycle, and orchestration for the Tandem controller.
//!
//! This crate owns the 6-phase step cycle that keeps the road traffic
//! and wireless network simulators aligned: traffic advance, reconcile,
//! network advance, message evaluation, dispatch, and flush.
//!
//! # Modules
//!
//! - [`app`] -- [`Application`] trait, per-step inputs, and the action
//!   surface handed to applications during dispatch.
//! - [`client`] -- [`TrafficSim`] and [`NetworkSim`] client traits plus
//!   scripted stubs for lockstep tests.
//! - [`clock`] -- Monotonic step clock with run bounds.
//! - [`config`] -- Configuration loading from `tandem-config.yaml`
//!   into strongly-typed structs.
//! - [`registry`] -- Subscription registry with batched per-station
//!   reads and vanish-driven auto-cancellation.
//! - [`runner`] -- The run loop: step, advance, stop, tear down.
//! - [`scheduler`] -- Controller state and the 6-phase step cycle.
//! - [`stations`] -- Authoritative table of stations known this step.
//! - [`tracker`] -- Geobroadcast lifecycle and delivery tracking.
//!
//! [`Application`]: app::Application
//! [`TrafficSim`]: client::TrafficSim
//! [`NetworkSim`]: client::NetworkSim

pub mod app;
pub mod client;
pub mod clock;
pub mod config;
pub mod registry;
pub mod runner;
pub mod scheduler;
pub mod stations;
pub mod tracker;
