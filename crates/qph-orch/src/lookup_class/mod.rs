//! Lookup-class route classification.
//!
//! Hosts behind queue-per-host ports get a lookup class from the neighbor
//! subsystem; routes resolving to such hosts inherit it so the hardware
//! steers their traffic into the same queues. This module keeps that
//! inheritance correct, incrementally, as ports, neighbors and routes
//! change:
//!
//! - [`SubnetCache`] scopes tracking to subnets that can actually host
//!   differentiated traffic.
//! - [`DependencyEntry`] is the reverse index from a next hop to the
//!   routes depending on it.
//! - [`LookupClassOrch`] drives both from state deltas and emits
//!   `(route, class)` assignments through [`LookupClassOrchCallbacks`].

mod orch;
mod subnets;
mod types;

pub use orch::{
    LookupClassError, LookupClassOrch, LookupClassOrchCallbacks, LookupClassOrchStats, Result,
};
pub use subnets::SubnetCache;
pub use types::{DependencyEntry, NextHopKey, RouteClassUpdate, RouteKey};
