//! Switch-state snapshot and delta model.
//!
//! The snapshot side of the engine's contract: the state-management system
//! owns snapshot production, this module only defines the shapes and the
//! delta view the handlers consume.

mod delta;
mod types;

pub use delta::{map_delta, DeltaRow, StateDelta};
pub use types::{
    ForwardAction, Interface, NeighborEntry, NeighborPort, Port, ResolvedNextHop, Route,
    RouteTable, SwitchState, Vlan,
};
