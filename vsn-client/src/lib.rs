//! Camera node client for the visual sensor network.
//!
//! A node samples its camera at a rate chosen by its own activity, reports
//! to the server over a [`transport::Link`], and accepts configuration and
//! neighbour activation in return. The [`reactor`] ties these together.

pub mod identity;
pub mod reactor;
pub mod transport;

pub use reactor::{NodeState, Reactor, ReactorError, Sensor, TickReport, SOFTWARE_VERSION};
