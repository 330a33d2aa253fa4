//! Aggregator for the OpenFlow workspace crates.

pub use ofp_session as session;
pub use ofp_wire as wire;
pub use openflowplugin as controller;
