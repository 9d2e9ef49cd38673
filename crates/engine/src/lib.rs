//! Starlight transmission engine.
//!
//! Devices placed in the world become network nodes. Nodes link to each
//! other along line-of-sight beams that lose strength with distance and
//! with every opaque block they pass through, and queries find the
//! cheapest route from a source to the nearest node of some kind.
//!
//! - [`world`]: block storage and the read interface the network needs.
//! - [`network`]: nodes, links, path search and the chunk lifecycle.
//! - [`cache`]: per-dimension persistent records with versioned schemas.
//! - [`config`]: tuning knobs.

pub mod cache;
pub mod config;
pub mod network;
pub mod world;

pub use config::TransmissionConfig;
