//! Events crossing from the engine to its host.

pub mod events;
