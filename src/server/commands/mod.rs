//! Command handler implementations, grouped by family.

pub mod cluster;
pub mod conn;
pub mod geo;
pub mod hll;
pub mod pubsub;
pub mod script;
pub mod strings;
pub mod zset;

use crate::server::dispatcher::CommandRegistry;

/// Populate the registry with every supported family.
pub fn register_all(registry: &mut CommandRegistry) {
    conn::register(registry);
    strings::register(registry);
    zset::register(registry);
    geo::register(registry);
    hll::register(registry);
    pubsub::register(registry);
    script::register(registry);
    cluster::register(registry);
}
