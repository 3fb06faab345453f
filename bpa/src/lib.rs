//! Bundle Processing Agent: the node's single block pool, route table and
//! maintenance worker, cache/storage service, and dataservice socket layer.
//!
//! A node wires these together itself (see [`Node`]) rather than the crate
//! imposing one; each piece also works standalone for testing.

pub mod cache;
pub mod pool;
pub mod rib;
pub mod service;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

pub use bpcore_mpool::BlockId;
pub use pool::{Block, Pool};

/// Ties a [`rib::Table`], a [`cache::Cache`], and a [`service::DataService`]
/// together behind the table's own base and cache interfaces, and drives
/// the periodic maintenance pass.
///
/// This is a convenience assembly, not a requirement: any of the three
/// pieces can be driven directly against a shared `Pool` without going
/// through `Node`.
pub struct Node {
    pub table: rib::Table,
    pub cache: Arc<Mutex<cache::Cache>>,
    pub dataservice: Arc<Mutex<service::DataService>>,
    base_intf: rib::InterfaceId,
    cache_intf: rib::InterfaceId,
    /// The last `now` passed to [`Node::run_maintenance_pass`], visible to
    /// the cache interface's forward-ingress handler, which otherwise has
    /// no clock of its own (`ForwardHandler` carries no timestamp).
    clock: Arc<AtomicU64>,
}

impl Node {
    /// Builds a node whose route table has capacity for `max_routes` routes
    /// and a pool sized for `cache_mem_size` blocks, registers a base
    /// interface for local delivery of bundles addressed to `node_number`,
    /// and a default-route cache interface that accepts custody of anything
    /// without a more specific route.
    pub fn new(node_number: u64, max_routes: usize, cache_mem_size: usize) -> Self {
        let mut table = rib::Table::alloc_table(max_routes, cache_mem_size);

        let base_intf = table.register_generic_intf();
        table.set_operational(base_intf, true, usize::MAX, usize::MAX);
        table.add(node_number, u64::MAX, base_intf);

        let cache_intf = table.register_generic_intf();
        table.set_operational(cache_intf, true, usize::MAX, usize::MAX);
        table.add(0, 0, cache_intf);

        let dataservice = Arc::new(Mutex::new(service::DataService::new(node_number)));
        service::DataService::install_base_interface(&dataservice, &mut table, base_intf);

        let local_eid = bpcore_bpv7::eid::Eid::Ipn { node_number, service_number: 0 };
        let cache = Arc::new(Mutex::new(cache::Cache::new(table.pool(), local_eid)));
        let clock = Arc::new(AtomicU64::new(0));
        install_cache_interface(&cache, &clock, &mut table, cache_intf);

        Self {
            table,
            cache,
            dataservice,
            base_intf,
            cache_intf,
            clock,
        }
    }

    pub fn base_interface(&self) -> rib::InterfaceId {
        self.base_intf
    }

    pub fn cache_interface(&self) -> rib::InterfaceId {
        self.cache_intf
    }

    /// Runs one maintenance pass: drains every interface's forward
    /// handlers (which includes the dataservice's local-delivery demux on
    /// the base interface and the cache's custody intake on the cache
    /// interface), polls the cache's time index for due entries, flushes
    /// what's pending into the cache's own ingress subqueue, then drains
    /// the pool's recycle queue.
    pub fn run_maintenance_pass(&mut self, now: u64) {
        self.clock.store(now, Ordering::Relaxed);
        self.table.run_maintenance_pass();
        if let Ok(ds) = self.dataservice.lock() {
            ds.notify_maintenance_ran();
        }
        if let Ok(mut cache) = self.cache.lock() {
            let _ = cache.do_poll(self.table.pool(), now);
            let _ = cache.flush_pending(self.table.pool(), now);
        }
    }
}

/// Registers the cache's custody-intake as `intf`'s forward-ingress
/// handler, so bundles routed to the cache interface (the node's
/// default/storage route) are handed to [`cache::Cache::ingest_for_custody`]
/// instead of a CLA.
fn install_cache_interface(
    cache: &Arc<Mutex<cache::Cache>>,
    clock: &Arc<AtomicU64>,
    table: &mut rib::Table,
    intf: rib::InterfaceId,
) {
    let cache = cache.clone();
    let clock = clock.clone();
    table.register_forward_ingress_handler(
        intf,
        Box::new(move |pool, bundle_ref| {
            if let Ok(mut cache) = cache.lock() {
                cache.ingest_for_custody(pool, bundle_ref, clock.load(Ordering::Relaxed));
            }
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_node_registers_base_and_cache_interfaces() {
        let node = Node::new(201, 8, 64);
        assert_ne!(node.base_interface(), node.cache_interface());
    }
}
