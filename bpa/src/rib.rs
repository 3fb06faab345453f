//! Route table, interface registry, and the maintenance worker that drives
//! subqueue forwarding and periodic pool upkeep.

use bpcore_bpv7::eid::Eid;
use bpcore_mpool::{list, BlockId};
use hashbrown::HashMap;

use crate::pool::{Block, Pool, SIG_LIST_HEAD, SIG_QUEUE_ENTRY};

#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error("no route matches the destination")]
    NoRoute,
    #[error("subqueue is disabled")]
    Disabled,
    #[error("subqueue is full")]
    Full,
    #[error(transparent)]
    Pool(#[from] bpcore_mpool::Error),
}

/// A 16-bit interface handle, assigned by [`Table::register_generic_intf`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterfaceId(pub u16);

/// Capability/state bits an interface advertises; matched against a route
/// lookup's `req_flags`/`flag_mask` in [`Table::get_next_intf_with_flags`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InterfaceFlags(pub u32);

impl InterfaceFlags {
    pub const ADMIN_UP: Self = Self(1 << 0);
    pub const OPERATIONAL_UP: Self = Self(1 << 1);
    pub const CUSTODY_ACCEPTING: Self = Self(1 << 2);

    pub fn contains(self, mask: Self) -> bool {
        self.0 & mask.0 == mask.0
    }

    pub fn set(&mut self, bit: Self) {
        self.0 |= bit.0;
    }

    pub fn clear(&mut self, bit: Self) {
        self.0 &= !bit.0;
    }
}

/// An event delivered to an interface by the maintenance worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Up,
    Down,
    Poll,
}

/// A bounded FIFO of block references, anchored at a pool list head.
///
/// `depth_limit == 0` means the subqueue is disabled: every push fails with
/// [`Error::Disabled`] until raised (e.g. by an `Up` event).
pub struct Subqueue {
    head: BlockId,
    depth: usize,
    depth_limit: usize,
}

impl Subqueue {
    pub fn new(pool: &mut Pool) -> Self {
        let head = list::new_list(pool, Block::ListHead).expect("list head alloc");
        Self {
            head,
            depth: 0,
            depth_limit: 0,
        }
    }

    pub fn is_full(&self) -> bool {
        self.depth_limit == 0 || self.depth >= self.depth_limit
    }

    pub fn set_depth_limit(&mut self, limit: usize) {
        self.depth_limit = limit;
    }

    /// Pushes a reference to `target` onto the tail of the queue. Fails if
    /// disabled or full; on success, increments `target`'s refcount via a
    /// typed wrapper block whose destructor releases it again. `cache_entry`
    /// names the cache entry that queued `target`, if any, so the wrapper's
    /// destructor can report the delivery outcome back to it.
    pub fn push(&mut self, pool: &mut Pool, target: BlockId, cache_entry: Option<BlockId>) -> Result<(), Error> {
        if self.is_full() {
            return Err(if self.depth_limit == 0 {
                Error::Disabled
            } else {
                Error::Full
            });
        }
        let entry = pool
            .make_block::<core::convert::Infallible>(
                SIG_QUEUE_ENTRY,
                bpcore_mpool::Priority::Normal,
                target,
                |target| Ok(Block::QueueEntry { target, cache_entry }),
            )?
            .unwrap();
        list::push_back(pool, self.head, entry)?;
        self.depth += 1;
        Ok(())
    }

    /// Pops the oldest reference, returning the block it referenced (the
    /// wrapper itself is recycled).
    pub fn pull(&mut self, pool: &mut Pool) -> Result<Option<BlockId>, Error> {
        let Some(entry) = list::pop_front(pool, self.head)? else {
            return Ok(None);
        };
        let target = match pool.get(entry)? {
            Block::QueueEntry { target, .. } => *target,
            _ => unreachable!("subqueue entries are always QueueEntry blocks"),
        };
        pool.recycle(entry)?;
        self.depth -= 1;
        Ok(Some(target))
    }

    /// Disables the subqueue and recycles any in-flight contents, per the
    /// flow state machine's `down` transition.
    pub fn disable_and_drain(&mut self, pool: &mut Pool) {
        self.depth_limit = 0;
        while let Ok(Some(target)) = self.pull(pool) {
            let _ = pool.ref_release(target);
        }
    }
}

type ForwardHandler = Box<dyn FnMut(&mut Pool, BlockId) + Send>;
type EventHandler = Box<dyn FnMut(Event) + Send>;

struct Interface {
    flags: InterfaceFlags,
    ingress: Subqueue,
    egress: Subqueue,
    forward_ingress: Option<ForwardHandler>,
    forward_egress: Option<ForwardHandler>,
    event: Option<EventHandler>,
}

struct Route {
    node_number: u64,
    mask: u64,
    intf: InterfaceId,
}

/// `alloc_table`'s product: the route table, interface registry, and the
/// pool both are carved from.
pub struct Table {
    pool: Pool,
    routes: Vec<Route>,
    interfaces: HashMap<InterfaceId, Interface>,
    next_intf: u16,
}

impl Table {
    /// Creates a table backed by an internal pool sized for `cache_mem_size`
    /// blocks, with room for up to `max_routes` route entries.
    pub fn alloc_table(max_routes: usize, cache_mem_size: usize) -> Self {
        Self {
            pool: crate::pool::new_pool(cache_mem_size),
            routes: Vec::with_capacity(max_routes),
            interfaces: HashMap::new(),
            next_intf: 0,
        }
    }

    pub fn pool(&mut self) -> &mut Pool {
        &mut self.pool
    }

    /// Assigns a fresh interface id, creating its ingress/egress subqueues.
    pub fn register_generic_intf(&mut self) -> InterfaceId {
        let id = InterfaceId(self.next_intf);
        self.next_intf += 1;
        let interface = Interface {
            flags: InterfaceFlags::default(),
            ingress: Subqueue::new(&mut self.pool),
            egress: Subqueue::new(&mut self.pool),
            forward_ingress: None,
            forward_egress: None,
            event: None,
        };
        self.interfaces.insert(id, interface);
        id
    }

    pub fn register_forward_ingress_handler(&mut self, intf: InterfaceId, f: ForwardHandler) {
        if let Some(i) = self.interfaces.get_mut(&intf) {
            i.forward_ingress = Some(f);
        }
    }

    pub fn register_forward_egress_handler(&mut self, intf: InterfaceId, f: ForwardHandler) {
        if let Some(i) = self.interfaces.get_mut(&intf) {
            i.forward_egress = Some(f);
        }
    }

    pub fn register_event_handler(&mut self, intf: InterfaceId, f: EventHandler) {
        if let Some(i) = self.interfaces.get_mut(&intf) {
            i.event = Some(f);
        }
    }

    /// Appends a route: bundles whose destination node number matches
    /// `node_number` under `mask` (a contiguous high-bit prefix mask) may be
    /// forwarded via `intf`.
    pub fn add(&mut self, node_number: u64, mask: u64, intf: InterfaceId) {
        self.routes.push(Route {
            node_number: node_number & mask,
            mask,
            intf,
        });
    }

    /// Removes the first route matching the exact `(node_number, mask,
    /// intf)` triple.
    pub fn del(&mut self, node_number: u64, mask: u64, intf: InterfaceId) -> bool {
        let masked = node_number & mask;
        if let Some(pos) = self
            .routes
            .iter()
            .position(|r| r.node_number == masked && r.mask == mask && r.intf == intf)
        {
            self.routes.remove(pos);
            true
        } else {
            false
        }
    }

    /// Returns the first interface whose route matches `dest` under
    /// longest-mask semantics (routes are scanned in registration order for
    /// a given mask length; the widest mask wins ties across lengths) and
    /// whose flags satisfy `flags & flag_mask == req_flags`.
    pub fn get_next_intf_with_flags(
        &self,
        dest: &Eid,
        req_flags: InterfaceFlags,
        flag_mask: InterfaceFlags,
    ) -> Option<InterfaceId> {
        let node_number = dest.node_number()?;
        self.routes
            .iter()
            .filter(|r| r.node_number == node_number & r.mask)
            .filter(|r| {
                self.interfaces
                    .get(&r.intf)
                    .is_some_and(|i| i.flags.0 & flag_mask.0 == req_flags.0)
            })
            .max_by_key(|r| r.mask.count_ones())
            .map(|r| r.intf)
    }

    /// Reads the destination EID from `bundle`, selects the matching
    /// interface by longest-prefix match, and pushes a reference onto that
    /// interface's ingress subqueue. On any failure the bundle reference is
    /// recycled instead, surfacing as a drop once `maintain` runs.
    pub fn ingress_route_single_bundle(
        &mut self,
        dest: &Eid,
        bundle_ref: BlockId,
    ) -> Result<(), Error> {
        let result = self
            .get_next_intf_with_flags(
                dest,
                InterfaceFlags::OPERATIONAL_UP,
                InterfaceFlags::OPERATIONAL_UP,
            )
            .ok_or(Error::NoRoute)
            .and_then(|intf| {
                let i = self.interfaces.get_mut(&intf).expect("route points at a live interface");
                i.ingress.push(&mut self.pool, bundle_ref, None)
            });
        if result.is_err() {
            let _ = self.pool.ref_release(bundle_ref);
        }
        result
    }

    /// Raises an interface's subqueue depth limits and delivers `Up`, or
    /// disables and drains both subqueues and delivers `Down`.
    pub fn set_operational(&mut self, intf: InterfaceId, up: bool, short_depth: usize, max_depth: usize) {
        let Some(i) = self.interfaces.get_mut(&intf) else {
            return;
        };
        if up {
            i.flags.set(InterfaceFlags::OPERATIONAL_UP);
            i.ingress.set_depth_limit(max_depth);
            i.egress.set_depth_limit(short_depth);
            if let Some(f) = &mut i.event {
                f(Event::Up);
            }
        } else {
            i.flags.clear(InterfaceFlags::OPERATIONAL_UP);
            i.ingress.disable_and_drain(&mut self.pool);
            i.egress.disable_and_drain(&mut self.pool);
            if let Some(f) = &mut i.event {
                f(Event::Down);
            }
        }
    }

    /// One maintenance pass: invokes every interface's forward-ingress and
    /// forward-egress callbacks on non-empty subqueues, delivers a `Poll`
    /// event to each interface, then drains the pool's recycle queue.
    #[cfg_attr(feature = "instrument", tracing::instrument(level = "debug", skip(self)))]
    pub fn run_maintenance_pass(&mut self) {
        for (_, i) in self.interfaces.iter_mut() {
            if let Some(handler) = &mut i.forward_ingress {
                while let Ok(Some(target)) = i.ingress.pull(&mut self.pool) {
                    handler(&mut self.pool, target);
                }
            }
            if let Some(handler) = &mut i.forward_egress {
                while let Ok(Some(target)) = i.egress.pull(&mut self.pool) {
                    handler(&mut self.pool, target);
                }
            }
            if let Some(f) = &mut i.event {
                f(Event::Poll);
            }
        }
        self.pool.maintain();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn longest_prefix_match_prefers_narrower_mask() {
        let mut table = Table::alloc_table(8, 64);
        let wide = table.register_generic_intf();
        let narrow = table.register_generic_intf();
        table.set_operational(wide, true, 8, 8);
        table.set_operational(narrow, true, 8, 8);

        table.add(0, 0, wide); // default route
        table.add(5, u64::MAX, narrow); // exact match for node 5

        let dest = Eid::Ipn {
            node_number: 5,
            service_number: 1,
        };
        let chosen = table
            .get_next_intf_with_flags(&dest, InterfaceFlags::OPERATIONAL_UP, InterfaceFlags::OPERATIONAL_UP)
            .unwrap();
        assert_eq!(chosen, narrow);

        let other = Eid::Ipn {
            node_number: 9,
            service_number: 1,
        };
        let chosen = table
            .get_next_intf_with_flags(&other, InterfaceFlags::OPERATIONAL_UP, InterfaceFlags::OPERATIONAL_UP)
            .unwrap();
        assert_eq!(chosen, wide);
    }

    #[test]
    fn no_route_recycles_bundle_reference() {
        let mut table = Table::alloc_table(4, 32);
        let target = table
            .pool()
            .alloc::<core::convert::Infallible>(
                crate::pool::SIG_BUNDLE,
                bpcore_mpool::Priority::Normal,
                || {
                    Ok(Block::Bundle {
                        bundle: Box::new(bpcore_bpv7::bundle::Bundle::default()),
                        payload: Box::new([]),
                        delivery: Default::default(),
                    })
                },
            )
            .unwrap()
            .unwrap();
        table.pool().ref_create(target).unwrap();

        let dest = Eid::Ipn {
            node_number: 1,
            service_number: 1,
        };
        assert_eq!(
            table.ingress_route_single_bundle(&dest, target),
            Err(Error::NoRoute)
        );
        table.pool().maintain();
        assert!(table.pool().get(target).is_err());
    }
}
