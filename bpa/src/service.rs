//! Dataservice: the socket layer applications use to send and receive
//! bundles over IPN addresses.
//!
//! Sockets share the node's single [`Pool`] and route through a [`Table`]'s
//! base interface exactly the way any other interface does; what makes a
//! socket different is that its "egress" is local delivery rather than a
//! CLA, demultiplexed by destination service number.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bpcore_bpv7::bundle::{Bundle, Id};
use bpcore_bpv7::creation_timestamp::CreationTimestamp;
use bpcore_bpv7::crc::CrcType;
use bpcore_bpv7::dtn_time::DtnTime;
use bpcore_bpv7::eid::Eid;
use bpcore_mpool::lock::ResourceLocks;
use bpcore_mpool::BlockId;
use thiserror::Error;

use crate::pool::{Block, Pool, SIG_BUNDLE};
use crate::rib::{self, InterfaceId, Subqueue, Table};

/// Reserved [`ResourceLocks`] address a `send` waits on while the pool is
/// exhausted. Set apart from [`socket_addr`]'s namespace by its own high
/// bit so the two waiter populations can never collide.
const POOL_AVAILABLE_ADDR: u64 = 1u64 << 62;

fn socket_addr(id: SocketId) -> u64 {
    (1u64 << 63) | id.0 as u64
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error("deadline reached before the operation could complete")]
    Timeout,
    #[error("buffer too small to hold the received payload")]
    Incomplete,
    #[error("socket is not bound to a local address")]
    NotBound,
    #[error("socket has no connected remote address")]
    NotConnected,
    #[error("no such socket")]
    NoSocket,
    #[error(transparent)]
    Pool(#[from] bpcore_mpool::Error),
    #[error(transparent)]
    Route(#[from] rib::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketId(u32);

struct Socket {
    local: Option<Eid>,
    remote: Option<Eid>,
    admin_up: bool,
    operational_up: bool,
    crc_type: CrcType,
    lifetime: core::time::Duration,
    retx_interval_ms: u64,
    request_custody: bool,
    sequence: u64,
    /// Bundles delivered to this socket, awaiting a `recv`.
    egress: Subqueue,
}

/// The dataservice's socket table: one per node, wired to a single base
/// interface on a [`Table`] via [`DataService::install_base_interface`].
pub struct DataService {
    sockets: HashMap<SocketId, Socket>,
    by_service: HashMap<u64, SocketId>,
    next_id: u32,
    base_node_number: u64,
    locks: ResourceLocks,
}

impl DataService {
    pub fn new(base_node_number: u64) -> Self {
        Self {
            sockets: HashMap::new(),
            by_service: HashMap::new(),
            next_id: 0,
            base_node_number,
            locks: ResourceLocks::new(),
        }
    }

    /// Registers `svc`'s local-delivery demultiplexer as `intf`'s
    /// forward-egress handler, so bundles routed to the base interface for
    /// the local node land on the matching socket's egress subqueue instead
    /// of being handed to a CLA.
    pub fn install_base_interface(svc: &Arc<Mutex<Self>>, table: &mut Table, intf: InterfaceId) {
        let svc = svc.clone();
        table.register_forward_egress_handler(
            intf,
            Box::new(move |pool, bundle_ref| {
                if let Ok(mut svc) = svc.lock() {
                    svc.local_delivery(pool, bundle_ref);
                }
            }),
        );
    }

    /// Wakes any `recv`/`send` callers waiting on pool or socket capacity.
    /// Call once per maintenance pass, after [`Table::run_maintenance_pass`].
    pub fn notify_maintenance_ran(&self) {
        self.locks.wake(POOL_AVAILABLE_ADDR);
    }

    pub fn create_socket(
        &mut self,
        pool: &mut Pool,
        crc_type: CrcType,
        lifetime: core::time::Duration,
        retx_interval_ms: u64,
        request_custody: bool,
    ) -> SocketId {
        let id = SocketId(self.next_id);
        self.next_id += 1;
        self.sockets.insert(
            id,
            Socket {
                local: None,
                remote: None,
                admin_up: false,
                operational_up: false,
                crc_type,
                lifetime,
                retx_interval_ms,
                request_custody,
                sequence: 0,
                egress: Subqueue::new(pool),
            },
        );
        id
    }

    /// Attaches `socket` to the base interface (the one registered as
    /// `local_ipn.node_number`) and indexes it by service number so
    /// [`local_delivery`](Self::local_delivery) can find it.
    pub fn bind(&mut self, socket: SocketId, local_ipn: Eid) -> Result<(), Error> {
        let Eid::Ipn {
            node_number,
            service_number,
        } = local_ipn
        else {
            return Err(Error::NotBound);
        };
        if node_number != self.base_node_number {
            return Err(Error::NotBound);
        }
        let s = self.sockets.get_mut(&socket).ok_or(Error::NoSocket)?;
        s.local = Some(local_ipn);
        self.by_service.insert(service_number, socket);
        Ok(())
    }

    /// Records the remote peer, marks the socket admin+operationally up,
    /// and raises its egress subqueue's depth limit so `recv` has somewhere
    /// to receive into.
    pub fn connect(&mut self, socket: SocketId, remote_ipn: Eid, depth_limit: usize) -> Result<(), Error> {
        let s = self.sockets.get_mut(&socket).ok_or(Error::NoSocket)?;
        s.remote = Some(remote_ipn);
        s.admin_up = true;
        s.operational_up = true;
        s.egress.set_depth_limit(depth_limit);
        Ok(())
    }

    fn build_bundle(&mut self, socket: SocketId, now: u64) -> Result<Bundle, Error> {
        let s = self.sockets.get_mut(&socket).ok_or(Error::NoSocket)?;
        let local = s.local.ok_or(Error::NotBound)?;
        let remote = s.remote.ok_or(Error::NotConnected)?;
        let sequence = s.sequence;
        s.sequence += 1;
        let request_custody = s.request_custody;
        let mut bundle = Bundle {
            id: Id {
                source: local,
                timestamp: CreationTimestamp::from_parts(Some(DtnTime::new(now)), sequence),
                fragment_info: None,
            },
            crc_type: s.crc_type,
            destination: remote,
            report_to: local,
            lifetime: s.lifetime,
            ..Bundle::default()
        };
        bundle.flags.request_custody = request_custody;
        Ok(bundle)
    }

    /// Allocates a primary block from socket parameters, encodes `payload`
    /// into it, and allocates a pool reference for the result. Fails with
    /// [`Error::Pool`]`(`[`bpcore_mpool::Error::PoolExhausted`]`)` if no
    /// block is available; callers retry via [`DataService::send`]'s
    /// deadline loop rather than this method directly.
    fn alloc_bundle(&mut self, pool: &mut Pool, socket: SocketId, payload: &[u8], now: u64) -> Result<BlockId, Error> {
        let mut bundle = self.build_bundle(socket, now)?;
        let encoded = bundle
            .emit(payload)
            .map_err(|_| Error::Incomplete)?;
        let id = pool
            .alloc::<core::convert::Infallible>(SIG_BUNDLE, bpcore_mpool::Priority::Normal, || {
                Ok(Block::Bundle {
                    bundle: Box::new(bundle.clone()),
                    payload: encoded.clone(),
                    delivery: Default::default(),
                })
            })?
            .unwrap();
        Ok(id)
    }

    /// Allocates and sends one bundle, retrying pool allocation until
    /// `deadline` (DTN milliseconds, per `now_fn`) passes.
    pub async fn send(
        &mut self,
        table: &mut Table,
        socket: SocketId,
        payload: &[u8],
        now_fn: impl Fn() -> u64,
        deadline: Option<u64>,
    ) -> Result<(), Error> {
        loop {
            let now = now_fn();
            match self.alloc_bundle(table.pool(), socket, payload, now) {
                Ok(bundle_ref) => {
                    let remote = {
                        let s = self.sockets.get(&socket).ok_or(Error::NoSocket)?;
                        s.remote.ok_or(Error::NotConnected)?
                    };
                    return table
                        .ingress_route_single_bundle(&remote, bundle_ref)
                        .map_err(Error::from);
                }
                Err(Error::Pool(bpcore_mpool::Error::PoolExhausted)) => {
                    let lock = self.locks.lock_prepare(POOL_AVAILABLE_ADDR);
                    if lock.lock_wait(&now_fn, deadline).await == bpcore_async::WaitResult::Timeout {
                        return Err(Error::Timeout);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Pulls the next reference off `socket`'s egress subqueue, copies its
    /// payload into `buffer`, and releases it. Truncates with
    /// [`Error::Incomplete`] rather than overflowing `buffer`.
    pub async fn recv(
        &mut self,
        pool: &mut Pool,
        socket: SocketId,
        buffer: &mut [u8],
        now_fn: impl Fn() -> u64,
        deadline: Option<u64>,
    ) -> Result<usize, Error> {
        loop {
            let target = {
                let s = self.sockets.get_mut(&socket).ok_or(Error::NoSocket)?;
                s.egress.pull(pool)?
            };
            if let Some(bundle_ref) = target {
                let len = Self::copy_payload(pool, bundle_ref, buffer)?;
                let _ = pool.ref_release(bundle_ref);
                return Ok(len);
            }
            let lock = self.locks.lock_prepare(socket_addr(socket));
            if lock.lock_wait(&now_fn, deadline).await == bpcore_async::WaitResult::Timeout {
                return Err(Error::Timeout);
            }
        }
    }

    fn copy_payload(pool: &Pool, bundle_ref: BlockId, buffer: &mut [u8]) -> Result<usize, Error> {
        let Block::Bundle { bundle, payload, .. } = pool.get(bundle_ref)? else {
            return Err(Error::Incomplete);
        };
        let content = bundle.payload(payload).map_err(|_| Error::Incomplete)?;
        if content.len() > buffer.len() {
            let n = buffer.len();
            buffer.copy_from_slice(&content[..n]);
            return Err(Error::Incomplete);
        }
        buffer[..content.len()].copy_from_slice(content);
        Ok(content.len())
    }

    /// Demultiplexes a bundle delivered to the base interface by
    /// destination service number, pushing it onto the matching socket's
    /// egress subqueue. Bundles for unbound service numbers are dropped.
    fn local_delivery(&mut self, pool: &mut Pool, bundle_ref: BlockId) {
        if pool.ref_create(bundle_ref).is_err() {
            return;
        }
        let service_number = match pool.get(bundle_ref) {
            Ok(Block::Bundle { bundle, .. }) => match bundle.destination {
                Eid::Ipn { service_number, .. } => Some(service_number),
                Eid::Null => None,
            },
            _ => None,
        };
        if let Some(sid) = service_number.and_then(|sn| self.by_service.get(&sn).copied()) {
            if let Some(s) = self.sockets.get_mut(&sid) {
                if s.egress.push(pool, bundle_ref, None).is_ok() {
                    self.locks.wake(socket_addr(sid));
                }
            }
        }
        let _ = pool.ref_release(bundle_ref);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_then_recv_round_trip() {
        let mut table = Table::alloc_table(4, 64);
        let intf = table.register_generic_intf();
        table.set_operational(intf, true, 8, 8);
        table.add(0, 0, intf);

        let ds = Arc::new(Mutex::new(DataService::new(201)));
        DataService::install_base_interface(&ds, &mut table, intf);

        let a = {
            let mut ds = ds.lock().unwrap();
            let a = ds.create_socket(table.pool(), CrcType::CRC32_CASTAGNOLI, core::time::Duration::from_secs(3600), 1000, true);
            ds.bind(a, Eid::Ipn { node_number: 201, service_number: 1 }).unwrap();
            ds.connect(a, Eid::Ipn { node_number: 201, service_number: 2 }, 8).unwrap();
            a
        };
        let b = {
            let mut ds = ds.lock().unwrap();
            let b = ds.create_socket(table.pool(), CrcType::CRC32_CASTAGNOLI, core::time::Duration::from_secs(3600), 1000, true);
            ds.bind(b, Eid::Ipn { node_number: 201, service_number: 2 }).unwrap();
            ds.connect(b, Eid::Ipn { node_number: 201, service_number: 1 }, 8).unwrap();
            b
        };

        {
            let mut ds = ds.lock().unwrap();
            ds.send(&mut table, a, b"hello dtn", || 0, Some(1_000)).await.unwrap();
        }
        table.run_maintenance_pass();
        ds.lock().unwrap().notify_maintenance_ran();

        let mut buf = [0u8; 32];
        let n = {
            let mut ds = ds.lock().unwrap();
            ds.recv(table.pool(), b, &mut buf, || 0, Some(1_000)).await.unwrap()
        };
        assert_eq!(&buf[..n], b"hello dtn");
    }

    #[tokio::test]
    async fn recv_times_out_when_nothing_arrives() {
        let mut table = Table::alloc_table(4, 32);
        let mut ds = DataService::new(201);
        let sock = ds.create_socket(table.pool(), CrcType::None, core::time::Duration::from_secs(60), 1000, true);
        ds.bind(sock, Eid::Ipn { node_number: 201, service_number: 1 }).unwrap();
        ds.connect(sock, Eid::Ipn { node_number: 201, service_number: 2 }, 4).unwrap();

        let mut buf = [0u8; 8];
        let result = ds.recv(table.pool(), sock, &mut buf, || 5_000, Some(1_000)).await;
        assert_eq!(result, Err(Error::Timeout));
    }
}
