//! NUMA-aware allocation policy.
//!
//! NUMA (Non-Uniform Memory Access) systems attach memory to CPU sockets;
//! touching local memory is cheaper than touching a remote node's.
//!
//! This module is an accounting layer only. It decides which node an
//! allocation is *charged* to and keeps per-node and per-policy counters,
//! but the bytes themselves come from the ordinary heap and no pages are
//! bound or migrated by the kernel. Node figures are therefore advisory.
//!
//! Every counter is an atomic, so one allocator can be shared by all
//! worker threads without a lock.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::heap::try_alloc_zeroed;
use super::topology::{CpuNodeLocator, NodeLocator, NumaTopology};
use crate::config::NumaConfig;
use crate::error::{PoolError, PoolResult};

/// Which node an allocation is charged to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NumaPolicy {
    /// The node of the calling thread.
    #[default]
    Local,
    /// Round-robin across all nodes.
    Interleave,
    /// The node with the lowest allocated/available ratio.
    Preferred,
    /// Always node 0.
    Bind,
}

impl NumaPolicy {
    const fn as_u8(self) -> u8 {
        match self {
            NumaPolicy::Local => 0,
            NumaPolicy::Interleave => 1,
            NumaPolicy::Preferred => 2,
            NumaPolicy::Bind => 3,
        }
    }

    const fn from_u8(v: u8) -> Self {
        match v {
            1 => NumaPolicy::Interleave,
            2 => NumaPolicy::Preferred,
            3 => NumaPolicy::Bind,
            _ => NumaPolicy::Local,
        }
    }
}

impl fmt::Display for NumaPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NumaPolicy::Local => write!(f, "local"),
            NumaPolicy::Interleave => write!(f, "interleave"),
            NumaPolicy::Preferred => write!(f, "preferred"),
            NumaPolicy::Bind => write!(f, "bind"),
        }
    }
}

/// A memory domain and the bytes currently charged to it.
#[derive(Debug)]
pub struct NumaNode {
    id: usize,
    available_memory: u64,
    allocated_memory: AtomicU64,
    cpu_affinity: Vec<usize>,
}

impl NumaNode {
    /// Returns the node id.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> usize {
        self.id
    }

    /// Returns the memory attached to this node.
    #[inline]
    #[must_use]
    pub const fn available_memory(&self) -> u64 {
        self.available_memory
    }

    /// Returns the bytes currently charged to this node.
    #[inline]
    #[must_use]
    pub fn allocated_memory(&self) -> u64 {
        self.allocated_memory.load(Ordering::Relaxed)
    }

    /// Returns the CPUs local to this node.
    #[inline]
    #[must_use]
    pub fn cpu_affinity(&self) -> &[usize] {
        &self.cpu_affinity
    }

    /// Returns allocated / available. A node with no memory is treated as full.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.available_memory == 0 {
            f64::INFINITY
        } else {
            self.allocated_memory() as f64 / self.available_memory as f64
        }
    }

    fn charge(&self, bytes: u64) {
        self.allocated_memory.fetch_add(bytes, Ordering::Relaxed);
    }

    fn uncharge(&self, bytes: u64) {
        // Saturating so the counter can never go below zero.
        let _ = self
            .allocated_memory
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |cur| {
                Some(cur.saturating_sub(bytes))
            });
    }
}

/// Memory handed out by a [`NumaAllocator`].
///
/// The block remembers which node it was charged to and shares the issuing
/// allocator's node table. Dropping it uncharges that node, whichever code
/// path ends up dropping it.
pub struct NumaBlock {
    data: Box<[u8]>,
    node: usize,
    nodes: Arc<[NumaNode]>,
}

impl NumaBlock {
    /// Returns the node this block is charged to.
    #[inline]
    #[must_use]
    pub const fn node(&self) -> usize {
        self.node
    }

    /// Returns the size in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the block is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the block as a byte slice.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Returns the block as a mutable byte slice.
    #[inline]
    #[must_use]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl Drop for NumaBlock {
    fn drop(&mut self) {
        if let Some(node) = self.nodes.get(self.node) {
            node.uncharge(self.data.len() as u64);
        }
    }
}

impl Deref for NumaBlock {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl DerefMut for NumaBlock {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.data
    }
}

impl fmt::Debug for NumaBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NumaBlock")
            .field("len", &self.data.len())
            .field("node", &self.node)
            .finish()
    }
}

#[derive(Debug, Default)]
struct NumaCounters {
    local: AtomicU64,
    interleaved: AtomicU64,
    remote: AtomicU64,
    failures: AtomicU64,
    migrations: AtomicU64,
    policy_switches: AtomicU64,
}

#[derive(Clone, Copy)]
enum Placement {
    Local,
    Interleaved,
    Remote,
}

/// NUMA-aware allocator.
///
/// # Example
///
/// ```rust
/// use mtpool_common::memory::{NumaAllocator, NumaPolicy, NumaTopology};
///
/// let allocator = NumaAllocator::new(NumaTopology::simulated(2, 1 << 30, 1));
///
/// let a = allocator.allocate(4096, NumaPolicy::Interleave).unwrap();
/// let b = allocator.allocate(4096, NumaPolicy::Interleave).unwrap();
/// assert_ne!(a.node(), b.node());
///
/// allocator.free(a);
/// allocator.free(b);
/// assert_eq!(allocator.stats().interleaved, 2);
/// ```
pub struct NumaAllocator {
    topology: NumaTopology,
    nodes: Arc<[NumaNode]>,
    policy: AtomicU8,
    next_interleave: AtomicUsize,
    locator: Box<dyn NodeLocator>,
    counters: NumaCounters,
}

impl NumaAllocator {
    /// Creates an allocator over `topology` with the `Local` policy.
    #[must_use]
    pub fn new(topology: NumaTopology) -> Self {
        let nodes = topology
            .nodes()
            .iter()
            .map(|spec| NumaNode {
                id: spec.id,
                available_memory: spec.available_memory,
                allocated_memory: AtomicU64::new(0),
                cpu_affinity: spec.cpu_affinity.clone(),
            })
            .collect();

        Self {
            topology,
            nodes,
            policy: AtomicU8::new(NumaPolicy::Local.as_u8()),
            next_interleave: AtomicUsize::new(0),
            locator: Box::new(CpuNodeLocator),
            counters: NumaCounters::default(),
        }
    }

    /// Creates an allocator from configuration.
    #[must_use]
    pub fn from_config(config: &NumaConfig) -> Self {
        let topology = NumaTopology::from_config(config);
        tracing::info!(topology = %topology, policy = %config.default_policy, "NUMA allocator ready");
        let allocator = Self::new(topology);
        allocator
            .policy
            .store(config.default_policy.as_u8(), Ordering::Relaxed);
        allocator
    }

    /// Replaces the strategy used to find the calling thread's node.
    #[must_use]
    pub fn with_locator(mut self, locator: impl NodeLocator + 'static) -> Self {
        self.locator = Box::new(locator);
        self
    }

    /// Returns the topology this allocator was built from.
    #[inline]
    #[must_use]
    pub fn topology(&self) -> &NumaTopology {
        &self.topology
    }

    /// Returns the node table.
    #[inline]
    #[must_use]
    pub fn nodes(&self) -> &[NumaNode] {
        &self.nodes
    }

    /// Returns a node by id.
    #[must_use]
    pub fn node(&self, id: usize) -> Option<&NumaNode> {
        self.nodes.get(id)
    }

    /// Returns a node by id.
    ///
    /// # Errors
    ///
    /// [`PoolError::UnknownNode`] if `id` is outside the node table.
    pub fn try_node(&self, id: usize) -> PoolResult<&NumaNode> {
        self.nodes.get(id).ok_or(PoolError::UnknownNode(id))
    }

    /// Returns true if `block` was issued by this allocator.
    #[must_use]
    pub fn owns(&self, block: &NumaBlock) -> bool {
        Arc::ptr_eq(&self.nodes, &block.nodes)
    }

    /// Returns the number of nodes.
    #[inline]
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Returns the default policy.
    #[must_use]
    pub fn policy(&self) -> NumaPolicy {
        NumaPolicy::from_u8(self.policy.load(Ordering::Relaxed))
    }

    /// Switches the default policy.
    pub fn set_policy(&self, policy: NumaPolicy) {
        let previous = NumaPolicy::from_u8(self.policy.swap(policy.as_u8(), Ordering::Relaxed));
        self.counters.policy_switches.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(from = %previous, to = %policy, "NUMA policy switched");
    }

    /// Returns the node the calling thread runs on, or node 0 if unknown.
    #[must_use]
    pub fn current_node(&self) -> usize {
        self.locator
            .current_node(&self.topology)
            .filter(|id| *id < self.nodes.len())
            .unwrap_or(0)
    }

    /// Allocates `size` bytes charged according to `policy`.
    ///
    /// # Errors
    ///
    /// - [`PoolError::InvalidSize`] if `size` is zero
    /// - [`PoolError::OutOfMemory`] if the heap refuses; counted in `failures`
    pub fn allocate(&self, size: usize, policy: NumaPolicy) -> PoolResult<NumaBlock> {
        if size == 0 {
            return Err(PoolError::InvalidSize(0));
        }

        let (node, placement) = self.select_node(policy);

        let data = match try_alloc_zeroed(size) {
            Ok(data) => data,
            Err(err) => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(size, node, %policy, "NUMA allocation failed");
                return Err(err);
            }
        };

        self.nodes[node].charge(size as u64);
        let counter = match placement {
            Placement::Local => &self.counters.local,
            Placement::Interleaved => &self.counters.interleaved,
            Placement::Remote => &self.counters.remote,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        Ok(NumaBlock {
            data,
            node,
            nodes: Arc::clone(&self.nodes),
        })
    }

    /// Allocates using the current default policy.
    pub fn allocate_default(&self, size: usize) -> PoolResult<NumaBlock> {
        self.allocate(size, self.policy())
    }

    /// Returns a block to the heap and uncharges its node.
    ///
    /// A block from another allocator is uncharged from that allocator.
    pub fn free(&self, block: NumaBlock) {
        if !self.owns(&block) {
            tracing::debug!(node = block.node, "freeing NUMA block from another allocator");
        }
        drop(block);
    }

    /// Moves a block's charge to `target`.
    ///
    /// This only rewrites the accounting; the memory does not move. Returns
    /// `false` for an unknown node or a block from another allocator.
    /// Migrating to the current node is a no-op that returns `true` without
    /// counting a migration.
    pub fn migrate(&self, block: &mut NumaBlock, target: usize) -> bool {
        if !self.owns(block) {
            return false;
        }
        let to = match self.try_node(target) {
            Ok(node) => node,
            Err(err) => {
                tracing::debug!(error = %err, "NUMA migration refused");
                return false;
            }
        };
        if block.node == target {
            return true;
        }

        let bytes = block.len() as u64;
        if let Some(from) = self.nodes.get(block.node) {
            from.uncharge(bytes);
        }
        to.charge(bytes);
        block.node = target;
        self.counters.migrations.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Returns a snapshot of the counters.
    #[must_use]
    pub fn stats(&self) -> NumaStats {
        NumaStats {
            local: self.counters.local.load(Ordering::Relaxed),
            interleaved: self.counters.interleaved.load(Ordering::Relaxed),
            remote: self.counters.remote.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            migrations: self.counters.migrations.load(Ordering::Relaxed),
            policy_switches: self.counters.policy_switches.load(Ordering::Relaxed),
            nodes: self
                .nodes
                .iter()
                .map(|n| NodeUsage {
                    id: n.id,
                    available_memory: n.available_memory,
                    allocated_memory: n.allocated_memory(),
                })
                .collect(),
        }
    }

    fn select_node(&self, policy: NumaPolicy) -> (usize, Placement) {
        let current = self.current_node();
        let relative = |node: usize| {
            if node == current {
                (node, Placement::Local)
            } else {
                (node, Placement::Remote)
            }
        };

        match policy {
            NumaPolicy::Local => (current, Placement::Local),
            NumaPolicy::Interleave => {
                let next = self.next_interleave.fetch_add(1, Ordering::Relaxed);
                (next % self.nodes.len(), Placement::Interleaved)
            }
            NumaPolicy::Preferred => {
                let node = self
                    .nodes
                    .iter()
                    .min_by(|a, b| a.utilization().total_cmp(&b.utilization()))
                    .map_or(0, NumaNode::id);
                relative(node)
            }
            NumaPolicy::Bind => relative(0),
        }
    }
}

impl fmt::Debug for NumaAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NumaAllocator")
            .field("node_count", &self.nodes.len())
            .field("policy", &self.policy())
            .finish()
    }
}

/// Per-node usage in a [`NumaStats`] snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeUsage {
    /// Node id.
    pub id: usize,
    /// Memory attached to the node.
    pub available_memory: u64,
    /// Bytes charged to the node.
    pub allocated_memory: u64,
}

/// Snapshot of NUMA allocator counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NumaStats {
    /// Allocations charged to the caller's node.
    pub local: u64,
    /// Round-robin allocations.
    pub interleaved: u64,
    /// Allocations charged to another node.
    pub remote: u64,
    /// Heap allocation failures.
    pub failures: u64,
    /// Accounting migrations.
    pub migrations: u64,
    /// Default policy changes.
    pub policy_switches: u64,
    /// Per-node usage.
    pub nodes: Vec<NodeUsage>,
}

impl NumaStats {
    /// Total successful allocations.
    #[must_use]
    pub fn total_allocations(&self) -> u64 {
        self.local + self.interleaved + self.remote
    }

    /// Total bytes charged across every node.
    #[must_use]
    pub fn total_allocated(&self) -> u64 {
        self.nodes.iter().map(|n| n.allocated_memory).sum()
    }
}

impl fmt::Display for NumaStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "NumaStats {{ local: {}, interleaved: {}, remote: {}, failures: {}, migrations: {}, policy_switches: {}, allocated: {} }}",
            self.local,
            self.interleaved,
            self.remote,
            self.failures,
            self.migrations,
            self.policy_switches,
            self.total_allocated()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{FixedNodeLocator, NodeSpec};

    const GIB: u64 = 1 << 30;

    fn allocator(nodes: usize) -> NumaAllocator {
        NumaAllocator::new(NumaTopology::simulated(nodes, GIB, 2))
    }

    #[test]
    fn test_local_uses_current_node() {
        let alloc = allocator(2).with_locator(FixedNodeLocator(1));

        let block = alloc.allocate(4096, NumaPolicy::Local).unwrap();
        assert_eq!(block.node(), 1);
        assert_eq!(block.len(), 4096);
        assert_eq!(alloc.node(1).unwrap().allocated_memory(), 4096);
        assert_eq!(alloc.node(0).unwrap().allocated_memory(), 0);
        assert_eq!(alloc.stats().local, 1);
    }

    #[test]
    fn test_local_out_of_range_falls_back_to_zero() {
        let alloc = allocator(2).with_locator(FixedNodeLocator(7));
        let block = alloc.allocate(64, NumaPolicy::Local).unwrap();
        assert_eq!(block.node(), 0);
    }

    #[test]
    fn test_interleave_round_robin() {
        let alloc = allocator(3);
        let nodes: Vec<usize> = (0..6)
            .map(|_| alloc.allocate(128, NumaPolicy::Interleave).unwrap().node())
            .collect();
        assert_eq!(nodes, vec![0, 1, 2, 0, 1, 2]);
        assert_eq!(alloc.stats().interleaved, 6);
    }

    #[test]
    fn test_preferred_picks_least_utilized() {
        let alloc = allocator(2).with_locator(FixedNodeLocator(0));

        let _a = alloc.allocate(8192, NumaPolicy::Bind).unwrap();
        let b = alloc.allocate(1024, NumaPolicy::Preferred).unwrap();
        assert_eq!(b.node(), 1);

        let stats = alloc.stats();
        // Bind to node 0 from node 0 is local, Preferred landed remote.
        assert_eq!(stats.local, 1);
        assert_eq!(stats.remote, 1);
    }

    #[test]
    fn test_preferred_respects_capacity_ratio() {
        let topo = NumaTopology::from_nodes(vec![
            NodeSpec {
                id: 0,
                available_memory: 1_000_000,
                cpu_affinity: vec![0],
            },
            NodeSpec {
                id: 1,
                available_memory: 10_000,
                cpu_affinity: vec![1],
            },
        ]);
        let alloc = NumaAllocator::new(topo).with_locator(FixedNodeLocator(0));

        // 5000 bytes on node 0 is 0.5% used; node 1 is still empty.
        let _a = alloc.allocate(5000, NumaPolicy::Bind).unwrap();
        let one = alloc.allocate(1, NumaPolicy::Preferred).unwrap();
        assert_eq!(one.node(), 1);

        // Node 1 now holds 5001 of 10000 bytes, node 0 is far less used.
        let _b = alloc.allocate(5000, NumaPolicy::Preferred);
        let c = alloc.allocate(1, NumaPolicy::Preferred).unwrap();
        assert_eq!(c.node(), 0);
    }

    #[test]
    fn test_bind_always_node_zero() {
        let alloc = allocator(4).with_locator(FixedNodeLocator(3));
        for _ in 0..4 {
            assert_eq!(alloc.allocate(16, NumaPolicy::Bind).unwrap().node(), 0);
        }
        assert_eq!(alloc.stats().remote, 4);
    }

    #[test]
    fn test_free_uncharges_owning_node() {
        let alloc = allocator(2);
        let _first = alloc.allocate(100, NumaPolicy::Interleave).unwrap();
        let second = alloc.allocate(300, NumaPolicy::Interleave).unwrap();
        assert_eq!(second.node(), 1);

        alloc.free(second);
        assert_eq!(alloc.node(0).unwrap().allocated_memory(), 100);
        assert_eq!(alloc.node(1).unwrap().allocated_memory(), 0);
    }

    #[test]
    fn test_failure_counted() {
        let alloc = allocator(1);
        let err = alloc.allocate(usize::MAX, NumaPolicy::Local).unwrap_err();
        assert!(err.is_exhaustion());

        let stats = alloc.stats();
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.total_allocations(), 0);
        assert_eq!(stats.total_allocated(), 0);
    }

    #[test]
    fn test_zero_size_is_contract_violation() {
        let alloc = allocator(1);
        assert_eq!(
            alloc.allocate(0, NumaPolicy::Local).unwrap_err(),
            PoolError::InvalidSize(0)
        );
        assert_eq!(alloc.stats().failures, 0);
    }

    #[test]
    fn test_migrate_moves_accounting() {
        let alloc = allocator(2);
        let mut block = alloc.allocate(2048, NumaPolicy::Bind).unwrap();

        assert!(alloc.migrate(&mut block, 1));
        assert_eq!(block.node(), 1);
        assert_eq!(alloc.node(0).unwrap().allocated_memory(), 0);
        assert_eq!(alloc.node(1).unwrap().allocated_memory(), 2048);
        assert_eq!(alloc.stats().migrations, 1);

        assert!(alloc.migrate(&mut block, 1));
        assert_eq!(alloc.stats().migrations, 1);

        assert!(!alloc.migrate(&mut block, 9));
        assert_eq!(block.node(), 1);
        assert_eq!(alloc.try_node(9).unwrap_err(), PoolError::UnknownNode(9));
        assert_eq!(alloc.try_node(1).unwrap().id(), 1);

        alloc.free(block);
        assert_eq!(alloc.stats().total_allocated(), 0);
    }

    #[test]
    fn test_drop_uncharges_node() {
        let alloc = allocator(2).with_locator(FixedNodeLocator(1));
        let block = alloc.allocate(4096, NumaPolicy::Local).unwrap();
        assert_eq!(alloc.node(1).unwrap().allocated_memory(), 4096);

        drop(block);
        assert_eq!(alloc.node(1).unwrap().allocated_memory(), 0);
    }

    #[test]
    fn test_foreign_block_uncharges_its_owner() {
        let owner = allocator(2);
        let other = allocator(2);
        let mut block = owner.allocate(1024, NumaPolicy::Bind).unwrap();

        assert!(!other.owns(&block));
        assert!(!other.migrate(&mut block, 1));
        assert_eq!(other.stats().migrations, 0);

        other.free(block);
        assert_eq!(owner.stats().total_allocated(), 0);
        assert_eq!(other.stats().total_allocated(), 0);
    }

    #[test]
    fn test_set_policy() {
        let alloc = allocator(2);
        assert_eq!(alloc.policy(), NumaPolicy::Local);

        alloc.set_policy(NumaPolicy::Interleave);
        assert_eq!(alloc.policy(), NumaPolicy::Interleave);
        alloc.set_policy(NumaPolicy::Bind);

        assert_eq!(alloc.stats().policy_switches, 2);
        assert_eq!(alloc.allocate_default(8).unwrap().node(), 0);
    }

    #[test]
    fn test_from_config_applies_policy() {
        let config = NumaConfig::simulated(2).default_policy(NumaPolicy::Preferred);
        let alloc = NumaAllocator::from_config(&config);
        assert_eq!(alloc.node_count(), 2);
        assert_eq!(alloc.policy(), NumaPolicy::Preferred);
        assert_eq!(alloc.stats().policy_switches, 0);
    }

    #[test]
    fn test_concurrent_accounting() {
        use std::sync::Arc;
        use std::thread;

        let alloc = Arc::new(allocator(4));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let alloc = Arc::clone(&alloc);
                thread::spawn(move || {
                    for _ in 0..100 {
                        let block = alloc.allocate(512, NumaPolicy::Interleave).unwrap();
                        alloc.free(block);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let stats = alloc.stats();
        assert_eq!(stats.interleaved, 400);
        assert_eq!(stats.total_allocated(), 0);
    }

    #[test]
    fn test_policy_serde() {
        let json = serde_json::to_string(&NumaPolicy::Preferred).unwrap();
        assert_eq!(json, "\"preferred\"");
        let back: NumaPolicy = serde_json::from_str("\"bind\"").unwrap();
        assert_eq!(back, NumaPolicy::Bind);
    }
}
