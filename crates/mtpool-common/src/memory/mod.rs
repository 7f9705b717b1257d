//! Memory layer for the pooling core.
//!
//! - **Heap**: fallible zeroed allocation that reports exhaustion instead of aborting
//! - **Topology**: the NUMA node table, detected from sysfs or simulated
//! - **NUMA allocator**: node-charging policy and accounting over the heap
//!
//! # Design Principles
//!
//! 1. **Never abort on exhaustion**: heap failures come back as `PoolError::OutOfMemory`
//! 2. **Accounting, not placement**: NUMA nodes are charged, pages are not bound
//! 3. **Graceful degradation**: topology falls back to simulated nodes

mod heap;
mod numa;
mod topology;

pub use heap::try_alloc_zeroed;
pub use numa::{NodeUsage, NumaAllocator, NumaBlock, NumaNode, NumaPolicy, NumaStats};
pub use topology::{
    current_cpu, parse_cpu_list, parse_mem_total, CpuNodeLocator, FixedNodeLocator, NodeLocator,
    NodeSpec, NumaTopology,
};
