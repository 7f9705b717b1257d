//! NUMA node topology.
//!
//! The node table is either read from sysfs on Linux or simulated from
//! configuration. Detection never fails hard: any missing or unreadable
//! file degrades to a single node holding every CPU.
//!
//! # Platform Support
//!
//! - **Linux**: `/sys/devices/system/node/node*/{cpulist,meminfo}`
//! - **Elsewhere**: a single simulated node

use std::fmt;

use crate::config::NumaConfig;
use crate::constants::{DEFAULT_NODE_MEMORY, SYSFS_NODE_ROOT};

/// Static description of one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSpec {
    /// Node id (index into the node table).
    pub id: usize,
    /// Memory attached to the node, in bytes.
    pub available_memory: u64,
    /// CPUs local to the node.
    pub cpu_affinity: Vec<usize>,
}

/// The node table an allocator is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumaTopology {
    nodes: Vec<NodeSpec>,
}

impl NumaTopology {
    /// Builds a topology from explicit node specs.
    ///
    /// Node ids are reassigned to match their position.
    #[must_use]
    pub fn from_nodes(mut nodes: Vec<NodeSpec>) -> Self {
        if nodes.is_empty() {
            return Self::single();
        }
        for (i, node) in nodes.iter_mut().enumerate() {
            node.id = i;
        }
        Self { nodes }
    }

    /// A single node with the default memory and no known CPUs.
    #[must_use]
    pub fn single() -> Self {
        Self {
            nodes: vec![NodeSpec {
                id: 0,
                available_memory: DEFAULT_NODE_MEMORY,
                cpu_affinity: Vec::new(),
            }],
        }
    }

    /// Simulates `count` identical nodes with contiguous CPU ranges.
    #[must_use]
    pub fn simulated(count: usize, memory_per_node: u64, cpus_per_node: usize) -> Self {
        let nodes = (0..count.max(1))
            .map(|id| NodeSpec {
                id,
                available_memory: memory_per_node,
                cpu_affinity: (id * cpus_per_node..(id + 1) * cpus_per_node).collect(),
            })
            .collect();
        Self { nodes }
    }

    /// Builds the topology described by `config`, detecting from the system
    /// when asked to.
    #[must_use]
    pub fn from_config(config: &NumaConfig) -> Self {
        if config.detect_topology {
            if let Some(detected) = Self::detect() {
                return detected;
            }
            tracing::debug!(
                nodes = config.simulated_nodes,
                "NUMA topology not detectable, simulating"
            );
        }
        Self::simulated(
            config.simulated_nodes,
            config.node_memory,
            config.cpus_per_node,
        )
    }

    /// Reads the node table from sysfs.
    ///
    /// Returns `None` when the system exposes no node directories.
    #[must_use]
    pub fn detect() -> Option<Self> {
        #[cfg(target_os = "linux")]
        {
            detect_linux()
        }

        #[cfg(not(target_os = "linux"))]
        {
            None
        }
    }

    /// Returns the nodes.
    #[inline]
    #[must_use]
    pub fn nodes(&self) -> &[NodeSpec] {
        &self.nodes
    }

    /// Returns the number of nodes.
    #[inline]
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Maps a CPU to the node that owns it.
    #[must_use]
    pub fn node_of_cpu(&self, cpu: usize) -> Option<usize> {
        self.nodes
            .iter()
            .find(|n| n.cpu_affinity.contains(&cpu))
            .map(|n| n.id)
    }

    /// Total memory across all nodes.
    #[must_use]
    pub fn total_memory(&self) -> u64 {
        self.nodes.iter().map(|n| n.available_memory).sum()
    }
}

impl fmt::Display for NumaTopology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} node(s)", self.nodes.len())?;
        for node in &self.nodes {
            write!(
                f,
                " [node{}: {} MiB, {} cpu(s)]",
                node.id,
                node.available_memory / (1024 * 1024),
                node.cpu_affinity.len()
            )?;
        }
        Ok(())
    }
}

#[cfg(target_os = "linux")]
fn detect_linux() -> Option<NumaTopology> {
    let mut ids: Vec<usize> = std::fs::read_dir(SYSFS_NODE_ROOT)
        .ok()?
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            e.file_name()
                .to_str()
                .and_then(|name| name.strip_prefix("node"))
                .and_then(|id| id.parse().ok())
        })
        .collect();
    if ids.is_empty() {
        return None;
    }
    ids.sort_unstable();

    let nodes = ids
        .into_iter()
        .map(|id| {
            let dir = format!("{SYSFS_NODE_ROOT}/node{id}");
            let cpu_affinity = std::fs::read_to_string(format!("{dir}/cpulist"))
                .map(|s| parse_cpu_list(&s))
                .unwrap_or_default();
            let available_memory = std::fs::read_to_string(format!("{dir}/meminfo"))
                .ok()
                .and_then(|s| parse_mem_total(&s))
                .unwrap_or(DEFAULT_NODE_MEMORY);
            NodeSpec {
                id,
                available_memory,
                cpu_affinity,
            }
        })
        .collect();

    Some(NumaTopology::from_nodes(nodes))
}

/// Parses a sysfs CPU list such as `"0-7,16-23"`.
#[must_use]
pub fn parse_cpu_list(s: &str) -> Vec<usize> {
    let mut cpus = Vec::new();
    for part in s.trim().split(',').filter(|p| !p.is_empty()) {
        if let Some((start, end)) = part.split_once('-') {
            if let (Ok(start), Ok(end)) = (start.parse::<usize>(), end.parse::<usize>()) {
                cpus.extend(start..=end);
            }
        } else if let Ok(cpu) = part.parse::<usize>() {
            cpus.push(cpu);
        }
    }
    cpus
}

/// Extracts `MemTotal` (in bytes) from a per-node meminfo file.
///
/// Lines look like `Node 0 MemTotal:       32768000 kB`.
#[must_use]
pub fn parse_mem_total(meminfo: &str) -> Option<u64> {
    meminfo
        .lines()
        .find(|line| line.contains("MemTotal:"))
        .and_then(|line| line.split_whitespace().rev().nth(1))
        .and_then(|kb| kb.parse::<u64>().ok())
        .map(|kb| kb * 1024)
}

/// Reports which node the calling thread is running on.
pub trait NodeLocator: Send + Sync {
    /// Returns the current node, or `None` if it cannot be determined.
    fn current_node(&self, topology: &NumaTopology) -> Option<usize>;
}

/// Locates the calling thread via the CPU it is running on.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuNodeLocator;

impl NodeLocator for CpuNodeLocator {
    fn current_node(&self, topology: &NumaTopology) -> Option<usize> {
        current_cpu().and_then(|cpu| topology.node_of_cpu(cpu))
    }
}

/// Always reports the same node. Useful for pinned workers and tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedNodeLocator(pub usize);

impl NodeLocator for FixedNodeLocator {
    fn current_node(&self, _topology: &NumaTopology) -> Option<usize> {
        Some(self.0)
    }
}

/// Returns the CPU the calling thread is running on.
#[must_use]
pub fn current_cpu() -> Option<usize> {
    #[cfg(target_os = "linux")]
    {
        // SAFETY: sched_getcpu has no preconditions
        let cpu = unsafe { libc::sched_getcpu() };
        usize::try_from(cpu).ok()
    }

    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}
