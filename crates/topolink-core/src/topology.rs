//! Interconnect topology model
//!
//! Devices on a node are connected pairwise by links of varying quality
//! (NVLink, PCIe switch, host bridge, ...). The topology is measured once at
//! inventory time and is immutable afterwards; allocation strategies only
//! read it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Classification of the interconnect between two devices.
///
/// Variants are declared in ascending quality order so the derived `Ord`
/// ranks a faster link higher.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum LinkClass {
    /// No peer-to-peer path
    None,
    /// Traversal across NUMA nodes
    CrossNuma,
    /// Shared PCIe host bridge
    HostBridge,
    /// Multiple PCIe switches on the path
    MultiSwitch,
    /// Single shared PCIe switch
    SingleSwitch,
    /// Same board
    SameBoard,
    /// Direct NVLink connection
    NvLink,
}

impl LinkClass {
    /// Numeric contribution of a link of this class to a node's
    /// connectivity score.
    pub fn weight(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for LinkClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinkClass::None => "none",
            LinkClass::CrossNuma => "cross-numa",
            LinkClass::HostBridge => "host-bridge",
            LinkClass::MultiSwitch => "multi-switch",
            LinkClass::SingleSwitch => "single-switch",
            LinkClass::SameBoard => "same-board",
            LinkClass::NvLink => "nvlink",
        };
        write!(f, "{}", s)
    }
}

/// A measured pairwise interconnect between two devices.
///
/// The pair is unordered: an edge `a—b` also describes `b—a`. Edges are
/// immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopoEdge {
    /// First endpoint device id
    pub a: String,

    /// Second endpoint device id
    pub b: String,

    /// Link quality between the two endpoints
    pub class: LinkClass,
}

impl TopoEdge {
    /// Create a new edge
    pub fn new(a: impl Into<String>, b: impl Into<String>, class: LinkClass) -> Self {
        Self {
            a: a.into(),
            b: b.into(),
            class,
        }
    }

    /// Check whether this edge touches the given device
    pub fn connects(&self, id: &str) -> bool {
        self.a == id || self.b == id
    }
}

/// Reorder edges in place so link quality is non-increasing.
///
/// The sort is stable: edges of equal quality keep their original relative
/// order, so the ranking is deterministic for a fixed input sequence.
/// Empty and single-element slices are no-ops.
pub fn rank_edges(edges: &mut [TopoEdge]) {
    edges.sort_by(|x, y| y.class.cmp(&x.class));
}

/// Per-device record in the connectivity graph
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedNode {
    /// Aggregate connectivity score; higher means better-connected
    pub score: u32,

    /// Link class to each neighbor
    pub links: HashMap<String, LinkClass>,
}

/// Mapping from device id to its connectivity record.
///
/// The graph is symmetric: if A lists B as a neighbor, B lists A with the
/// same link class. Built once from the edge set; read-only afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectivityGraph {
    nodes: HashMap<String, LinkedNode>,
}

impl ConnectivityGraph {
    /// Build a symmetric graph from a set of pairwise edges.
    ///
    /// Each node's score is the sum of the weights of its links.
    pub fn from_edges(edges: &[TopoEdge]) -> Self {
        let mut nodes: HashMap<String, LinkedNode> = HashMap::new();

        for edge in edges {
            let weight = edge.class.weight();

            let node = nodes.entry(edge.a.clone()).or_default();
            node.links.insert(edge.b.clone(), edge.class);
            node.score += weight;

            let node = nodes.entry(edge.b.clone()).or_default();
            node.links.insert(edge.a.clone(), edge.class);
            node.score += weight;
        }

        Self { nodes }
    }

    /// Look up the record for a device
    pub fn node(&self, id: &str) -> Option<&LinkedNode> {
        self.nodes.get(id)
    }

    /// Check whether a device appears in the graph
    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Number of devices in the graph
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no devices
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// The full interconnect topology of a node: the measured edge list plus
/// the connectivity graph derived from it.
///
/// Owned by the advertisement layer for its lifetime and treated as
/// immutable after construction; rebuilding requires a restart.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    edges: Vec<TopoEdge>,
    graph: ConnectivityGraph,
}

impl Topology {
    /// Build a topology from a measured edge list
    pub fn from_edges(edges: Vec<TopoEdge>) -> Self {
        let graph = ConnectivityGraph::from_edges(&edges);
        Self { edges, graph }
    }

    /// The measured edge list, in measurement order
    pub fn edges(&self) -> &[TopoEdge] {
        &self.edges
    }

    /// The derived connectivity graph
    pub fn graph(&self) -> &ConnectivityGraph {
        &self.graph
    }
}
