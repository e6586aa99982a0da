//! # topolink-core
//!
//! Core types and algorithms for topolink - a topology-aware accelerator broker.
//!
//! This crate provides the foundational pieces shared across the other
//! topolink components:
//!
//! - Device and health data structures
//! - The interconnect topology model (edges, link classes, connectivity graph)
//! - The edge ranker and the pluggable device selection strategies
//! - Error handling types

pub mod device;
pub mod error;
pub mod strategy;
pub mod topology;

// Re-export commonly used types at the crate root
pub use device::{Device, Health};
pub use error::{CoreError, Result};
pub use strategy::{EdgeGreedy, FirstFit, ScoreGraph, SelectionStrategy, StrategyKind};
pub use topology::{ConnectivityGraph, LinkClass, LinkedNode, TopoEdge, Topology};
