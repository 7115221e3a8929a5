//! # Workflows Module
//!
//! This module provides the user-facing entry points of the library: loading force
//! field definitions and assembling force models from topologies.
//!
//! ## Overview
//!
//! A [`ForceField`](forcefield::ForceField) is built once from one or more XML
//! definition sources and then queried many times. Each `create_system` call
//! matches every residue of a topology to a template, runs every force generator
//! over the matched topology, and returns a complete
//! [`ForceModel`](crate::engine::model::ForceModel) or an error.
//!
//! ## Architecture
//!
//! - **Force Field** ([`forcefield`]) - Definition loading, registration of atom types,
//!   templates, patches, generators and hooks, and the residue matching queries
//! - **System Assembly** ([`assemble`]) - The per-call assembly state machine with option
//!   validation, matching, force generation and mass finalization
//!
//! ## Key Capabilities
//!
//! - **Parallel residue matching** behind the `parallel` feature
//! - **Progress monitoring** with one phase per assembly state
//! - **Aggregated diagnostics** naming every residue that could not be matched
//! - **Shared definitions** usable from many threads once loading is done

pub mod assemble;
pub mod forcefield;
