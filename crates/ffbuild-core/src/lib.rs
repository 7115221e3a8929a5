//! # ffbuild
//!
//! A force field engine that matches molecular topologies against residue templates
//! and assembles the parameterized force model of the matched system.
//!
//! ## Architectural Philosophy
//!
//! The library follows a strict three-layer architecture so that definitions,
//! per-call assembly logic and the public API stay separate.
//!
//! - **[`core`]: The Foundation.** Stateless data models (`Topology`, `Element`), the
//!   force field definitions (atom types, residue templates, patches) and the XML
//!   definition reader.
//!
//! - **[`engine`]: The Logic Core.** Options, residue matching by graph isomorphism,
//!   the assembly view of a matched topology, and the force generators that turn
//!   `<...Force>` sections into force terms.
//!
//! - **[`workflows`]: The Public API.** The [`ForceField`](workflows::forcefield::ForceField)
//!   entry point ties `core` and `engine` together: load definitions, then call
//!   `create_system` for each topology.

pub mod core;
pub mod engine;
pub mod workflows;
