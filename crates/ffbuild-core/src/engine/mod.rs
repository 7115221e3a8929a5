//! # Engine Module
//!
//! The per-call machinery of system assembly: everything that runs between a
//! topology entering `create_system` and a [`ForceModel`](model::ForceModel)
//! coming out.
//!
//! ## Architecture
//!
//! - **Options** ([`config`]) - Typed `createSystem` options with defaults, builder
//!   setters and TOML loading
//! - **Residue Matching** ([`matcher`]) - Signature filtering, graph isomorphism against
//!   templates, tie-breaking and the "no template found" diagnostics
//! - **Assembly View** ([`context`]) - The matched topology handed to generators: atom
//!   types, derived bonds, angles and torsions, and the constraint policy
//! - **Force Generators** ([`generators`]) - One generator per force section tag, merged
//!   across definition sources and turned into force terms
//! - **Extension Hooks** ([`callbacks`]) - Caller-supplied template matchers, template
//!   generators and initializers
//! - **Output** ([`model`]) - Particles, constraints, virtual sites and forces
//! - **Progress Monitoring** ([`progress`]) - Phase and task reporting callbacks
//! - **Error Handling** ([`error`]) - The [`AssemblyError`](error::AssemblyError) returned
//!   when no model can be built
//!
//! Generators and hooks only read the [`core`](crate::core) definitions; a
//! failed call never leaves a partial model behind.

pub mod callbacks;
pub mod config;
pub mod context;
pub mod error;
pub mod generators;
pub mod matcher;
pub mod model;
pub mod progress;
