//! # Models Module
//!
//! Chemical graph primitives consumed by the force field.
//!
//! - [`element`] - Periodic table entries with standard masses, looked up through a
//!   compile-time symbol map
//! - [`topology`] - Chains, residues, atoms and bonds with optional periodic box vectors
//!
//! Atoms without an element are extra particles (virtual sites, Drude particles).

pub mod element;
pub mod topology;
