//! # Forcefield Definitions
//!
//! The definitions a force field is built from, independent of any topology.
//!
//! - [`atom_type`] - Named atom types with class, element and mass
//! - [`template`] - Residue templates, their atoms, bonds, external-bond markers and virtual sites
//! - [`patch`] - Single-residue modifications synthesizing new templates from existing ones
//! - [`signature`] - Element multisets used to index templates
//! - [`selector`] - Type/class/wildcard selectors used by force-generator parameter entries
//! - [`library`] - The [`TemplateLibrary`](library::TemplateLibrary) holding all of the above
//!
//! Conflict rules are enforced at registration: atom types must agree on every
//! field when re-registered, and templates may only replace one another through
//! their override level.

pub mod atom_type;
pub mod library;
pub mod patch;
pub mod selector;
pub mod signature;
pub mod template;
