//! # Core Module
//!
//! Stateless building blocks of the force field: the chemical graph that is
//! parameterized, the definitions that parameterize it, and the reader that turns
//! XML definition sources into those definitions.
//!
//! ## Architecture
//!
//! - **Chemical Graph** ([`models`]) - Elements, chains, residues, atoms and bonds
//! - **Definitions** ([`forcefield`]) - Atom types, residue templates, patches and the
//!   [`TemplateLibrary`](forcefield::library::TemplateLibrary) that indexes them
//! - **Definition Sources** ([`io`]) - XML parsing, include resolution and translation of
//!   `<AtomTypes>`, `<Residues>` and `<Patches>` sections into definitions
//! - **Errors** ([`error`]) - The [`LoadError`](error::LoadError) reported by everything
//!   that reads or registers definitions
//!
//! Nothing in this layer holds per-call state; the [`engine`](crate::engine) layer
//! borrows these types immutably while assembling a force model.

pub mod error;
pub mod forcefield;
pub mod io;
pub mod models;
