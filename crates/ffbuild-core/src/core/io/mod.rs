//! # Definition Sources
//!
//! Reading force-field definitions from XML.
//!
//! - [`xml`] - A small element tree built on `quick-xml`, with typed attribute accessors
//! - [`source`] - File and in-memory sources, `<Include>` resolution and cycle detection
//! - [`definitions`] - Translation of `<Type>`, `<Residue>` and `<Patch>` elements into
//!   library definitions
//!
//! Force-generator sections are not interpreted here; each generator parses its own
//! element through [`XmlNode`](xml::XmlNode).

pub mod definitions;
pub mod source;
pub mod xml;
