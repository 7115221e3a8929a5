use super::atom_type::AtomType;
use crate::core::error::LoadError;
use crate::core::io::xml::XmlNode;
use std::fmt;

/// Selects atom types in a force-generator parameter entry.
///
/// Entries name either a type (`type1="..."`) or a class (`class1="..."`); an
/// empty value is a wildcard that matches every type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeSelector {
    Wildcard,
    Type(String),
    Class(String),
}

impl TypeSelector {
    /// Reads the selector stored under `type{suffix}` or `class{suffix}`.
    ///
    /// # Arguments
    ///
    /// * `node` - The parameter entry.
    /// * `suffix` - Position suffix, e.g. `"1"` for `type1`/`class1`, or `""` for `type`/`class`.
    pub fn from_node(node: &XmlNode, suffix: &str) -> Result<Self, LoadError> {
        Self::from_node_opt(node, suffix)?.ok_or_else(|| LoadError::MissingAttribute {
            element: node.name.clone(),
            attribute: format!("type{suffix}"),
        })
    }

    /// Like [`TypeSelector::from_node`], but absent attributes yield `None`.
    pub fn from_node_opt(node: &XmlNode, suffix: &str) -> Result<Option<Self>, LoadError> {
        let type_key = format!("type{suffix}");
        let class_key = format!("class{suffix}");
        Ok(match (node.attr(&type_key), node.attr(&class_key)) {
            (Some(_), Some(_)) => {
                return Err(LoadError::invalid_value(
                    &node.name,
                    &type_key,
                    "",
                    format!("'{type_key}' and '{class_key}' are mutually exclusive"),
                ));
            }
            (Some(""), None) | (None, Some("")) => Some(TypeSelector::Wildcard),
            (Some(t), None) => Some(TypeSelector::Type(t.to_string())),
            (None, Some(c)) => Some(TypeSelector::Class(c.to_string())),
            (None, None) => None,
        })
    }

    pub fn matches(&self, atom_type: &AtomType) -> bool {
        match self {
            TypeSelector::Wildcard => true,
            TypeSelector::Type(name) => *name == atom_type.name,
            TypeSelector::Class(class) => *class == atom_type.class,
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, TypeSelector::Wildcard)
    }
}

impl fmt::Display for TypeSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeSelector::Wildcard => f.write_str("*"),
            TypeSelector::Type(t) => write!(f, "type {t}"),
            TypeSelector::Class(c) => write!(f, "class {c}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::element::Element;

    #[test]
    fn reads_type_class_and_wildcard() {
        let node = XmlNode::new("Proper")
            .with_attr("type1", "")
            .with_attr("class2", "CT")
            .with_attr("type3", "amber-CT");
        assert_eq!(
            TypeSelector::from_node(&node, "1").unwrap(),
            TypeSelector::Wildcard
        );
        assert_eq!(
            TypeSelector::from_node(&node, "2").unwrap(),
            TypeSelector::Class("CT".into())
        );
        assert_eq!(
            TypeSelector::from_node(&node, "3").unwrap(),
            TypeSelector::Type("amber-CT".into())
        );
        assert!(TypeSelector::from_node(&node, "4").is_err());
        assert_eq!(TypeSelector::from_node_opt(&node, "4").unwrap(), None);
    }

    #[test]
    fn both_type_and_class_is_an_error() {
        let node = XmlNode::new("Bond")
            .with_attr("type1", "A")
            .with_attr("class1", "B");
        assert!(TypeSelector::from_node(&node, "1").is_err());
    }

    #[test]
    fn matches_by_name_class_or_anything() {
        let ty = AtomType::new("amber-CT", "CT", Some(Element::CARBON), 12.01);
        assert!(TypeSelector::Wildcard.matches(&ty));
        assert!(TypeSelector::Type("amber-CT".into()).matches(&ty));
        assert!(TypeSelector::Class("CT".into()).matches(&ty));
        assert!(!TypeSelector::Class("amber-CT".into()).matches(&ty));
    }
}
