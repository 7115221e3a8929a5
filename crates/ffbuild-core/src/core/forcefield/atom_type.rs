use crate::core::models::element::Element;

/// A named atom type: the unit force generators assign parameters to.
#[derive(Debug, Clone, PartialEq)]
pub struct AtomType {
    pub name: String,
    pub class: String,
    pub element: Option<Element>,
    pub mass: f64,
}

impl AtomType {
    pub fn new(name: &str, class: &str, element: Option<Element>, mass: f64) -> Self {
        Self {
            name: name.to_string(),
            class: class.to_string(),
            element,
            mass,
        }
    }

    /// Describes the first field on which two definitions of the same type disagree.
    ///
    /// # Return
    ///
    /// `None` when the definitions are interchangeable.
    pub fn conflict_with(&self, other: &AtomType) -> Option<String> {
        if self.class != other.class {
            Some(format!(
                "class '{}' differs from previously registered '{}'",
                other.class, self.class
            ))
        } else if self.element != other.element {
            let show = |e: Option<Element>| e.map_or("none", Element::symbol);
            Some(format!(
                "element '{}' differs from previously registered '{}'",
                show(other.element),
                show(self.element)
            ))
        } else if self.mass != other.mass {
            Some(format!(
                "mass {} differs from previously registered {}",
                other.mass, self.mass
            ))
        } else {
            None
        }
    }
}
