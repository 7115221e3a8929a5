use crate::core::models::element::Element;
use std::collections::BTreeMap;

/// The element multiset of a residue or template.
///
/// Extra particles are counted under `None`. Two residues can only be
/// isomorphic if their signatures are equal, which makes the signature the
/// key of the library's candidate index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Signature {
    counts: BTreeMap<Option<Element>, usize>,
}

impl Signature {
    pub fn from_elements<I>(elements: I) -> Self
    where
        I: IntoIterator<Item = Option<Element>>,
    {
        let mut counts = BTreeMap::new();
        for element in elements {
            *counts.entry(element).or_insert(0) += 1;
        }
        Self { counts }
    }

    /// The same signature with extra particles removed.
    pub fn without_extra_particles(&self) -> Self {
        Self {
            counts: self
                .counts
                .iter()
                .filter(|(e, _)| e.is_some())
                .map(|(e, n)| (*e, *n))
                .collect(),
        }
    }

    pub fn count(&self, element: Option<Element>) -> usize {
        self.counts.get(&element).copied().unwrap_or(0)
    }

    pub fn hydrogens(&self) -> usize {
        self.count(Some(Element::HYDROGEN))
    }

    pub fn extra_particles(&self) -> usize {
        self.count(None)
    }

    /// Heavy (non-hydrogen) elements present, ordered by atomic number.
    pub fn heavy_elements(&self) -> impl Iterator<Item = (Element, usize)> + '_ {
        self.counts.iter().filter_map(|(e, n)| match e {
            Some(el) if !el.is_hydrogen() => Some((*el, *n)),
            _ => None,
        })
    }

    pub fn elements(&self) -> impl Iterator<Item = Element> + '_ {
        self.counts.keys().filter_map(|e| *e)
    }

    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_ignores_atom_order() {
        let a = Signature::from_elements([
            Some(Element::OXYGEN),
            Some(Element::HYDROGEN),
            Some(Element::HYDROGEN),
        ]);
        let b = Signature::from_elements([
            Some(Element::HYDROGEN),
            Some(Element::OXYGEN),
            Some(Element::HYDROGEN),
        ]);
        assert_eq!(a, b);
        assert_eq!(a.hydrogens(), 2);
        assert_eq!(a.total(), 3);
    }

    #[test]
    fn extra_particles_are_counted_separately() {
        let with_site = Signature::from_elements([
            Some(Element::OXYGEN),
            Some(Element::HYDROGEN),
            Some(Element::HYDROGEN),
            None,
        ]);
        assert_eq!(with_site.extra_particles(), 1);
        let reduced = with_site.without_extra_particles();
        assert_eq!(reduced.extra_particles(), 0);
        assert_eq!(reduced.total(), 3);
        assert_eq!(
            reduced.heavy_elements().collect::<Vec<_>>(),
            vec![(Element::OXYGEN, 1)]
        );
    }
}
