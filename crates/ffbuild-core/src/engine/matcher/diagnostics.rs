use super::{MatchSettings, ResidueGraph};
use crate::core::forcefield::library::TemplateLibrary;
use crate::core::forcefield::signature::Signature;
use crate::core::forcefield::template::Template;
use crate::core::models::element::Element;
use std::collections::{BTreeMap, BTreeSet};

/// Explains why no template in `library` matches `residue`.
///
/// The explanation compares the residue with the closest template, moving
/// from coarse to fine differences: unsupported elements, element counts,
/// hydrogens and extra sites, bonds, externally bonded atoms, and finally
/// connectivity.
pub fn explain(residue: &ResidueGraph<'_>, library: &TemplateLibrary, settings: MatchSettings) -> String {
    let templates = library.templates();
    if templates.is_empty() {
        return "The force field contains no residue templates.".to_string();
    }

    let mut residue_sig = residue.signature(false);
    if settings.ignore_extra_particles {
        residue_sig = residue_sig.without_extra_particles();
    }
    let template_sigs: Vec<Signature> = templates
        .iter()
        .map(|t| {
            let sig = t.signature();
            if settings.ignore_extra_particles {
                sig.without_extra_particles()
            } else {
                sig
            }
        })
        .collect();

    let supported: BTreeSet<Element> = template_sigs.iter().flat_map(|s| s.elements()).collect();
    let unsupported: Vec<String> = residue_sig
        .elements()
        .filter(|e| !supported.contains(e))
        .map(|e| format!("{e} atoms"))
        .collect();
    if !unsupported.is_empty() {
        return format!(
            "The residue contains {}, which are not supported by any template in the force field.",
            and_list(&unsupported)
        );
    }
    if residue_sig.extra_particles() > 0 && template_sigs.iter().all(|s| s.extra_particles() == 0) {
        return "The residue contains extra sites, which are not supported by any template in the force field."
            .to_string();
    }

    let residue_name = residue.name();
    let Some(closest) = (0..templates.len()).min_by_key(|&i| {
        (
            heavy_distance(&residue_sig, &template_sigs[i]),
            templates[i].name != residue_name,
            residue_sig.hydrogens().abs_diff(template_sigs[i].hydrogens()),
            i,
        )
    }) else {
        return "The force field contains no residue templates.".to_string();
    };
    let template = &templates[closest];
    let template_sig = &template_sigs[closest];

    if heavy_distance(&residue_sig, template_sig) > 0 {
        let (missing, surplus) = element_differences(&residue_sig, template_sig);
        return format!(
            "The set of atoms is similar to {}, but {}.",
            template.name,
            missing_and_surplus(&missing, &surplus)
        );
    }

    let h_have = residue_sig.hydrogens();
    let h_want = template_sig.hydrogens();
    let ep_have = residue_sig.extra_particles();
    let ep_want = template_sig.extra_particles();
    if h_have != h_want || ep_have != ep_want {
        let mut missing = Vec::new();
        let mut surplus = Vec::new();
        for (have, want, noun) in [(h_have, h_want, "H atom"), (ep_have, ep_want, "extra site")] {
            if have < want {
                missing.push(count_noun(want - have, noun));
            } else if have > want {
                surplus.push(count_noun(have - want, noun));
            }
        }
        let mut message = format!(
            "The set of heavy atoms matches {}, but the residue {}.",
            template.name,
            missing_and_surplus(&missing, &surplus)
        );
        for (have, want, tool) in [(h_have, h_want, "addHydrogens()"), (ep_have, ep_want, "addExtraParticles()")] {
            if have < want {
                let pronoun = if want - have == 1 { "it" } else { "them" };
                message.push_str(&format!(" You may be able to add {pronoun} with {tool}."));
            }
        }
        return message;
    }

    let residue_bonds = residue_bond_counts(residue);
    let template_bonds = template_bond_counts(template);
    if residue_bonds != template_bonds {
        if residue.bonds.is_empty() {
            return format!(
                "The set of atoms matches {}, but the residue has no bonds between its atoms.",
                template.name
            );
        }
        let keys: BTreeSet<&BondKey> = residue_bonds.keys().chain(template_bonds.keys()).collect();
        let mut missing = Vec::new();
        let mut surplus = Vec::new();
        for key in keys {
            let have = residue_bonds.get(key).copied().unwrap_or(0);
            let want = template_bonds.get(key).copied().unwrap_or(0);
            let noun = format!("{}-{} bond", label(key.0), label(key.1));
            if have < want {
                missing.push(count_noun(want - have, &noun));
            } else if have > want {
                surplus.push(count_noun(have - want, &noun));
            }
        }
        return format!(
            "The set of atoms matches {}, but the residue {}.",
            template.name,
            missing_and_surplus(&missing, &surplus)
        );
    }

    if !settings.ignore_external_bonds {
        let have = external_signature(residue.elements.iter().copied().zip(residue.external_bonds.iter().copied()));
        let want = external_signature(template.atoms.iter().map(|a| (a.element, a.external_bonds)));
        if have != want {
            let (missing, surplus) = element_differences(&have, &want);
            let mut message = format!(
                "The atoms and bonds in the residue match {}, but the set of externally bonded atoms {}.",
                template.name,
                missing_and_surplus(&missing, &surplus)
            );
            if !missing.is_empty() && residue.topology.is_chain_terminal(residue.residue) {
                message.push_str(" Is the chain missing a terminal capping group?");
            }
            return message;
        }
    }

    format!(
        "The atoms and bonds in the residue match {}, but the connectivity is different.",
        template.name
    )
}

type BondKey = (Option<Element>, Option<Element>);

fn label(element: Option<Element>) -> String {
    element.map_or_else(|| "EP".to_string(), |e| e.symbol().to_string())
}

fn heavy_distance(a: &Signature, b: &Signature) -> usize {
    let elements: BTreeSet<Element> = a.heavy_elements().chain(b.heavy_elements()).map(|(e, _)| e).collect();
    elements
        .into_iter()
        .map(|e| a.count(Some(e)).abs_diff(b.count(Some(e))))
        .sum()
}

/// Per-element shortfall and surplus of `have` relative to `want`, ordered by
/// atomic number.
fn element_differences(have: &Signature, want: &Signature) -> (Vec<String>, Vec<String>) {
    let elements: BTreeSet<Element> = have.elements().chain(want.elements()).collect();
    let mut missing = Vec::new();
    let mut surplus = Vec::new();
    for e in elements {
        let (h, w) = (have.count(Some(e)), want.count(Some(e)));
        let noun = format!("{e} atom");
        if h < w {
            missing.push(count_noun(w - h, &noun));
        } else if h > w {
            surplus.push(count_noun(h - w, &noun));
        }
    }
    (missing, surplus)
}

fn bond_key(a: Option<Element>, b: Option<Element>) -> BondKey {
    let rank = |e: Option<Element>| e.map_or(u8::MAX, |e| e.atomic_number());
    if rank(a) <= rank(b) { (a, b) } else { (b, a) }
}

fn residue_bond_counts(residue: &ResidueGraph<'_>) -> BTreeMap<BondKey, usize> {
    let mut counts = BTreeMap::new();
    for &(a, b) in &residue.bonds {
        *counts.entry(bond_key(residue.elements[a], residue.elements[b])).or_insert(0) += 1;
    }
    counts
}

fn template_bond_counts(template: &Template) -> BTreeMap<BondKey, usize> {
    let mut counts = BTreeMap::new();
    for &(a, b) in &template.bonds {
        *counts
            .entry(bond_key(template.atoms[a].element, template.atoms[b].element))
            .or_insert(0) += 1;
    }
    counts
}

fn external_signature(atoms: impl Iterator<Item = (Option<Element>, usize)>) -> Signature {
    Signature::from_elements(
        atoms.flat_map(|(element, count)| std::iter::repeat_n(element, count)),
    )
}

fn count_noun(count: usize, noun: &str) -> String {
    if count == 1 {
        format!("1 {noun}")
    } else {
        format!("{count} {noun}s")
    }
}

fn missing_and_surplus(missing: &[String], surplus: &[String]) -> String {
    let mut parts = Vec::new();
    if !missing.is_empty() {
        parts.push(format!("is missing {}", and_list(missing)));
    }
    if !surplus.is_empty() {
        parts.push(format!("has {} too many", and_list(surplus)));
    }
    parts.join(" and ")
}

/// Joins items as "a", "a and b", or "a, b, and c".
fn and_list(items: &[String]) -> String {
    match items {
        [] => String::new(),
        [one] => one.clone(),
        [a, b] => format!("{a} and {b}"),
        [init @ .., last] => format!("{}, and {last}", init.join(", ")),
    }
}
