use super::xml::XmlNode;
use crate::core::error::LoadError;
use crate::core::forcefield::atom_type::AtomType;
use crate::core::forcefield::patch::{Patch, PatchOperation};
use crate::core::forcefield::template::{
    Template, TemplateAtom, TemplateVirtualSite, VirtualSiteKind,
};
use crate::core::models::element::Element;
use tracing::warn;

pub fn parse_atom_type(node: &XmlNode) -> Result<AtomType, LoadError> {
    let name = node.required_attr("name")?;
    let class = node.attr("class").unwrap_or(name);
    let element = match node.attr("element") {
        None | Some("") => None,
        Some(symbol) => Some(Element::from_symbol(symbol).ok_or_else(|| {
            LoadError::invalid_value(&node.name, "element", symbol, "unknown element symbol")
        })?),
    };
    let mass = node.required_f64("mass")?;
    Ok(AtomType::new(name, class, element, mass))
}

fn parse_template_atom(node: &XmlNode) -> Result<TemplateAtom, LoadError> {
    let mut atom = TemplateAtom::new(node.required_attr("name")?, node.required_attr("type")?);
    for (key, _) in node.attributes() {
        if key == "name" || key == "type" {
            continue;
        }
        if let Some(value) = node.attr_f64(key)? {
            atom.attributes.insert(key.to_string(), value);
        }
    }
    Ok(atom)
}

/// Resolves an atom reference given either by name (`name_key`) or by index (`index_key`).
fn atom_ref(
    node: &XmlNode,
    template: &Template,
    name_key: &str,
    index_key: &str,
) -> Result<usize, LoadError> {
    if let Some(name) = node.attr(name_key) {
        return template.atom_index(name).ok_or_else(|| {
            LoadError::invalid_value(&node.name, name_key, name, "no atom with this name")
        });
    }
    let index = node
        .attr_usize(index_key)?
        .ok_or_else(|| LoadError::MissingAttribute {
            element: node.name.clone(),
            attribute: name_key.to_string(),
        })?;
    if index >= template.atoms.len() {
        return Err(LoadError::invalid_value(
            &node.name,
            index_key,
            &index.to_string(),
            "atom index out of range",
        ));
    }
    Ok(index)
}

/// Parses a `<Residue>` element into an (unregistered) template.
pub fn parse_template(node: &XmlNode) -> Result<Template, LoadError> {
    let mut template = Template::new(node.required_attr("name")?);
    if let Some(level) = node.attr_usize("override")? {
        template.override_level = u32::try_from(level).map_err(|e| {
            LoadError::invalid_value(&node.name, "override", &level.to_string(), e.to_string())
        })?;
    }

    for child in node.children_named("Atom") {
        let atom = parse_template_atom(child)?;
        if template.atom_index(&atom.name).is_some() {
            return Err(LoadError::invalid_value(
                "Atom",
                "name",
                &atom.name,
                format!("duplicate atom name in template '{}'", template.name),
            ));
        }
        template.add_atom(atom);
    }

    for child in &node.children {
        match child.name.as_str() {
            "Bond" => {
                let a = atom_ref(child, &template, "atomName1", "from")?;
                let b = atom_ref(child, &template, "atomName2", "to")?;
                template.add_bond(a, b);
            }
            "ExternalBond" => {
                let a = atom_ref(child, &template, "atomName", "from")?;
                template.add_external_bond(a);
            }
            "VirtualSite" => {
                let site = parse_virtual_site(child, &template)?;
                template.virtual_sites.push(site);
            }
            "AllowPatch" => template
                .allowed_patches
                .push(child.required_attr("name")?.to_string()),
            _ => {}
        }
    }
    Ok(template)
}

fn parse_virtual_site(node: &XmlNode, template: &Template) -> Result<TemplateVirtualSite, LoadError> {
    let kind_name = node.required_attr("type")?;
    let site = atom_ref(node, template, "siteName", "index")?;
    let parent = |i: usize| {
        atom_ref(
            node,
            template,
            &format!("atomName{i}"),
            &format!("atom{i}"),
        )
    };
    let weights = |prefix: &str, n: usize| -> Result<Vec<f64>, LoadError> {
        (1..=n)
            .map(|i| node.required_f64(&format!("{prefix}{i}")))
            .collect()
    };

    let (kind, parents) = match kind_name {
        "average2" => {
            let w = weights("weight", 2)?;
            (
                VirtualSiteKind::TwoParticleAverage { weights: [w[0], w[1]] },
                vec![parent(1)?, parent(2)?],
            )
        }
        "average3" => {
            let w = weights("weight", 3)?;
            (
                VirtualSiteKind::ThreeParticleAverage {
                    weights: [w[0], w[1], w[2]],
                },
                vec![parent(1)?, parent(2)?, parent(3)?],
            )
        }
        "outOfPlane" => (
            VirtualSiteKind::OutOfPlane {
                weight12: node.required_f64("weight12")?,
                weight13: node.required_f64("weight13")?,
                weight_cross: node.required_f64("weightCross")?,
            },
            vec![parent(1)?, parent(2)?, parent(3)?],
        ),
        "localCoords" => {
            let mut parents = vec![parent(1)?, parent(2)?, parent(3)?];
            let mut count = 3;
            while node.has_attr(&format!("atomName{}", count + 1))
                || node.has_attr(&format!("atom{}", count + 1))
            {
                count += 1;
                parents.push(parent(count)?);
            }
            (
                VirtualSiteKind::LocalCoordinates {
                    origin_weights: weights("wo", count)?,
                    x_weights: weights("wx", count)?,
                    y_weights: weights("wy", count)?,
                    local_position: [
                        node.required_f64("p1")?,
                        node.required_f64("p2")?,
                        node.required_f64("p3")?,
                    ],
                },
                parents,
            )
        }
        other => {
            return Err(LoadError::invalid_value(
                &node.name,
                "type",
                other,
                "unknown virtual site type",
            ));
        }
    };

    let exclude_with = match node.attr("excludeWith") {
        None => parents[0],
        Some(value) => match value.trim().parse::<usize>() {
            Ok(index) if index < template.atoms.len() => index,
            _ => template.atom_index(value).ok_or_else(|| {
                LoadError::invalid_value(&node.name, "excludeWith", value, "no such atom")
            })?,
        },
    };

    Ok(TemplateVirtualSite {
        site,
        parents,
        kind,
        exclude_with,
    })
}

/// Parses a `<Patch>` element.
///
/// # Return
///
/// `Ok(None)` for patches spanning several residues, which are not supported
/// and are skipped with a warning.
pub fn parse_patch(node: &XmlNode) -> Result<Option<Patch>, LoadError> {
    let mut patch = Patch::new(node.required_attr("name")?);
    if node.attr_usize("residues")?.unwrap_or(1) > 1 {
        warn!(
            "Skipping patch '{}': patches spanning several residues are not supported.",
            patch.name
        );
        return Ok(None);
    }

    for child in &node.children {
        let op = match child.name.as_str() {
            "AddAtom" => PatchOperation::AddAtom(parse_template_atom(child)?),
            "ChangeAtom" => PatchOperation::ChangeAtom(parse_template_atom(child)?),
            "RemoveAtom" => PatchOperation::RemoveAtom(child.required_attr("name")?.to_string()),
            "AddBond" => PatchOperation::AddBond(
                child.required_attr("atomName1")?.to_string(),
                child.required_attr("atomName2")?.to_string(),
            ),
            "RemoveBond" => PatchOperation::RemoveBond(
                child.required_attr("atomName1")?.to_string(),
                child.required_attr("atomName2")?.to_string(),
            ),
            "AddExternalBond" => {
                PatchOperation::AddExternalBond(child.required_attr("atomName")?.to_string())
            }
            "RemoveExternalBond" => {
                PatchOperation::RemoveExternalBond(child.required_attr("atomName")?.to_string())
            }
            "ApplyToResidue" => {
                patch.apply_to.push(child.required_attr("name")?.to_string());
                continue;
            }
            _ => continue,
        };
        patch.operations.push(op);
    }
    Ok(Some(patch))
}

/// Reads `(family, version)` pairs from an `<Info>` element.
pub fn parse_families(info: &XmlNode) -> Result<Vec<(String, String)>, LoadError> {
    info.children_named("Family")
        .map(|f| {
            Ok((
                f.required_attr("name")?.to_string(),
                f.required_attr("version")?.to_string(),
            ))
        })
        .collect()
}
