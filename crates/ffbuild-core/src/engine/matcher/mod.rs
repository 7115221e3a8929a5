//! Assigns a residue template to every residue of a topology.
//!
//! Matching is a graph isomorphism between a residue's atoms and a template's
//! atoms that preserves elements, internal bonds, and external-bond counts.
//! Candidate templates are narrowed by element signature first, so the
//! backtracking search in [`isomorphism`] only ever runs against templates
//! with the right composition.

mod diagnostics;
mod isomorphism;

pub use diagnostics::explain;

use super::callbacks::{TemplateGenerator, TemplateMatcher};
use super::config::CreateSystemOptions;
use super::error::AssemblyError;
use super::progress::{Progress, ProgressReporter};
use crate::core::forcefield::library::TemplateLibrary;
use crate::core::forcefield::signature::Signature;
use crate::core::forcefield::template::Template;
use crate::core::models::element::Element;
use crate::core::models::topology::Topology;
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Relaxations applied while matching residues to templates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchSettings {
    /// Skip the per-atom external-bond count check.
    pub ignore_external_bonds: bool,
    /// Match on real atoms only; extra particles are paired afterwards.
    pub ignore_extra_particles: bool,
}

impl MatchSettings {
    pub fn from_options(options: &CreateSystemOptions) -> Self {
        Self {
            ignore_external_bonds: options.ignore_external_bonds,
            ignore_extra_particles: options.ignore_extra_particles,
        }
    }
}

/// A residue of a topology viewed as a standalone graph.
///
/// Atoms are addressed by their local position in the residue's atom list;
/// `atoms[local]` gives the global index.
#[derive(Debug, Clone)]
pub struct ResidueGraph<'t> {
    pub topology: &'t Topology,
    pub residue: usize,
    pub atoms: Vec<usize>,
    pub elements: Vec<Option<Element>>,
    pub adjacency: Vec<Vec<usize>>,
    /// Internal bonds as local index pairs.
    pub bonds: Vec<(usize, usize)>,
    /// Number of bonds from each atom to atoms of other residues.
    pub external_bonds: Vec<usize>,
}

impl<'t> ResidueGraph<'t> {
    pub fn new(topology: &'t Topology, residue: usize) -> Option<Self> {
        let res = topology.residue(residue)?;
        let atoms = res.atoms().to_vec();
        let local: HashMap<usize, usize> = atoms.iter().enumerate().map(|(l, &g)| (g, l)).collect();
        let elements = atoms.iter().map(|&g| topology.atoms()[g].element).collect();

        let (internal, external) = topology.residue_bonds(residue);
        let mut adjacency = vec![Vec::new(); atoms.len()];
        let mut bonds = Vec::with_capacity(internal.len());
        for bond in internal {
            let (a, b) = (local[&bond.atom1], local[&bond.atom2]);
            adjacency[a].push(b);
            adjacency[b].push(a);
            bonds.push((a.min(b), a.max(b)));
        }
        let mut external_bonds = vec![0; atoms.len()];
        for bond in external {
            external_bonds[local[&bond.atom1]] += 1;
        }

        Some(Self {
            topology,
            residue,
            atoms,
            elements,
            adjacency,
            bonds,
            external_bonds,
        })
    }

    pub fn name(&self) -> &'t str {
        &self.topology.residues()[self.residue].name
    }

    pub fn atom_name(&self, local: usize) -> &'t str {
        &self.topology.atoms()[self.atoms[local]].name
    }

    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }

    pub fn signature(&self, ignore_extra_particles: bool) -> Signature {
        let sig = Signature::from_elements(self.elements.iter().copied());
        if ignore_extra_particles {
            sig.without_extra_particles()
        } else {
            sig
        }
    }
}

/// The template chosen for one residue and the atom correspondence.
///
/// `atom_map[local]` is the template atom for the residue's `local`-th atom.
#[derive(Debug, Clone)]
pub struct TemplateMatch<'a> {
    pub residue: usize,
    pub template: Cow<'a, Template>,
    pub atom_map: Vec<Option<usize>>,
}

/// Returns every template among `templates` that matches `residue`, with
/// its atom mapping, in the order the templates were given.
pub fn match_residue<'l>(
    residue: &ResidueGraph<'_>,
    templates: impl IntoIterator<Item = &'l Template>,
    settings: MatchSettings,
) -> Vec<(&'l Template, Vec<Option<usize>>)> {
    templates
        .into_iter()
        .filter_map(|t| isomorphism::find_mapping(residue, t, settings).map(|m| (t, m)))
        .collect()
}

fn template_signature(template: &Template, ignore_extra_particles: bool) -> Signature {
    let sig = template.signature();
    if ignore_extra_particles {
        sig.without_extra_particles()
    } else {
        sig
    }
}

/// Whether two matches assign the same atom type and attributes to every
/// residue atom.
fn equivalent(a: &Template, a_map: &[Option<usize>], b: &Template, b_map: &[Option<usize>]) -> bool {
    a_map.iter().zip(b_map).all(|(&x, &y)| match (x, y) {
        (Some(x), Some(y)) => {
            let (ax, by) = (&a.atoms[x], &b.atoms[y]);
            ax.atom_type == by.atom_type && ax.attributes == by.attributes
        }
        (None, None) => true,
        _ => false,
    })
}

/// Outcome of matching one residue against the library.
#[derive(Debug)]
pub(crate) enum Resolution<'a> {
    Matched(TemplateMatch<'a>),
    /// Nothing in the library matched; template generators may still help.
    Unmatched,
    Failed(AssemblyError),
}

/// Per-call matcher over one topology and one library.
pub(crate) struct ResidueMatcher<'a> {
    topology: &'a Topology,
    library: &'a TemplateLibrary,
    matchers: &'a [Box<dyn TemplateMatcher>],
    requested: &'a BTreeMap<usize, String>,
    settings: MatchSettings,
    patched: Vec<Template>,
}

impl<'a> ResidueMatcher<'a> {
    pub(crate) fn new(
        topology: &'a Topology,
        library: &'a TemplateLibrary,
        matchers: &'a [Box<dyn TemplateMatcher>],
        options: &'a CreateSystemOptions,
    ) -> Self {
        let patched = if library.patches().is_empty() {
            Vec::new()
        } else {
            library.patched_templates()
        };
        Self {
            topology,
            library,
            matchers,
            requested: &options.residue_templates,
            settings: MatchSettings::from_options(options),
            patched,
        }
    }

    /// Resolves every residue, in residue order.
    pub(crate) fn resolve_all(&self, reporter: &ProgressReporter) -> Vec<Resolution<'a>> {
        let residues: Vec<usize> = (0..self.topology.residues().len()).collect();

        #[cfg(not(feature = "parallel"))]
        let iterator = residues.iter();

        #[cfg(feature = "parallel")]
        let iterator = residues.par_iter();

        iterator
            .map(|&residue| {
                let resolution = self.resolve(residue);
                reporter.report(Progress::TaskIncrement);
                resolution
            })
            .collect()
    }

    /// Explicit request, then template matchers, then signature candidates,
    /// then patched templates.
    pub(crate) fn resolve(&self, residue: usize) -> Resolution<'a> {
        let Some(graph) = ResidueGraph::new(self.topology, residue) else {
            return Resolution::Unmatched;
        };

        if let Some(name) = self.requested.get(&residue) {
            return self.forced(&graph, name, "requested in residueTemplates");
        }
        for matcher in self.matchers {
            if let Some(name) = matcher.select(self.library, &graph, self.settings) {
                return self.forced(&graph, &name, "selected by a template matcher");
            }
        }

        let ignore_extra = self.settings.ignore_extra_particles;
        let signature = graph.signature(ignore_extra);
        let found = match_residue(&graph, self.library.candidates(&signature, ignore_extra), self.settings);
        if !found.is_empty() {
            let found = found.into_iter().map(|(t, m)| (Cow::Borrowed(t), m)).collect();
            return self.choose(&graph, found);
        }

        let patched = self
            .patched
            .iter()
            .filter(|t| template_signature(t, ignore_extra) == signature);
        let found = match_residue(&graph, patched, self.settings);
        if !found.is_empty() {
            let found = found
                .into_iter()
                .map(|(t, m)| (Cow::Owned(t.clone()), m))
                .collect();
            return self.choose(&graph, found);
        }
        Resolution::Unmatched
    }

    fn forced(&self, graph: &ResidueGraph<'_>, name: &str, origin: &str) -> Resolution<'a> {
        let template = match self.library.template(name) {
            Some(t) => Cow::Borrowed(t),
            None => match self.patched.iter().find(|t| t.name == name) {
                Some(t) => Cow::Owned(t.clone()),
                None => {
                    return Resolution::Failed(self.no_template(
                        graph,
                        format!("The template {name} {origin} is not defined."),
                    ));
                }
            },
        };
        match isomorphism::find_mapping(graph, &template, self.settings) {
            Some(atom_map) => Resolution::Matched(TemplateMatch {
                residue: graph.residue,
                template,
                atom_map,
            }),
            None => Resolution::Failed(self.no_template(
                graph,
                format!("The template {name} {origin} does not match the residue."),
            )),
        }
    }

    fn choose(
        &self,
        graph: &ResidueGraph<'_>,
        mut found: Vec<(Cow<'a, Template>, Vec<Option<usize>>)>,
    ) -> Resolution<'a> {
        let all_equivalent = found
            .iter()
            .skip(1)
            .all(|(t, m)| equivalent(&found[0].0, &found[0].1, t, m));
        if !all_equivalent {
            return Resolution::Failed(AssemblyError::AmbiguousTemplate {
                residue: graph.residue,
                name: graph.name().to_string(),
                candidates: found.iter().map(|(t, _)| t.name.clone()).collect(),
            });
        }
        let (template, atom_map) = found.swap_remove(0);
        Resolution::Matched(TemplateMatch {
            residue: graph.residue,
            template,
            atom_map,
        })
    }

    /// Asks template generators for a template for an unmatched residue.
    ///
    /// Templates generated earlier in the same call (`generated`) are tried
    /// first, so one generated template serves every identical residue.
    pub(crate) fn generate(
        &self,
        residue: usize,
        generators: &[Box<dyn TemplateGenerator>],
        generated: &mut Vec<Template>,
    ) -> Result<Option<TemplateMatch<'a>>, AssemblyError> {
        let Some(graph) = ResidueGraph::new(self.topology, residue) else {
            return Ok(None);
        };
        let ignore_extra = self.settings.ignore_extra_particles;
        let signature = graph.signature(ignore_extra);

        let reusable = generated
            .iter()
            .filter(|t| template_signature(t, ignore_extra) == signature);
        if let Some((template, atom_map)) = match_residue(&graph, reusable, self.settings).into_iter().next() {
            return Ok(Some(TemplateMatch {
                residue,
                template: Cow::Owned(template.clone()),
                atom_map,
            }));
        }

        for generator in generators {
            let Some(mut template) = generator.generate(self.library, &graph) else {
                continue;
            };
            self.library.resolve_elements(&mut template)?;
            match isomorphism::find_mapping(&graph, &template, self.settings) {
                Some(atom_map) => {
                    debug!(
                        residue = residue + 1,
                        template = %template.name,
                        "Template generator produced a matching template."
                    );
                    generated.push(template.clone());
                    return Ok(Some(TemplateMatch {
                        residue,
                        template: Cow::Owned(template),
                        atom_map,
                    }));
                }
                None => debug!(
                    residue = residue + 1,
                    template = %template.name,
                    "Generated template does not match the residue; trying the next generator."
                ),
            }
        }
        Ok(None)
    }

    /// The `NoTemplate` error for a residue nothing could match.
    pub(crate) fn failure(&self, residue: usize) -> AssemblyError {
        match ResidueGraph::new(self.topology, residue) {
            Some(graph) => {
                let detail = explain(&graph, self.library, self.settings);
                self.no_template(&graph, detail)
            }
            None => AssemblyError::NoTemplate {
                residue,
                name: String::new(),
                detail: "The residue does not exist.".to_string(),
            },
        }
    }

    fn no_template(&self, graph: &ResidueGraph<'_>, detail: String) -> AssemblyError {
        AssemblyError::NoTemplate {
            residue: graph.residue,
            name: graph.name().to_string(),
            detail,
        }
    }
}
