use super::{MatchSettings, ResidueGraph};
use crate::core::forcefield::template::Template;

/// Finds a bijection from residue atoms to template atoms that preserves
/// elements, internal bonds and (unless ignored) external-bond counts.
///
/// # Return
///
/// `Some(map)` where `map[local]` is the template atom matched to residue atom
/// `local`. With `ignore_extra_particles`, residue extra particles are paired
/// with template extra particles by name, then by order, and may be left `None`
/// if the template has fewer of them.
pub(crate) fn find_mapping(
    residue: &ResidueGraph<'_>,
    template: &Template,
    settings: MatchSettings,
) -> Option<Vec<Option<usize>>> {
    let ignore_extra = settings.ignore_extra_particles;
    let n_res = residue.atoms.len();
    let n_tpl = template.atoms.len();

    let res_in: Vec<bool> = (0..n_res)
        .map(|i| !ignore_extra || residue.elements[i].is_some())
        .collect();
    let tpl_in: Vec<bool> = (0..n_tpl)
        .map(|t| !ignore_extra || template.atoms[t].element.is_some())
        .collect();
    let res_core: Vec<usize> = (0..n_res).filter(|&i| res_in[i]).collect();
    let tpl_core: Vec<usize> = (0..n_tpl).filter(|&t| tpl_in[t]).collect();
    if res_core.len() != tpl_core.len() {
        return None;
    }

    let tpl_adjacency = template.adjacency();
    let mut tpl_bonded = vec![false; n_tpl * n_tpl];
    for &(a, b) in &template.bonds {
        tpl_bonded[a * n_tpl + b] = true;
        tpl_bonded[b * n_tpl + a] = true;
    }
    let res_degree: Vec<usize> = (0..n_res)
        .map(|i| residue.adjacency[i].iter().filter(|&&j| res_in[j]).count())
        .collect();
    let tpl_degree: Vec<usize> = (0..n_tpl)
        .map(|t| tpl_adjacency[t].iter().filter(|&&u| tpl_in[u]).count())
        .collect();

    let mut candidates: Vec<Vec<usize>> = vec![Vec::new(); n_res];
    for &i in &res_core {
        let (mut named, mut others): (Vec<usize>, Vec<usize>) = tpl_core
            .iter()
            .copied()
            .filter(|&t| {
                let atom = &template.atoms[t];
                atom.element == residue.elements[i]
                    && tpl_degree[t] == res_degree[i]
                    && (settings.ignore_external_bonds
                        || atom.external_bonds == residue.external_bonds[i])
            })
            .partition(|&t| template.atoms[t].name == residue.atom_name(i));
        if named.is_empty() && others.is_empty() {
            return None;
        }
        named.append(&mut others);
        candidates[i] = named;
    }

    let order = visit_order(residue, &res_core, &res_in, &candidates);
    let mut search = Search {
        residue,
        res_in: &res_in,
        tpl_in: &tpl_in,
        tpl_adjacency: &tpl_adjacency,
        tpl_bonded: &tpl_bonded,
        n_tpl,
        candidates: &candidates,
        order: &order,
        assignment: vec![None; n_res],
        used: vec![false; n_tpl],
    };
    if !search.extend(0) {
        return None;
    }
    let mut assignment = search.assignment;

    if ignore_extra {
        pair_extra_particles(residue, template, &res_in, &tpl_in, &mut assignment);
    }
    Some(assignment)
}

/// Starts from the most constrained atom and grows along bonds, always
/// taking the frontier atom with the fewest candidates next.
fn visit_order(
    residue: &ResidueGraph<'_>,
    core: &[usize],
    res_in: &[bool],
    candidates: &[Vec<usize>],
) -> Vec<usize> {
    let mut visited = vec![false; res_in.len()];
    let mut on_frontier = vec![false; res_in.len()];
    let mut order = Vec::with_capacity(core.len());

    while order.len() < core.len() {
        let rank = |&i: &usize| (candidates[i].len(), i);
        let next = core
            .iter()
            .copied()
            .filter(|&i| on_frontier[i] && !visited[i])
            .min_by_key(rank)
            .or_else(|| core.iter().copied().filter(|&i| !visited[i]).min_by_key(rank));
        let Some(next) = next else {
            break;
        };
        visited[next] = true;
        order.push(next);
        for &j in &residue.adjacency[next] {
            if res_in[j] {
                on_frontier[j] = true;
            }
        }
    }
    order
}

struct Search<'s> {
    residue: &'s ResidueGraph<'s>,
    res_in: &'s [bool],
    tpl_in: &'s [bool],
    tpl_adjacency: &'s [Vec<usize>],
    tpl_bonded: &'s [bool],
    n_tpl: usize,
    candidates: &'s [Vec<usize>],
    order: &'s [usize],
    assignment: Vec<Option<usize>>,
    used: Vec<bool>,
}

impl Search<'_> {
    fn extend(&mut self, depth: usize) -> bool {
        let Some(&r) = self.order.get(depth) else {
            return true;
        };
        for &t in &self.candidates[r] {
            if self.used[t] || !self.consistent(r, t) {
                continue;
            }
            self.assignment[r] = Some(t);
            self.used[t] = true;
            if self.extend(depth + 1) {
                return true;
            }
            self.assignment[r] = None;
            self.used[t] = false;
        }
        false
    }

    /// Every already-assigned neighbour of `r` must map to a template
    /// neighbour of `t`, and both sides must have the same number of
    /// assigned neighbours.
    fn consistent(&self, r: usize, t: usize) -> bool {
        let mut assigned_res = 0;
        for &n in &self.residue.adjacency[r] {
            if !self.res_in[n] {
                continue;
            }
            if let Some(tn) = self.assignment[n] {
                if !self.tpl_bonded[t * self.n_tpl + tn] {
                    return false;
                }
                assigned_res += 1;
            }
        }
        let assigned_tpl = self.tpl_adjacency[t]
            .iter()
            .filter(|&&u| self.tpl_in[u] && self.used[u])
            .count();
        assigned_res == assigned_tpl
    }
}

fn pair_extra_particles(
    residue: &ResidueGraph<'_>,
    template: &Template,
    res_in: &[bool],
    tpl_in: &[bool],
    assignment: &mut [Option<usize>],
) {
    let res_extra: Vec<usize> = (0..res_in.len()).filter(|&i| !res_in[i]).collect();
    let tpl_extra: Vec<usize> = (0..tpl_in.len()).filter(|&t| !tpl_in[t]).collect();
    let mut taken = vec![false; tpl_in.len()];

    for &i in &res_extra {
        if let Some(&t) = tpl_extra
            .iter()
            .find(|&&t| !taken[t] && template.atoms[t].name == residue.atom_name(i))
        {
            taken[t] = true;
            assignment[i] = Some(t);
        }
    }
    for &i in &res_extra {
        if assignment[i].is_some() {
            continue;
        }
        if let Some(&t) = tpl_extra.iter().find(|&&t| !taken[t]) {
            taken[t] = true;
            assignment[i] = Some(t);
        }
    }
}
