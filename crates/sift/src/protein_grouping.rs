//! # Razor protein grouping
//!
//! Peptides that map to a single protein are assigned to it directly. Shared
//! peptides form a bipartite peptide/protein graph; each connected component
//! is resolved greedily by repeatedly crediting the protein with the most
//! support (unclaimed neighbour peptides plus uniquely assigned peptides) with
//! all of its remaining neighbours. Proteins whose supporting peptide sets are
//! identical are indistinguishable and are reported together as one group.
//!
//! Components never share nodes, so they are resolved in parallel.

use crate::scoring::Psm;
use crate::Error;
use fnv::{FnvHashMap, FnvHashSet};
use itertools::Itertools;
use log::info;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Instant;

/// Prefix of decoy protein names
pub const DECOY_PREFIX: &str = "REV__";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct ProteinIx(pub u32);

/// Evidentially indistinguishable proteins, sorted by index
#[derive(Debug, PartialEq, Eq, Hash, Clone, Default, PartialOrd, Ord)]
pub struct ProteinGroup(pub Vec<ProteinIx>);

impl ProteinGroup {
    /// Comma-joined protein names, each prefixed with [`DECOY_PREFIX`] for
    /// decoys
    pub fn name(&self, proteins: &[String], decoy: bool) -> String {
        self.0
            .iter()
            .map(|ix| {
                let name = match proteins.get(ix.0 as usize) {
                    Some(name) => name.clone(),
                    None => {
                        log::warn!("no protein name for index {}", ix.0);
                        ix.0.to_string()
                    }
                };
                match decoy {
                    true => format!("{}{}", DECOY_PREFIX, name),
                    false => name,
                }
            })
            .join(",")
    }

    pub fn indices(&self) -> String {
        self.0.iter().map(|ix| ix.0).join(",")
    }
}

/// Sequence -> candidate proteins
pub type PeptideMap = FnvHashMap<String, Vec<ProteinIx>>;

/// Protein names plus the peptide map referencing them by index
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ProteinMap {
    pub proteins: Vec<String>,
    pub peptides: PeptideMap,
}

impl ProteinMap {
    pub fn validate(&self) -> Result<(), Error> {
        for (sequence, proteins) in &self.peptides {
            if let Some(ix) = proteins
                .iter()
                .find(|ix| ix.0 as usize >= self.proteins.len())
            {
                return Err(Error::Shape(format!(
                    "peptide {} maps to protein {}, but only {} proteins exist",
                    sequence,
                    ix.0,
                    self.proteins.len()
                )));
            }
        }
        Ok(())
    }
}

/// One deduplicated peptide with its representative score
#[derive(Clone, Debug, PartialEq)]
pub struct PeptideEvidence {
    pub sequence: String,
    pub decoy: bool,
    pub score: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Assignment {
    pub group: ProteinGroup,
    /// Shared peptide credited to this group
    pub razor: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProteinAnnotation {
    pub protein: String,
    pub protein_group: String,
    pub protein_idx: String,
    pub razor: bool,
    pub decoy_protein: bool,
    pub n_possible_proteins: usize,
}

/// Shared peptides (left) and their candidate proteins (right), stored as
/// adjacency lists with local indices
struct BipartiteGraph {
    /// Row index of each shared peptide in the evidence table
    peptide_rows: Vec<usize>,
    proteins: Vec<ProteinIx>,
    peptide_edges: Vec<Vec<usize>>,
    protein_edges: Vec<Vec<usize>>,
    /// Edge weight, one per peptide
    weights: Vec<f64>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
enum Node {
    Peptide(usize),
    Protein(usize),
}

/// A connected set of peptides and proteins
#[derive(Default)]
struct Component {
    peptides: Vec<usize>,
    proteins: Vec<usize>,
}

impl Component {
    fn size(&self) -> usize {
        self.peptides.len() + self.proteins.len()
    }
}

impl BipartiteGraph {
    fn new(rows: &[PeptideEvidence], possible: &[Vec<ProteinIx>]) -> Self {
        let mut graph = BipartiteGraph {
            peptide_rows: Vec::new(),
            proteins: Vec::new(),
            peptide_edges: Vec::new(),
            protein_edges: Vec::new(),
            weights: Vec::new(),
        };
        let mut local: FnvHashMap<ProteinIx, usize> = FnvHashMap::default();

        for (row, proteins) in possible.iter().enumerate().filter(|(_, p)| p.len() > 1) {
            let peptide = graph.peptide_rows.len();
            graph.peptide_rows.push(row);
            graph.weights.push(rows[row].score);
            let mut edges = Vec::with_capacity(proteins.len());
            for &protein in proteins {
                let ix = *local.entry(protein).or_insert_with(|| {
                    graph.proteins.push(protein);
                    graph.protein_edges.push(Vec::new());
                    graph.proteins.len() - 1
                });
                graph.protein_edges[ix].push(peptide);
                edges.push(ix);
            }
            graph.peptide_edges.push(edges);
        }
        graph
    }

    /// Connected components by breadth-first search, largest first
    fn components(&self) -> Vec<Component> {
        let mut seen_peptides = vec![false; self.peptide_rows.len()];
        let mut seen_proteins = vec![false; self.proteins.len()];
        let mut components = Vec::new();

        for start in 0..self.peptide_rows.len() {
            if seen_peptides[start] {
                continue;
            }
            seen_peptides[start] = true;
            let mut component = Component::default();
            let mut queue = VecDeque::from([Node::Peptide(start)]);
            while let Some(node) = queue.pop_front() {
                match node {
                    Node::Peptide(p) => {
                        component.peptides.push(p);
                        for &q in &self.peptide_edges[p] {
                            if !seen_proteins[q] {
                                seen_proteins[q] = true;
                                queue.push_back(Node::Protein(q));
                            }
                        }
                    }
                    Node::Protein(q) => {
                        component.proteins.push(q);
                        for &p in &self.protein_edges[q] {
                            if !seen_peptides[p] {
                                seen_peptides[p] = true;
                                queue.push_back(Node::Peptide(p));
                            }
                        }
                    }
                }
            }
            components.push(component);
        }
        components.sort_by(|a, b| b.size().cmp(&a.size()));
        components
    }

    /// Greedy razor resolution of one component, returning
    /// `(evidence row, assignment)` pairs
    fn resolve(
        &self,
        component: &Component,
        unique_rows: &FnvHashMap<ProteinIx, Vec<usize>>,
    ) -> Vec<(usize, Assignment)> {
        struct Support<'a> {
            protein: usize,
            covered: Vec<usize>,
            /// Evidence rows of peptides unique to this protein
            unique: &'a [usize],
            count: usize,
            weight: f64,
        }

        let mut unresolved = component.proteins.clone();
        let mut claimed: FnvHashSet<usize> = FnvHashSet::default();
        let mut assignments = Vec::with_capacity(component.peptides.len());

        while !unresolved.is_empty() {
            let support = unresolved
                .iter()
                .map(|&protein| {
                    let covered = self.protein_edges[protein]
                        .iter()
                        .copied()
                        .filter(|p| !claimed.contains(p))
                        .sorted()
                        .collect::<Vec<_>>();
                    let unique = unique_rows
                        .get(&self.proteins[protein])
                        .map(Vec::as_slice)
                        .unwrap_or_default();
                    Support {
                        protein,
                        count: covered.len() + unique.len(),
                        unique,
                        weight: covered.iter().map(|&p| self.weights[p]).sum(),
                        covered,
                    }
                })
                .filter(|s| !s.covered.is_empty())
                .collect::<Vec<_>>();

            // Most support, then most summed evidence, then lowest index
            let best = match support.iter().max_by(|a, b| {
                a.count
                    .cmp(&b.count)
                    .then(a.weight.total_cmp(&b.weight))
                    .then(self.proteins[b.protein].cmp(&self.proteins[a.protein]))
            }) {
                Some(best) => best,
                // Every remaining protein has only claimed neighbours
                None => break,
            };

            let members = support
                .iter()
                // Identical support: same unclaimed shared and unique peptides
                .filter(|s| s.covered == best.covered && s.unique == best.unique)
                .map(|s| s.protein)
                .collect::<Vec<_>>();
            let group = ProteinGroup(
                members
                    .iter()
                    .map(|&q| self.proteins[q])
                    .sorted()
                    .collect(),
            );

            for &peptide in &best.covered {
                claimed.insert(peptide);
                assignments.push((
                    self.peptide_rows[peptide],
                    Assignment {
                        group: group.clone(),
                        razor: true,
                    },
                ));
            }
            unresolved.retain(|q| !members.contains(q));
        }
        assignments
    }
}

/// Assign every evidence row to a protein group: unique peptides directly,
/// shared peptides by the razor principle. Rows whose peptide is missing
/// from `map` stay unassigned.
pub fn razor_assignment(rows: &[PeptideEvidence], map: &PeptideMap) -> Vec<Option<Assignment>> {
    let possible = rows
        .iter()
        .map(|row| {
            map.get(&row.sequence)
                .map(|proteins| proteins.iter().copied().sorted().dedup().collect::<Vec<_>>())
                .unwrap_or_default()
        })
        .collect::<Vec<_>>();

    let missing = possible.iter().filter(|p| p.is_empty()).count();
    if missing > 0 {
        log::warn!(
            "{} peptides have no entry in the protein map and remain unassigned",
            missing
        );
    }

    let mut assignments = vec![None; rows.len()];
    let mut unique_rows: FnvHashMap<ProteinIx, Vec<usize>> = FnvHashMap::default();
    for (row, proteins) in possible.iter().enumerate() {
        if let [protein] = proteins.as_slice() {
            unique_rows.entry(*protein).or_default().push(row);
            assignments[row] = Some(Assignment {
                group: ProteinGroup(vec![*protein]),
                razor: false,
            });
        }
    }
    let shared = possible.iter().filter(|p| p.len() > 1).count();
    info!(
        "- {} unique and {} shared peptides",
        rows.len() - shared - missing,
        shared
    );

    let graph = BipartiteGraph::new(rows, &possible);
    let components = graph.components();
    info!(
        "- resolving {} shared peptides across {} proteins in {} components",
        graph.peptide_rows.len(),
        graph.proteins.len(),
        components.len()
    );

    let resolved = components
        .par_iter()
        .map(|component| graph.resolve(component, &unique_rows))
        .collect::<Vec<_>>();
    for (row, assignment) in resolved.into_iter().flatten() {
        assignments[row] = Some(assignment);
    }
    assignments
}

/// Razor assignment rendered as protein annotations; `decoy` selects decoy
/// protein naming
pub fn get_protein_groups(
    rows: &[PeptideEvidence],
    map: &PeptideMap,
    proteins: &[String],
    decoy: bool,
) -> Vec<Option<ProteinAnnotation>> {
    razor_assignment(rows, map)
        .into_iter()
        .zip(rows)
        .map(|(assignment, row)| {
            assignment.map(|assignment| {
                let name = assignment.group.name(proteins, decoy);
                ProteinAnnotation {
                    protein: name.clone(),
                    protein_group: name,
                    protein_idx: assignment.group.indices(),
                    razor: assignment.razor,
                    decoy_protein: decoy,
                    n_possible_proteins: map
                        .get(&row.sequence)
                        .map(|p| p.iter().unique().count())
                        .unwrap_or(0),
                }
            })
        })
        .collect()
}

/// Deduplicate PSMs to peptides (maximum score per sequence and decoy
/// status), group targets and decoys separately, and annotate every PSM
pub fn perform_protein_grouping(psms: &mut [Psm], map: &PeptideMap, proteins: &[String]) {
    let time = Instant::now();
    info!("Protein grouping with {} psms", psms.len());

    let mut best: [FnvHashMap<&str, f64>; 2] = Default::default();
    for psm in psms.iter() {
        let score = best[psm.decoy as usize]
            .entry(psm.sequence.as_str())
            .or_insert(f64::MIN);
        *score = score.max(psm.score);
    }

    let lookup = [false, true].map(|decoy| {
        let rows = best[decoy as usize]
            .iter()
            .map(|(sequence, &score)| PeptideEvidence {
                sequence: sequence.to_string(),
                decoy,
                score,
            })
            .sorted_by(|a, b| a.sequence.cmp(&b.sequence))
            .collect::<Vec<_>>();
        let annotations = get_protein_groups(&rows, map, proteins, decoy);
        rows.into_iter()
            .zip(annotations)
            .filter_map(|(row, annotation)| annotation.map(|a| (row.sequence, a)))
            .collect::<FnvHashMap<_, _>>()
    });

    psms.par_iter_mut().for_each(|psm| {
        psm.protein = lookup[psm.decoy as usize].get(&psm.sequence).cloned();
    });

    let annotated = psms.iter().filter(|psm| psm.protein.is_some()).count();
    info!(
        "- annotated {} of {} psms in {}ms",
        annotated,
        psms.len(),
        time.elapsed().as_millis()
    );
}
