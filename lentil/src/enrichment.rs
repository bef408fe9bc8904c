//! Input side of a gene-set enrichment collaborator

use crate::markers::MarkerTable;

/// Marker genes to test against a background universe
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnrichmentRequest {
    pub genes: Vec<Box<str>>,
    pub universe: Vec<Box<str>>,
}

impl EnrichmentRequest {
    /// Collect unique marker genes with adjusted p-value at most
    /// `max_p_adj` (and positive effect if `only_pos`), in table order
    pub fn from_markers(
        table: &MarkerTable,
        universe: &[Box<str>],
        max_p_adj: f64,
        only_pos: bool,
    ) -> Self {
        let mut seen = fnv::FnvHashSet::default();
        let genes = table
            .records
            .iter()
            .filter(|r| r.p_value_adj <= max_p_adj && (!only_pos || r.effect_size > 0.0))
            .filter(|r| seen.insert(r.gene.clone()))
            .map(|r| r.gene.clone())
            .collect();

        Self {
            genes,
            universe: universe.to_vec(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct EnrichmentTerm {
    pub term_id: Box<str>,
    pub description: Box<str>,
    pub p_value: f64,
    pub genes: Vec<Box<str>>,
}

/// A service that tests gene lists for over-represented annotation
/// terms. No implementation ships with this crate.
pub trait EnrichmentService {
    fn enrich(&self, request: &EnrichmentRequest) -> anyhow::Result<Vec<EnrichmentTerm>>;
}
