//! Automatic schematic placement and KiCad 9 (.kicad_sch) generation.
//!
//! The pipeline takes a list of part records (reference, value, catalog id,
//! pin → net connections, optional parent grouping) plus a parsed symbol
//! library, computes non-overlapping grid-aligned positions for every part,
//! and emits a complete schematic document. Connections are rendered as
//! short label stubs instead of routed wires: a long wire that happens to
//! cross an unrelated pin's exact coordinate would be merged into that
//! pin's net by the consuming tool, while fixed-length stubs make such
//! crossings geometrically impossible.
//!
//! Everything is single-threaded and deterministic: the only randomness is
//! a fixed-seed jitter used to break geometric symmetry, so two runs on
//! identical input produce byte-identical output.

pub mod geom;
pub mod labels;
pub mod place;
pub mod schematic;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use geom::Point;
use schemplace_eda::SymbolDef;

/// An input part record as produced by the upstream pipeline steps.
/// Validated once at this boundary; downstream code assumes completeness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartRecord {
    /// Semantic id used by `belongs_to` references; optional.
    #[serde(default)]
    pub id: Option<String>,
    /// Reference designator, e.g. `U1`.
    #[serde(rename = "ref")]
    pub reference: String,
    #[serde(default)]
    pub value: String,
    /// External catalog id used to resolve the symbol template.
    #[serde(default)]
    pub lcsc: String,
    #[serde(default)]
    pub footprint: String,
    /// Names the `id` (or ref) of the part this one groups under.
    #[serde(default)]
    pub belongs_to: Option<String>,
    /// Pin name → net name.
    #[serde(default)]
    pub pins: BTreeMap<String, String>,
}

/// Errors raised while loading part records.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("invalid parts document: {0}")]
    Json(#[from] serde_json::Error),
    #[error("part record {0} has an empty ref")]
    EmptyRef(usize),
    #[error("duplicate part ref '{0}'")]
    DuplicateRef(String),
}

/// Load and validate part records from a JSON array.
pub fn parts_from_json(text: &str) -> Result<Vec<PartRecord>, ModelError> {
    let records: Vec<PartRecord> = serde_json::from_str(text)?;
    let mut seen = std::collections::HashSet::new();
    for (index, record) in records.iter().enumerate() {
        if record.reference.is_empty() {
            return Err(ModelError::EmptyRef(index));
        }
        if !seen.insert(record.reference.clone()) {
            return Err(ModelError::DuplicateRef(record.reference.clone()));
        }
    }
    log::debug!("loaded {} part records", records.len());
    Ok(records)
}

/// A placed occurrence of a symbol. Created once per input record with a
/// placeholder position, repositioned by the placement stages, never
/// destroyed.
#[derive(Debug, Clone)]
pub struct PartInstance {
    pub reference: String,
    pub value: String,
    /// Shared, read-only template.
    pub symbol: Arc<SymbolDef>,
    pub position: Point,
    pub rotation: i32,
    pub belongs_to: Option<String>,
    pub pins: BTreeMap<String, String>,
    pub lcsc: String,
    pub footprint: String,
}

/// Net name → connected `(ref, pin name)` pairs, ordered for deterministic
/// iteration.
pub type NetConnections = BTreeMap<String, Vec<(String, String)>>;

/// Collect every named connection from the placed parts.
pub fn build_net_connections(parts: &[PartInstance]) -> NetConnections {
    let mut nets: NetConnections = BTreeMap::new();
    for part in parts {
        for (pin_name, net_name) in &part.pins {
            if net_name.is_empty() {
                continue;
            }
            nets.entry(net_name.clone())
                .or_default()
                .push((part.reference.clone(), pin_name.clone()));
        }
    }
    nets
}

/// Index of part reference → slot in the instance list.
pub(crate) fn ref_index(parts: &[PartInstance]) -> HashMap<String, usize> {
    parts
        .iter()
        .enumerate()
        .map(|(idx, part)| (part.reference.clone(), idx))
        .collect()
}
