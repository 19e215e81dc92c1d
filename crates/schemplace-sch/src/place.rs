//! Part placement.
//!
//! The engine runs a fixed sequence of deterministic stages: classification
//! into anchors and dependents, grid placement of anchors, directional
//! placement of dependents near the anchor pin they connect to,
//! force-directed refinement inside each group, relocation of decoupling
//! capacitors into the reserved strip, and a final overlap elimination
//! sweep. Anchor positions are frozen after the grid stage; every later
//! stage operates on movable parts only and anchors are restored verbatim
//! before the output leaves the engine.
//!
//! The jitter used to break exact symmetry comes from a fixed-seed PRNG, so
//! placement is reproducible run to run.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use itertools::Itertools;

use schemplace_eda::{scale_symbol_y, SymbolDef, MIN_PINS_FOR_SCALING};

use crate::geom::{
    constrain_to_sheet, BBox, Point, Vector, DECOUPLING_AREA_TOP, GRID, ROUTING_CHANNEL,
    SHEET_HEIGHT, SHEET_MARGIN, SHEET_WIDTH,
};
use crate::labels::pin_position;
use crate::{build_net_connections, ref_index, NetConnections, PartInstance, PartRecord};

/// Seed for the symmetry-breaking jitter. Fixed so identical input yields
/// identical output.
pub const PLACEMENT_SEED: u64 = 42;

/// Nets that mark the power side of a decoupling capacitor.
pub const POWER_NETS: &[&str] = &["+3V3", "VBAT", "VBUS", "VCC", "+5V"];

/// (speed, alpha, stability coefficient) per refinement phase. Alpha blends
/// from pure net attraction to pure overlap repulsion.
const FORCE_SCHEDULE: [(f64, f64, f64); 6] = [
    (0.4, 0.0, 0.1),
    (0.3, 0.3, 0.05),
    (0.25, 0.6, 0.02),
    (0.2, 0.85, 0.01),
    (0.15, 1.0, 0.002),
    (0.1, 1.0, 0.001),
];

/// Iteration cap per refinement phase when refining a dependent group.
const GROUP_REFINE_ITERATIONS: usize = 100;

/// A part whose symbol could not be resolved from the library.
#[derive(Debug, Clone)]
pub struct MissingSymbol {
    pub reference: String,
    pub lcsc: String,
    pub value: String,
    pub symbol_name: String,
}

/// Errors that abort placement.
#[derive(Debug, thiserror::Error)]
pub enum PlaceError {
    #[error("{}", missing_symbol_report(.0))]
    MissingSymbols(Vec<MissingSymbol>),
}

fn missing_symbol_report(missing: &[MissingSymbol]) -> String {
    let mut report = format!(
        "{} part(s) reference symbols absent from the library:\n",
        missing.len()
    );
    for m in missing {
        report.push_str(&format!(
            "  - {}: lcsc={}, value={}, symbol={}\n",
            m.reference, m.lcsc, m.value, m.symbol_name
        ));
    }
    report.push_str("fetch the missing symbols into the library, then re-run generation");
    report
}

/// Bounding box of a part, inflated by the routing channel.
pub fn part_bbox(part: &PartInstance) -> BBox {
    part_bbox_at(part, part.position)
}

fn part_bbox_at(part: &PartInstance, pos: Point) -> BBox {
    let half_w = part.symbol.width / 2.0 + ROUTING_CHANNEL;
    let up = part.symbol.y_extent_up + ROUTING_CHANNEL;
    let down = part.symbol.y_extent_down + ROUTING_CHANNEL;
    BBox::new(pos.x - half_w, pos.y - up, pos.x + half_w, pos.y + down)
}

/// Place every part record. Fails before any placement work if one or more
/// symbols cannot be resolved, reporting the complete list.
pub fn place_parts(
    records: &[PartRecord],
    symbols: &HashMap<String, SymbolDef>,
    lcsc_index: &HashMap<String, String>,
) -> Result<Vec<PartInstance>, PlaceError> {
    let mut parts = resolve_instances(records, symbols, lcsc_index)?;
    let groups = classify(records, &parts);
    if groups.anchors.is_empty() {
        log::warn!("no anchor parts; skipping placement");
        return Ok(parts);
    }

    let frozen = place_anchors(&mut parts, &groups.anchors);
    let nets = build_net_connections(&parts);
    place_dependents(&mut parts, &groups.dependents, &nets);

    let mut placer = Placer::new();
    for (anchor_idx, deps) in &groups.dependents {
        placer.refine_group(&mut parts, *anchor_idx, deps, &nets);
    }

    let decoupling_refs = place_decoupling(&mut parts);

    // Anchors return to their grid cells no matter what refinement did.
    for part in parts.iter_mut() {
        if let Some(pos) = frozen.get(&part.reference) {
            part.position = *pos;
        }
    }

    let anchor_refs: HashSet<String> = frozen.keys().cloned().collect();
    placer.eliminate_overlaps(&mut parts, &anchor_refs, &decoupling_refs);

    Ok(parts)
}

fn resolve_instances(
    records: &[PartRecord],
    symbols: &HashMap<String, SymbolDef>,
    lcsc_index: &HashMap<String, String>,
) -> Result<Vec<PartInstance>, PlaceError> {
    let mut missing = Vec::new();
    let mut templates: HashMap<String, Arc<SymbolDef>> = HashMap::new();
    let mut parts = Vec::with_capacity(records.len());

    for record in records {
        let symbol_name = if record.lcsc.is_empty() {
            record.value.clone()
        } else {
            lcsc_index
                .get(&record.lcsc)
                .cloned()
                .unwrap_or_else(|| record.value.clone())
        };

        let Some(symbol) = symbols.get(&symbol_name) else {
            missing.push(MissingSymbol {
                reference: record.reference.clone(),
                lcsc: record.lcsc.clone(),
                value: record.value.clone(),
                symbol_name,
            });
            continue;
        };

        let template = templates
            .entry(symbol_name)
            .or_insert_with(|| {
                if symbol.pins.len() >= MIN_PINS_FOR_SCALING {
                    // Double pin spacing so adjacent net labels stay apart
                    Arc::new(scale_symbol_y(symbol, 2.0))
                } else {
                    Arc::new(symbol.clone())
                }
            })
            .clone();

        parts.push(PartInstance {
            reference: record.reference.clone(),
            value: record.value.clone(),
            symbol: template,
            position: Point::new(SHEET_WIDTH / 2.0, SHEET_HEIGHT / 2.0),
            rotation: 0,
            belongs_to: record.belongs_to.clone(),
            pins: record.pins.clone(),
            lcsc: record.lcsc.clone(),
            footprint: record.footprint.clone(),
        });
    }

    if missing.is_empty() {
        Ok(parts)
    } else {
        Err(PlaceError::MissingSymbols(missing))
    }
}

struct Groups {
    anchors: Vec<usize>,
    /// Anchor slot → dependent slots, in input order.
    dependents: Vec<(usize, Vec<usize>)>,
}

fn classify(records: &[PartRecord], parts: &[PartInstance]) -> Groups {
    let mut id_to_ref = HashMap::new();
    for record in records {
        if let Some(id) = &record.id {
            id_to_ref.insert(id.clone(), record.reference.clone());
        }
    }

    let refs = ref_index(parts);
    let mut anchors = Vec::new();
    let mut grouped: BTreeMap<usize, Vec<usize>> = BTreeMap::new();

    for (idx, part) in parts.iter().enumerate() {
        let Some(parent) = &part.belongs_to else {
            anchors.push(idx);
            continue;
        };
        let parent_ref = id_to_ref
            .get(parent)
            .cloned()
            .unwrap_or_else(|| parent.clone());
        match refs.get(&parent_ref) {
            Some(&parent_idx) if parent_idx != idx => {
                grouped.entry(parent_idx).or_default().push(idx);
            }
            _ => {
                log::warn!(
                    "part {} groups under unknown parent '{parent}'; treating as anchor",
                    part.reference
                );
                anchors.push(idx);
            }
        }
    }

    log::debug!(
        "classified {} anchors, {} dependent groups",
        anchors.len(),
        grouped.len()
    );
    Groups {
        anchors,
        dependents: grouped.into_iter().collect(),
    }
}

/// Category order for anchor placement: active ICs, connectors, switches,
/// diodes, crystals, test points, then everything else.
fn category_rank(reference: &str) -> u8 {
    if reference.starts_with("SW") {
        2
    } else if reference.starts_with("TP") {
        5
    } else if reference.starts_with('U') {
        0
    } else if reference.starts_with('J') {
        1
    } else if reference.starts_with('D') {
        3
    } else if reference.starts_with('Y') {
        4
    } else {
        6
    }
}

/// Spread anchors over a near-square grid (wider than tall) above the
/// decoupling strip. Returns the frozen positions.
fn place_anchors(parts: &mut [PartInstance], anchor_idxs: &[usize]) -> BTreeMap<String, Point> {
    let order: Vec<usize> = anchor_idxs
        .iter()
        .copied()
        .sorted_by_key(|&idx| (category_rank(&parts[idx].reference), parts[idx].reference.clone()))
        .collect();

    let n = order.len();
    let cols = ((n as f64 * 1.5).sqrt().ceil() as usize).max(1);
    let rows = n.div_ceil(cols).max(1);

    let usable_width = SHEET_WIDTH - 2.0 * SHEET_MARGIN;
    let usable_height = DECOUPLING_AREA_TOP - SHEET_MARGIN;
    let cell_width = usable_width / cols as f64;
    let cell_height = usable_height / rows as f64;
    log::debug!("anchor grid {cols}x{rows}, cell {cell_width:.1}x{cell_height:.1} mm");

    let mut frozen = BTreeMap::new();
    for (slot, &idx) in order.iter().enumerate() {
        let col = slot % cols;
        let row = slot / cols;
        let x = SHEET_MARGIN + col as f64 * cell_width + cell_width / 2.0;
        let y = SHEET_MARGIN + row as f64 * cell_height + cell_height / 2.0;

        let part = &mut parts[idx];
        let half_w = part.symbol.width / 2.0 + 5.0;
        part.position = constrain_to_sheet(
            Point::new(x, y),
            false,
            half_w,
            part.symbol.y_extent_up + 5.0,
            part.symbol.y_extent_down + 5.0,
        )
        .snap_to_grid();
        frozen.insert(part.reference.clone(), part.position);
        log::debug!(
            "anchor {} at ({:.1}, {:.1})",
            part.reference,
            part.position.x,
            part.position.y
        );
    }
    frozen
}

/// Seat each dependent next to the anchor pin it shares a net with, on the
/// side the pin stem points away from; dependents without a shared net go
/// on a circle around the anchor.
fn place_dependents(
    parts: &mut [PartInstance],
    groups: &[(usize, Vec<usize>)],
    nets: &NetConnections,
) {
    for (anchor_idx, deps) in groups {
        let anchor_idx = *anchor_idx;
        let anchor_ref = parts[anchor_idx].reference.clone();
        let anchor_pos = parts[anchor_idx].position;
        let group_size = deps.len();

        for (dep_slot, &dep) in deps.iter().enumerate() {
            let mut target: Option<(Point, i32)> = None;
            'search: for (_, net_name) in &parts[dep].pins {
                if net_name.is_empty() {
                    continue;
                }
                let Some(connections) = nets.get(net_name) else {
                    continue;
                };
                for (other_ref, anchor_pin) in connections {
                    if other_ref != &anchor_ref {
                        continue;
                    }
                    let rotation = match parts[anchor_idx].symbol.pins.get(anchor_pin) {
                        Some(pin) => pin.rotation,
                        None => continue,
                    };
                    if let Some(pin_pos) = pin_position(&parts[anchor_idx], anchor_pin) {
                        target = Some((pin_pos, rotation));
                        break 'search;
                    }
                }
            }

            let candidate = match target {
                Some((pin_pos, rotation)) => {
                    // Fan siblings that land on the same side
                    let fan = ((dep_slot % 3) as f64 - 1.0) * 10.0;
                    // Stem points toward the body; the dependent goes the
                    // other way.
                    let (dx, dy) = match rotation {
                        0 => (-30.0, fan),
                        180 => (30.0, fan),
                        90 => (fan, 30.0),
                        270 => (fan, -30.0),
                        _ => (-25.0, 0.0),
                    };
                    Point::new(pin_pos.x + dx, pin_pos.y + dy)
                }
                None => {
                    let angle =
                        (360.0 / group_size.max(1) as f64) * dep_slot as f64;
                    let radius = 35.0 + (dep_slot % 2) as f64 * 10.0;
                    let rad = angle.to_radians();
                    Point::new(
                        anchor_pos.x + radius * rad.cos(),
                        anchor_pos.y + radius * rad.sin(),
                    )
                }
            };

            let part = &mut parts[dep];
            part.position = constrain_to_sheet(
                candidate,
                false,
                part.symbol.width / 2.0,
                part.symbol.y_extent_up,
                part.symbol.y_extent_down,
            )
            .snap_to_grid();
        }
    }
}

/// Decoupling capacitors — anything C-prefixed sitting on both ground and a
/// recognized power net — get their own row-major layout in the reserved
/// strip at the bottom of the sheet.
fn place_decoupling(parts: &mut [PartInstance]) -> HashSet<String> {
    let caps: Vec<usize> = parts
        .iter()
        .enumerate()
        .filter(|(_, part)| {
            if !part.reference.starts_with('C') {
                return false;
            }
            let nets: BTreeSet<&str> = part.pins.values().map(|n| n.as_str()).collect();
            nets.contains("GND") && POWER_NETS.iter().any(|p| nets.contains(p))
        })
        .map(|(idx, _)| idx)
        .collect();

    if caps.is_empty() {
        return HashSet::new();
    }
    log::debug!("{} decoupling capacitors moved to the reserved strip", caps.len());

    let per_row = caps.len().min(12);
    let spacing = 15.0;
    let start_x = SHEET_MARGIN + 20.0;
    let start_y = SHEET_HEIGHT - SHEET_MARGIN - 20.0;

    for (slot, &idx) in caps.iter().enumerate() {
        let row = slot / per_row;
        let col = slot % per_row;
        parts[idx].position = Point::new(
            start_x + col as f64 * spacing,
            start_y - row as f64 * 12.0,
        )
        .snap_to_grid();
    }

    caps.iter().map(|&idx| parts[idx].reference.clone()).collect()
}

/// Placement context holding the seeded jitter source.
struct Placer {
    rng: fastrand::Rng,
}

impl Placer {
    fn new() -> Self {
        Placer {
            rng: fastrand::Rng::with_seed(PLACEMENT_SEED),
        }
    }

    /// Force-directed refinement of one dependent group. The anchor takes
    /// part in neither attraction nor repulsion and its position is put
    /// back afterwards.
    fn refine_group(
        &mut self,
        parts: &mut [PartInstance],
        anchor_idx: usize,
        deps: &[usize],
        nets: &NetConnections,
    ) {
        if deps.len() < 2 {
            return;
        }
        let anchor_pos = parts[anchor_idx].position;

        let dep_refs: BTreeSet<&str> = deps.iter().map(|&i| parts[i].reference.as_str()).collect();
        let mut local: NetConnections = BTreeMap::new();
        for (net, connections) in nets {
            let inside: Vec<(String, String)> = connections
                .iter()
                .filter(|(r, _)| dep_refs.contains(r.as_str()))
                .cloned()
                .collect();
            if inside.len() >= 2 {
                local.insert(net.clone(), inside);
            }
        }
        if local.is_empty() {
            return;
        }

        self.force_directed(parts, deps, &local, GROUP_REFINE_ITERATIONS);
        parts[anchor_idx].position = anchor_pos;
    }

    fn force_directed(
        &mut self,
        parts: &mut [PartInstance],
        movable: &[usize],
        nets: &NetConnections,
        max_iterations: usize,
    ) {
        if movable.len() <= 1 {
            return;
        }
        let refs = ref_index(parts);

        for &(phase_speed, alpha, stability_coef) in FORCE_SCHEDULE.iter() {
            let mut speed = phase_speed;
            let mut initial_total = 0.0;
            let mut stable_threshold = -1.0;
            let mut iterations = 0;

            for _ in 0..max_iterations {
                iterations += 1;

                // Forces for this iteration come from a position snapshot:
                // all computed first, applied afterwards.
                let mut forces = Vec::with_capacity(movable.len());
                let mut total = 0.0;
                for &idx in movable {
                    let attract = net_attraction(parts, idx, nets, &refs);
                    let repel = self.overlap_force(parts, idx, movable);
                    let repel_mult = if repel.magnitude() > 10.0 { 1.5 } else { 1.0 };
                    let combined = attract * (1.0 - alpha) + repel * (alpha * repel_mult);
                    total += combined.magnitude();
                    forces.push(combined);
                }

                for (&idx, force) in movable.iter().zip(&forces) {
                    let part = &mut parts[idx];
                    let next = Point::new(
                        part.position.x + force.x * speed,
                        part.position.y + force.y * speed,
                    );
                    part.position = constrain_to_sheet(
                        next,
                        true,
                        part.symbol.width / 2.0,
                        part.symbol.y_extent_up,
                        part.symbol.y_extent_down,
                    );
                }

                if stable_threshold < 0.0 {
                    initial_total = total;
                    stable_threshold = total * stability_coef;
                } else if total <= stable_threshold {
                    break;
                } else if total > 10.0 * initial_total {
                    // Diverging; damp the step size
                    speed *= 0.5;
                }
            }
            log::trace!("refinement phase alpha={alpha}: {iterations} iterations");
        }

        for &idx in movable {
            parts[idx].position = parts[idx].position.snap_to_grid();
        }
    }

    /// Minimal single-axis translation that separates each intersecting
    /// pair, with jitter to break exact symmetry.
    fn overlap_force(&mut self, parts: &[PartInstance], idx: usize, others: &[usize]) -> Vector {
        let my_box = part_bbox(&parts[idx]);
        let mut total = Vector::default();

        for &other_idx in others {
            if other_idx == idx {
                continue;
            }
            let other_box = part_bbox(&parts[other_idx]);
            if !my_box.intersects(&other_box) {
                continue;
            }

            let move_left = other_box.min_x - my_box.max_x;
            let move_right = other_box.max_x - my_box.min_x;
            let move_up = other_box.min_y - my_box.max_y;
            let move_down = other_box.max_y - my_box.min_y;

            let jitter = Vector::new(
                self.rng.f64() * 0.5 - 0.25,
                self.rng.f64() * 0.5 - 0.25,
            );

            let candidates = [
                (move_left.abs(), Vector::new(move_left, 0.0)),
                (move_right.abs(), Vector::new(move_right, 0.0)),
                (move_up.abs(), Vector::new(0.0, move_up)),
                (move_down.abs(), Vector::new(0.0, move_down)),
            ];
            let smallest = candidates
                .iter()
                .min_by(|a, b| a.0.partial_cmp(&b.0).expect("finite translation"))
                .expect("four candidates")
                .1;
            total = total + smallest + jitter;
        }

        total
    }

    /// Deterministic overlap elimination over all movable parts, largest
    /// first. Residual overlaps are warned about, never fatal.
    fn eliminate_overlaps(
        &mut self,
        parts: &mut [PartInstance],
        anchor_refs: &HashSet<String>,
        decoupling_refs: &HashSet<String>,
    ) -> usize {
        let mut movable: Vec<usize> = (0..parts.len())
            .filter(|&idx| !anchor_refs.contains(&parts[idx].reference))
            .collect();
        movable.sort_by(|&a, &b| {
            part_bbox(&parts[b])
                .area()
                .partial_cmp(&part_bbox(&parts[a]).area())
                .expect("finite area")
        });

        for scan in 0..50 {
            let mut total_overlaps = 0;
            for &idx in &movable {
                let overlapping = count_overlaps(parts, idx);
                if overlapping == 0 {
                    continue;
                }
                total_overlaps += overlapping;
                let allow = decoupling_refs.contains(&parts[idx].reference);
                parts[idx].position =
                    find_free_position(parts, idx, parts[idx].position, 300.0, allow);
            }
            if total_overlaps == 0 {
                log::debug!("overlaps resolved after {} scans", scan + 1);
                break;
            }
        }

        // Movable parts may have drifted near the edge while separating;
        // clamp them (with label margin) and repair anything that collides
        // again.
        for &idx in &movable {
            let allow = decoupling_refs.contains(&parts[idx].reference);
            let part = &mut parts[idx];
            let half_w = part.symbol.width / 2.0 + 5.0;
            part.position = constrain_to_sheet(
                part.position,
                allow,
                half_w,
                part.symbol.y_extent_up + 5.0,
                part.symbol.y_extent_down + 5.0,
            )
            .snap_to_grid();
        }

        for _ in 0..20 {
            let mut total_overlaps = 0;
            for &idx in &movable {
                let overlapping = count_overlaps(parts, idx);
                if overlapping == 0 {
                    continue;
                }
                total_overlaps += overlapping;
                let allow = decoupling_refs.contains(&parts[idx].reference);
                let pos = find_free_position(parts, idx, parts[idx].position, 300.0, allow);
                let part = &mut parts[idx];
                let half_w = part.symbol.width / 2.0 + 5.0;
                part.position = constrain_to_sheet(
                    pos,
                    allow,
                    half_w,
                    part.symbol.y_extent_up + 5.0,
                    part.symbol.y_extent_down + 5.0,
                )
                .snap_to_grid();
            }
            if total_overlaps == 0 {
                break;
            }
        }

        let mut residual = 0;
        for i in 0..parts.len() {
            for j in (i + 1)..parts.len() {
                if part_bbox(&parts[i]).intersects(&part_bbox(&parts[j])) {
                    residual += 1;
                }
            }
        }
        if residual > 0 {
            log::warn!("{residual} overlapping part pairs remain after elimination");
        } else {
            log::debug!("all {} parts placed without overlaps", parts.len());
        }
        residual
    }
}

fn net_attraction(
    parts: &[PartInstance],
    idx: usize,
    nets: &NetConnections,
    refs: &HashMap<String, usize>,
) -> Vector {
    let me = &parts[idx];

    let mut connected: BTreeSet<&str> = BTreeSet::new();
    for connections in nets.values() {
        if connections.iter().any(|(r, _)| r == &me.reference) {
            for (r, _) in connections {
                if r != &me.reference {
                    connected.insert(r.as_str());
                }
            }
        }
    }
    if connected.is_empty() {
        return Vector::default();
    }

    let mut total = Vector::default();
    let mut count = 0usize;
    for other_ref in connected {
        if let Some(&other_idx) = refs.get(other_ref) {
            if other_idx != idx {
                total = total + me.position.vector_to(parts[other_idx].position);
                count += 1;
            }
        }
    }

    // Normalize by connection count so high-degree parts do not dominate
    if count > 0 {
        total / count as f64
    } else {
        total
    }
}

fn count_overlaps(parts: &[PartInstance], idx: usize) -> usize {
    let my_box = part_bbox(&parts[idx]);
    parts
        .iter()
        .enumerate()
        .filter(|(other_idx, other)| *other_idx != idx && my_box.intersects(&part_bbox(other)))
        .count()
}

/// Search for a collision-free position near `start`: expanding spiral
/// first (one grid unit per ring, 15° per step), coarse grid sweep as a
/// fallback. Candidates are constrained and snapped before testing; the
/// part itself is not mutated.
fn find_free_position(
    parts: &[PartInstance],
    idx: usize,
    start: Point,
    search_radius: f64,
    allow_decoupling_area: bool,
) -> Point {
    let part = &parts[idx];
    let free_at = |pos: Point| -> bool {
        let candidate = part_bbox_at(part, pos);
        parts
            .iter()
            .enumerate()
            .all(|(other_idx, other)| other_idx == idx || !candidate.intersects(&part_bbox(other)))
    };
    if free_at(start) {
        return start;
    }

    let constrain_candidate = |pos: Point| {
        constrain_to_sheet(
            pos,
            allow_decoupling_area,
            part.symbol.width / 2.0,
            part.symbol.y_extent_up,
            part.symbol.y_extent_down,
        )
        .snap_to_grid()
    };

    let mut distance = GRID;
    while distance < search_radius {
        let mut angle = 0;
        while angle < 360 {
            let rad = f64::from(angle).to_radians();
            let test = constrain_candidate(Point::new(
                start.x + distance * rad.cos(),
                start.y + distance * rad.sin(),
            ));
            if free_at(test) {
                return test;
            }
            angle += 15;
        }
        distance += GRID;
    }

    let step = GRID * 4.0;
    let mut dx = -search_radius;
    while dx < search_radius {
        let mut dy = -search_radius;
        while dy < search_radius {
            let test = constrain_candidate(Point::new(start.x + dx, start.y + dy));
            if free_at(test) {
                return test;
            }
            dy += step;
        }
        dx += step;
    }

    log::warn!(
        "no free position found for {} within {search_radius} mm",
        part.reference
    );
    start
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemplace_eda::SymbolPin;
    use schemplace_sexpr::Sexpr;

    /// Two-pin symbol template with pins on the left (rot 0) and right
    /// (rot 180) of the body, the way small passives are drawn.
    fn passive_symbol(name: &str) -> SymbolDef {
        symbol_with_pins(
            name,
            &[("1", "1", -3.81, 0.0, 0), ("2", "2", 3.81, 0.0, 180)],
        )
    }

    fn symbol_with_pins(name: &str, pins: &[(&str, &str, f64, f64, i32)]) -> SymbolDef {
        let mut map = std::collections::HashMap::new();
        for &(pin_name, number, x, y, rotation) in pins {
            map.insert(
                pin_name.to_string(),
                SymbolPin {
                    name: pin_name.to_string(),
                    number: number.to_string(),
                    x,
                    y,
                    rotation,
                    length: 2.54,
                    electrical_type: "passive".to_string(),
                },
            );
        }
        let xs: Vec<f64> = map.values().map(|p| p.x).collect();
        let ys: Vec<f64> = map.values().map(|p| p.y).collect();
        let min_x = xs.iter().cloned().fold(f64::INFINITY, f64::min);
        let max_x = xs.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let min_y = ys.iter().cloned().fold(f64::INFINITY, f64::min);
        let max_y = ys.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        SymbolDef {
            name: name.to_string(),
            lib_name: "JLCPCB".to_string(),
            pins: map,
            properties: std::collections::HashMap::new(),
            raw: Sexpr::list(vec![Sexpr::symbol("symbol"), Sexpr::string(name)]),
            width: max_x - min_x + 10.0,
            height: max_y - min_y + 10.0,
            y_extent_up: max_y + 5.0,
            y_extent_down: (-min_y + 5.0).max(0.0),
        }
    }

    fn record(reference: &str, value: &str, belongs_to: Option<&str>, pins: &[(&str, &str)]) -> PartRecord {
        PartRecord {
            id: None,
            reference: reference.to_string(),
            value: value.to_string(),
            lcsc: String::new(),
            footprint: String::new(),
            belongs_to: belongs_to.map(String::from),
            pins: pins
                .iter()
                .map(|(p, n)| (p.to_string(), n.to_string()))
                .collect(),
        }
    }

    fn library() -> HashMap<String, SymbolDef> {
        let mut symbols = HashMap::new();
        symbols.insert(
            "MCU".to_string(),
            symbol_with_pins(
                "MCU",
                &[("P1", "1", -7.62, 0.0, 0), ("P2", "2", 7.62, 0.0, 180)],
            ),
        );
        symbols.insert("CAP".to_string(), passive_symbol("CAP"));
        symbols.insert("RES".to_string(), passive_symbol("RES"));
        symbols
    }

    #[test]
    fn missing_symbols_abort_with_complete_list() {
        let records = vec![
            record("U1", "NOPE", None, &[]),
            record("U2", "ALSO_MISSING", None, &[]),
        ];
        let err = place_parts(&records, &library(), &HashMap::new()).unwrap_err();
        let PlaceError::MissingSymbols(missing) = err;
        assert_eq!(missing.len(), 2);
        let text = PlaceError::MissingSymbols(missing).to_string();
        assert!(text.contains("U1"));
        assert!(text.contains("ALSO_MISSING"));
    }

    #[test]
    fn every_final_position_is_on_grid() {
        let records = vec![
            record("U1", "MCU", None, &[("P1", "GND")]),
            record("C1", "CAP", Some("U1"), &[("1", "GND"), ("2", "N1")]),
            record("R1", "RES", Some("U1"), &[("1", "N1"), ("2", "GND")]),
            record("U2", "MCU", None, &[]),
        ];
        let parts = place_parts(&records, &library(), &HashMap::new()).unwrap();
        for part in &parts {
            assert_eq!(
                part.position,
                part.position.snap_to_grid(),
                "{} is off-grid",
                part.reference
            );
        }
    }

    #[test]
    fn anchors_keep_their_grid_cells_when_dependents_are_added() {
        let anchors_only = vec![
            record("U1", "MCU", None, &[("P1", "GND")]),
            record("U2", "MCU", None, &[]),
        ];
        let with_deps = vec![
            record("U1", "MCU", None, &[("P1", "GND")]),
            record("U2", "MCU", None, &[]),
            record("R1", "RES", Some("U1"), &[("1", "GND"), ("2", "A")]),
            record("R2", "RES", Some("U1"), &[("1", "A"), ("2", "B")]),
            record("R3", "RES", Some("U1"), &[("1", "B"), ("2", "GND")]),
        ];
        let lib = library();
        let a = place_parts(&anchors_only, &lib, &HashMap::new()).unwrap();
        let b = place_parts(&with_deps, &lib, &HashMap::new()).unwrap();
        for reference in ["U1", "U2"] {
            let pa = a.iter().find(|p| p.reference == reference).unwrap().position;
            let pb = b.iter().find(|p| p.reference == reference).unwrap().position;
            assert_eq!(pa, pb, "anchor {reference} moved");
        }
    }

    #[test]
    fn placement_is_deterministic() {
        let records = vec![
            record("U1", "MCU", None, &[("P1", "SIG_A"), ("P2", "SIG_B")]),
            record("U2", "MCU", None, &[("P1", "SIG_B")]),
            record("R1", "RES", Some("U1"), &[("1", "SIG_A"), ("2", "X")]),
            record("R2", "RES", Some("U1"), &[("1", "X"), ("2", "SIG_A")]),
            record("R3", "RES", Some("U1"), &[("1", "SIG_A"), ("2", "Y")]),
            record("C1", "CAP", Some("U2"), &[("1", "SIG_B"), ("2", "Z")]),
        ];
        let lib = library();
        let first = place_parts(&records, &lib, &HashMap::new()).unwrap();
        let second = place_parts(&records, &lib, &HashMap::new()).unwrap();
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.reference, b.reference);
            assert_eq!(a.position, b.position, "{} diverged", a.reference);
        }
    }

    #[test]
    fn grouped_part_lands_beside_its_anchor() {
        let records = vec![
            record("U1", "MCU", None, &[("P1", "GND")]),
            record("C1", "CAP", Some("U1"), &[("1", "GND"), ("2", "NET_X")]),
            record("U2", "MCU", None, &[("P1", "OTHER")]),
        ];
        let parts = place_parts(&records, &library(), &HashMap::new()).unwrap();
        let find = |r: &str| parts.iter().find(|p| p.reference == r).unwrap();
        let (u1, c1, u2) = (find("U1"), find("C1"), find("U2"));

        // Distinct grid cells for the two anchors
        assert_ne!(u1.position, u2.position);

        // P1 has rotation 0 (stem points right, into the body), so the
        // dependent goes to the left of the pin — the directional offset,
        // not the radial fallback.
        assert!(c1.position.x < u1.position.x, "C1 not left of U1");
        let d1 = u1.position.vector_to(c1.position).magnitude();
        let d2 = u2.position.vector_to(c1.position).magnitude();
        assert!(d1 < d2, "C1 closer to unrelated anchor");

        // No overlaps anywhere
        for i in 0..parts.len() {
            for j in (i + 1)..parts.len() {
                assert!(
                    !part_bbox(&parts[i]).intersects(&part_bbox(&parts[j])),
                    "{} overlaps {}",
                    parts[i].reference,
                    parts[j].reference
                );
            }
        }
    }

    #[test]
    fn no_overlaps_after_full_run() {
        let mut records = vec![record("U1", "MCU", None, &[("P1", "BUS")])];
        for i in 1..=9 {
            records.push(record(
                &format!("R{i}"),
                "RES",
                Some("U1"),
                &[("1", "BUS"), ("2", &format!("N{i}"))],
            ));
        }
        let parts = place_parts(&records, &library(), &HashMap::new()).unwrap();
        for i in 0..parts.len() {
            for j in (i + 1)..parts.len() {
                assert!(
                    !part_bbox(&parts[i]).intersects(&part_bbox(&parts[j])),
                    "{} overlaps {}",
                    parts[i].reference,
                    parts[j].reference
                );
            }
        }
    }

    #[test]
    fn decoupling_caps_go_to_the_reserved_strip() {
        let records = vec![
            record("U1", "MCU", None, &[("P1", "VCC"), ("P2", "GND")]),
            record("C1", "CAP", Some("U1"), &[("1", "VCC"), ("2", "GND")]),
            record("C2", "CAP", Some("U1"), &[("1", "SIG"), ("2", "GND")]),
        ];
        let parts = place_parts(&records, &library(), &HashMap::new()).unwrap();
        let find = |r: &str| parts.iter().find(|p| p.reference == r).unwrap();
        assert!(
            find("C1").position.y > DECOUPLING_AREA_TOP,
            "decoupling cap not in the strip"
        );
        // C2 is on GND only — not a decoupling cap
        assert!(find("C2").position.y < DECOUPLING_AREA_TOP);
    }

    #[test]
    fn unknown_parent_promotes_to_anchor() {
        let records = vec![
            record("U1", "MCU", None, &[]),
            record("R1", "RES", Some("GHOST"), &[]),
        ];
        let parts = place_parts(&records, &library(), &HashMap::new()).unwrap();
        // Promoted anchors get their own grid cell, away from U1
        let find = |r: &str| parts.iter().find(|p| p.reference == r).unwrap();
        assert_ne!(find("U1").position, find("R1").position);
    }
}
