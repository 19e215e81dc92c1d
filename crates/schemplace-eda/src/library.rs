use std::collections::HashMap;

use anyhow::{bail, Context, Result};
use schemplace_sexpr::{parse, Sexpr};

use crate::symbol::{SymbolDef, SymbolPin};

/// Parse a `.kicad_sym` library into a map of symbol name → definition.
///
/// Top-level sub-unit blocks (names ending in `_<unit>_<style>`) are
/// skipped; their pins are picked up through the parent symbol's nested
/// sections instead. A block that cannot be parsed is skipped with a
/// warning and parsing continues — a part that later references it fails
/// loudly at placement time.
pub fn parse_symbol_library(content: &str, lib_name: &str) -> Result<HashMap<String, SymbolDef>> {
    let root = parse(content).context("invalid symbol library text")?;
    let Some(items) = root.as_list() else {
        bail!("invalid KiCad symbol library format");
    };

    let mut symbols = HashMap::new();
    for item in items {
        if item.head() != Some("symbol") {
            continue;
        }
        let Some(name) = item.atom_at(1) else {
            log::warn!("skipping symbol block without a name");
            continue;
        };
        if is_subunit_name(name) {
            continue;
        }
        match parse_symbol(item, lib_name) {
            Ok(symbol) => {
                symbols.insert(symbol.name.clone(), symbol);
            }
            Err(e) => log::warn!("skipping symbol '{name}': {e}"),
        }
    }

    log::debug!("parsed {} symbols from library '{lib_name}'", symbols.len());
    Ok(symbols)
}

/// Map of `LCSC` property value → symbol name, for resolving part records
/// by catalog id.
pub fn build_lcsc_index(symbols: &HashMap<String, SymbolDef>) -> HashMap<String, String> {
    let mut index = HashMap::new();
    for (name, symbol) in symbols {
        if let Some(lcsc) = symbol.properties.get("LCSC") {
            if !lcsc.is_empty() {
                index.insert(lcsc.clone(), name.clone());
            }
        }
    }
    index
}

/// `NAME_0_1` style names are per-unit drawing sections, not symbols.
fn is_subunit_name(name: &str) -> bool {
    let mut segments = name.rsplitn(3, '_');
    let style = segments.next();
    let unit = segments.next();
    let stem = segments.next();
    matches!((style, unit, stem), (Some(a), Some(b), Some(_))
        if !a.is_empty() && !b.is_empty()
            && a.bytes().all(|c| c.is_ascii_digit())
            && b.bytes().all(|c| c.is_ascii_digit()))
}

fn parse_symbol(node: &Sexpr, lib_name: &str) -> Result<SymbolDef> {
    let name = node
        .atom_at(1)
        .context("symbol name not found")?
        .to_string();

    let mut pins: HashMap<String, SymbolPin> = HashMap::new();
    let mut properties = HashMap::new();
    let mut rectangle: Option<(f64, f64, f64, f64)> = None;

    collect_symbol_items(node, &mut pins, &mut properties, &mut rectangle);

    let (width, height, y_extent_up, y_extent_down) = extents(&pins, rectangle);

    Ok(SymbolDef {
        name,
        lib_name: lib_name.to_string(),
        pins,
        properties,
        raw: node.clone(),
        width,
        height,
        y_extent_up,
        y_extent_down,
    })
}

fn collect_symbol_items(
    node: &Sexpr,
    pins: &mut HashMap<String, SymbolPin>,
    properties: &mut HashMap<String, String>,
    rectangle: &mut Option<(f64, f64, f64, f64)>,
) {
    let Some(items) = node.as_list() else { return };
    for item in items.iter().skip(2) {
        match item.head() {
            Some("pin") => {
                if let Some(pin) = parse_pin(item) {
                    pins.insert(pin.name.clone(), pin);
                }
            }
            Some("property") => {
                if let (Some(key), Some(value)) = (item.atom_at(1), item.atom_at(2)) {
                    properties.insert(key.to_string(), value.to_string());
                }
            }
            Some("rectangle") => {
                if rectangle.is_none() {
                    *rectangle = parse_rectangle(item);
                }
            }
            Some(head) if head.starts_with("symbol") => {
                // Nested per-unit section carrying pins and body shapes
                collect_symbol_items(item, pins, properties, rectangle);
            }
            _ => {}
        }
    }
}

fn parse_pin(node: &Sexpr) -> Option<SymbolPin> {
    let electrical_type = node.atom_at(1).unwrap_or("passive").to_string();

    let at = node.child("at")?;
    let x = at.atom_at(1)?.parse::<f64>().ok()?;
    let y = at.atom_at(2)?.parse::<f64>().ok()?;
    let rotation = at
        .atom_at(3)
        .and_then(|r| r.parse::<i32>().ok())
        .unwrap_or(0);

    let length = node
        .child("length")
        .and_then(|l| l.atom_at(1))
        .and_then(|l| l.parse::<f64>().ok())
        .unwrap_or(2.54);

    let name = node.child("name")?.atom_at(1)?.to_string();
    let number = node.child("number")?.atom_at(1)?.to_string();

    Some(SymbolPin {
        name,
        number,
        x,
        y,
        rotation,
        length,
        electrical_type,
    })
}

fn parse_rectangle(node: &Sexpr) -> Option<(f64, f64, f64, f64)> {
    let start = node.child("start")?;
    let end = node.child("end")?;
    Some((
        start.atom_at(1)?.parse().ok()?,
        start.atom_at(2)?.parse().ok()?,
        end.atom_at(1)?.parse().ok()?,
        end.atom_at(2)?.parse().ok()?,
    ))
}

/// Bounding extents in symbol coordinates. Pin-derived with a fixed margin
/// when pins exist, from the body rectangle otherwise, defaulting to a
/// 20×20 square.
fn extents(
    pins: &HashMap<String, SymbolPin>,
    rectangle: Option<(f64, f64, f64, f64)>,
) -> (f64, f64, f64, f64) {
    if !pins.is_empty() {
        let xs: Vec<f64> = pins.values().map(|p| p.x).collect();
        let ys: Vec<f64> = pins.values().map(|p| p.y).collect();
        let min_x = xs.iter().cloned().fold(f64::INFINITY, f64::min);
        let max_x = xs.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let min_y = ys.iter().cloned().fold(f64::INFINITY, f64::min);
        let max_y = ys.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let width = max_x - min_x + 10.0;
        let height = max_y - min_y + 10.0;
        let y_extent_up = max_y + 5.0;
        let y_extent_down = (-min_y + 5.0).max(0.0);
        return (width, height, y_extent_up, y_extent_down);
    }

    if let Some((x1, y1, x2, y2)) = rectangle {
        let width = (x2 - x1).abs();
        let height = (y2 - y1).abs();
        let y_extent_up = y1.max(y2) + 5.0;
        let min_y = y1.min(y2);
        let y_extent_down = if min_y < 0.0 { -min_y + 5.0 } else { 0.0 };
        return (width, height, y_extent_up, y_extent_down);
    }

    (20.0, 20.0, 10.0, 10.0)
}
