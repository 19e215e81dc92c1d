use std::collections::HashMap;

use schemplace_sexpr::Sexpr;

/// Pin geometry from a symbol definition, in the symbol's own frame
/// (Y increases upward). `(x, y)` is the connection point — the tip of the
/// pin — and `rotation` is the direction the stem points toward the body.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolPin {
    pub name: String,
    pub number: String,
    pub x: f64,
    pub y: f64,
    /// 0 = stem points right, 90 = up, 180 = left, 270 = down.
    pub rotation: i32,
    pub length: f64,
    pub electrical_type: String,
}

/// A parsed, immutable symbol template shared by all part instances of the
/// same type.
#[derive(Debug, Clone)]
pub struct SymbolDef {
    pub name: String,
    pub lib_name: String,
    /// Keyed by pin name.
    pub pins: HashMap<String, SymbolPin>,
    pub properties: HashMap<String, String>,
    /// Original parse tree, retained for embedding in the output document.
    pub raw: Sexpr,
    pub width: f64,
    pub height: f64,
    /// How far the drawn body extends above the origin, in symbol coords.
    /// Asymmetric because symbols are not centered on their origin.
    pub y_extent_up: f64,
    pub y_extent_down: f64,
}

impl SymbolDef {
    /// Minimal template with default extents and no pins.
    pub fn placeholder(name: &str, lib_name: &str) -> Self {
        SymbolDef {
            name: name.to_string(),
            lib_name: lib_name.to_string(),
            pins: HashMap::new(),
            properties: HashMap::new(),
            raw: Sexpr::list(vec![]),
            width: 20.0,
            height: 20.0,
            y_extent_up: 10.0,
            y_extent_down: 10.0,
        }
    }
}

/// Scale pin Y positions by `scale`, recomputing the body rectangle from the
/// points where pins enter the body and rotating the Value property 90° so
/// it no longer collides with the stretched pin rows. Returns a new template;
/// the input is untouched.
pub fn scale_symbol_y(symbol: &SymbolDef, scale: f64) -> SymbolDef {
    let mut pins = HashMap::new();
    for (name, pin) in &symbol.pins {
        pins.insert(
            name.clone(),
            SymbolPin {
                y: pin.y * scale,
                ..pin.clone()
            },
        );
    }

    // The body edge sits where pins enter it: connection point displaced by
    // the stem length along the pin direction. Horizontal pins enter at
    // their own Y.
    let (box_top, box_bottom) = if pins.is_empty() {
        (symbol.height / 2.0, -symbol.height / 2.0)
    } else {
        let mut max_y = f64::NEG_INFINITY;
        let mut min_y = f64::INFINITY;
        for pin in pins.values() {
            let entry_y = match pin.rotation {
                90 => pin.y + pin.length,
                270 => pin.y - pin.length,
                _ => pin.y,
            };
            max_y = max_y.max(entry_y);
            min_y = min_y.min(entry_y);
        }
        (max_y, min_y)
    };

    let mut raw = symbol.raw.clone();
    scale_tree(&mut raw, scale, box_top, box_bottom);

    let (y_extent_up, y_extent_down) = if pins.is_empty() {
        (symbol.y_extent_up * scale, symbol.y_extent_down * scale)
    } else {
        let ys: Vec<f64> = pins.values().map(|p| p.y).collect();
        let max = ys.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let min = ys.iter().cloned().fold(f64::INFINITY, f64::min);
        (max + 5.0, (-min + 5.0).max(0.0))
    };

    SymbolDef {
        name: symbol.name.clone(),
        lib_name: symbol.lib_name.clone(),
        pins,
        properties: symbol.properties.clone(),
        raw,
        width: symbol.width,
        height: box_top - box_bottom,
        y_extent_up,
        y_extent_down,
    }
}

fn scale_tree(node: &mut Sexpr, scale: f64, box_top: f64, box_bottom: f64) {
    let head = node.head().map(|h| h.to_string());
    let Some(items) = node.as_list_mut() else {
        return;
    };

    match head.as_deref() {
        Some("pin") => {
            if let Some(at) = items.iter_mut().find(|i| i.head() == Some("at")) {
                scale_at_y(at, scale);
            }
        }
        Some("rectangle") => {
            set_list_y(items, "start", box_top);
            set_list_y(items, "end", box_bottom);
        }
        Some("property") => {
            let is_value = items.get(1).and_then(|i| i.as_atom()) == Some("Value");
            if is_value {
                if let Some(at) = items.iter_mut().find(|i| i.head() == Some("at")) {
                    rotate_at(at, 90);
                }
            }
        }
        _ => {
            for item in items.iter_mut().skip(1) {
                scale_tree(item, scale, box_top, box_bottom);
            }
        }
    }
}

fn scale_at_y(at: &mut Sexpr, scale: f64) {
    if let Some(items) = at.as_list_mut() {
        let scaled = items
            .get(2)
            .and_then(|i| i.as_atom())
            .and_then(|a| a.parse::<f64>().ok())
            .map(|y| y * scale);
        if let (Some(y), Some(slot)) = (scaled, items.get_mut(2)) {
            *slot = Sexpr::symbol(fmt_mm(y));
        }
    }
}

fn rotate_at(at: &mut Sexpr, angle: i32) {
    if let Some(items) = at.as_list_mut() {
        if let Some(slot) = items.get_mut(3) {
            *slot = Sexpr::symbol(angle.to_string());
        }
    }
}

fn set_list_y(items: &mut [Sexpr], child: &str, y: f64) {
    if let Some(point) = items.iter_mut().find(|i| i.head() == Some(child)) {
        if let Some(point_items) = point.as_list_mut() {
            if let Some(slot) = point_items.get_mut(2) {
                *slot = Sexpr::symbol(fmt_mm(y));
            }
        }
    }
}

pub(crate) fn fmt_mm(v: f64) -> String {
    let text = format!("{v:.4}");
    text.trim_end_matches('0').trim_end_matches('.').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse_symbol_library;

    const SOT23: &str = r#"(kicad_symbol_lib
	(symbol "XC6206" (in_bom yes) (on_board yes)
		(property "Reference" "U" (at 0 8 0))
		(property "Value" "XC6206" (at 0 -8 0))
		(property "LCSC" "C5446" (at 0 0 0))
		(symbol "XC6206_0_1"
			(rectangle (start -5.08 5.08) (end 5.08 -5.08))
		)
		(symbol "XC6206_1_1"
			(pin power_in line (at -7.62 2.54 0) (length 2.54) (name "VIN" (effects (font (size 1.27 1.27)))) (number "3" (effects (font (size 1.27 1.27)))))
			(pin power_in line (at 0 -7.62 90) (length 2.54) (name "GND" (effects (font (size 1.27 1.27)))) (number "1" (effects (font (size 1.27 1.27)))))
			(pin power_out line (at 7.62 2.54 180) (length 2.54) (name "VOUT" (effects (font (size 1.27 1.27)))) (number "2" (effects (font (size 1.27 1.27)))))
		)
	)
)"#;

    fn sample() -> SymbolDef {
        let symbols = parse_symbol_library(SOT23, "JLCPCB").unwrap();
        symbols.get("XC6206").cloned().unwrap()
    }

    #[test]
    fn scaling_doubles_pin_y() {
        let scaled = scale_symbol_y(&sample(), 2.0);
        assert_eq!(scaled.pins["GND"].y, -15.24);
        assert_eq!(scaled.pins["VIN"].y, 5.08);
        // X positions untouched
        assert_eq!(scaled.pins["VIN"].x, -7.62);
    }

    #[test]
    fn scaling_updates_raw_tree_and_extents() {
        let scaled = scale_symbol_y(&sample(), 2.0);
        let rendered = scaled.raw.to_string();
        // Pin at-nodes carry the scaled Y
        assert!(rendered.contains("(at 0 -15.24 90)"), "{rendered}");
        // Value property rotated out of the pin rows
        assert!(rendered.contains("(at 0 -8 90)"), "{rendered}");
        assert!(scaled.y_extent_up >= 10.08);
        assert!(scaled.y_extent_down >= 20.0);
    }

    #[test]
    fn scaling_rebuilds_body_from_pin_entry_points() {
        let scaled = scale_symbol_y(&sample(), 2.0);
        let rendered = scaled.raw.to_string();
        // Bottom pin (rot 90, y -15.24, len 2.54) enters the body at -12.7
        assert!(rendered.contains("(end 5.08 -12.7)"), "{rendered}");
    }
}
