//! Pin coordinates and net-label geometry.
//!
//! Nets are rendered as a short stub from each pin plus a text label, never
//! as routed wires between parts. The stub leaves the pin in the direction
//! opposite the stem (away from the body) so the label sits clear of the
//! symbol.

use std::collections::BTreeMap;

use crate::geom::Point;
use crate::{NetConnections, PartInstance};

/// Stub length: one grid unit.
pub const STUB_LENGTH: f64 = 2.54;

/// Character budget for net labels; longer names are shortened.
pub const MAX_LABEL_LENGTH: usize = 10;

/// Absolute sheet coordinate of a pin on a placed part.
///
/// The symbol frame is Y-up, the sheet frame is Y-down, so the pin's local
/// Y is negated — exactly once, and the result is never snapped: the
/// consuming tool requires stub endpoints at exact pin positions.
pub fn pin_position(part: &PartInstance, pin_name: &str) -> Option<Point> {
    let pin = part.symbol.pins.get(pin_name)?;
    Some(Point::new(
        part.position.x + pin.x,
        part.position.y - pin.y,
    ))
}

/// One labelled connection point of a net.
#[derive(Debug, Clone)]
pub struct NetEndpoint {
    pub reference: String,
    pub pin_name: String,
    pub position: Point,
    /// Rotation of the pin stem (toward the body).
    pub rotation: i32,
}

/// Resolve each net's connections to concrete endpoints. Nets with fewer
/// than two resolvable endpoints are dropped; connections naming a pin the
/// symbol does not have are skipped with a warning.
pub fn collect_net_endpoints(
    parts: &[PartInstance],
    nets: &NetConnections,
) -> BTreeMap<String, Vec<NetEndpoint>> {
    let refs = crate::ref_index(parts);
    let mut endpoints: BTreeMap<String, Vec<NetEndpoint>> = BTreeMap::new();

    for (net_name, connections) in nets {
        if connections.len() < 2 {
            log::debug!("net '{net_name}' has fewer than two members; no label emitted");
            continue;
        }
        let mut resolved = Vec::new();
        for (reference, pin_name) in connections {
            let Some(&idx) = refs.get(reference) else {
                continue;
            };
            let part = &parts[idx];
            let Some(pin) = part.symbol.pins.get(pin_name) else {
                log::warn!(
                    "net '{net_name}' names pin '{pin_name}' which {} ({}) does not have; skipped",
                    reference,
                    part.symbol.name
                );
                continue;
            };
            let position = Point::new(part.position.x + pin.x, part.position.y - pin.y);
            resolved.push(NetEndpoint {
                reference: reference.clone(),
                pin_name: pin_name.clone(),
                position,
                rotation: pin.rotation,
            });
        }
        if resolved.len() >= 2 {
            endpoints.insert(net_name.clone(), resolved);
        }
    }

    endpoints
}

/// Stub end point and label orientation for a pin with the given stem
/// rotation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StubGeometry {
    pub end: Point,
    pub angle: i32,
    pub justify: &'static str,
    pub vjustify: &'static str,
}

/// The stem points toward the body, so the stub extends the opposite way.
/// Sheet Y grows downward: a pin entering the body from below (rot 90) gets
/// its stub and label below the part.
pub fn stub_for(rotation: i32, origin: Point) -> StubGeometry {
    match rotation {
        0 => StubGeometry {
            end: Point::new(origin.x - STUB_LENGTH, origin.y),
            angle: 0,
            justify: "right",
            vjustify: "bottom",
        },
        180 => StubGeometry {
            end: Point::new(origin.x + STUB_LENGTH, origin.y),
            angle: 0,
            justify: "left",
            vjustify: "bottom",
        },
        90 => StubGeometry {
            end: Point::new(origin.x, origin.y + STUB_LENGTH),
            angle: 90,
            justify: "right",
            vjustify: "bottom",
        },
        270 => StubGeometry {
            end: Point::new(origin.x, origin.y - STUB_LENGTH),
            angle: 90,
            justify: "left",
            vjustify: "bottom",
        },
        other => {
            log::warn!("unexpected pin rotation {other}; defaulting stub to the right");
            StubGeometry {
                end: Point::new(origin.x + STUB_LENGTH, origin.y),
                angle: 0,
                justify: "left",
                vjustify: "bottom",
            }
        }
    }
}

/// Map full net names to label names within the character budget. Collisions
/// after truncation are disambiguated with a two-digit suffix; the mapping
/// is used for every emission of that net's label.
pub fn shorten_net_names<'a>(names: impl IntoIterator<Item = &'a str>) -> BTreeMap<String, String> {
    let mut mapping = BTreeMap::new();
    let mut used = std::collections::BTreeSet::new();

    for net in names {
        let mut short: String = if net.chars().count() <= MAX_LABEL_LENGTH {
            net.to_string()
        } else {
            net.chars().take(MAX_LABEL_LENGTH).collect()
        };

        if used.contains(&short) {
            let base: String = short.chars().take(MAX_LABEL_LENGTH - 2).collect();
            for i in 1..100 {
                let candidate = format!("{base}{i:02}");
                if !used.contains(&candidate) {
                    short = candidate;
                    break;
                }
            }
        }

        used.insert(short.clone());
        mapping.insert(net.to_string(), short);
    }

    mapping
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::Point;
    use crate::PartInstance;
    use schemplace_eda::{SymbolDef, SymbolPin};
    use schemplace_sexpr::Sexpr;
    use std::collections::{BTreeMap, HashMap};
    use std::sync::Arc;

    fn part_at(x: f64, y: f64) -> PartInstance {
        let mut pins = HashMap::new();
        pins.insert(
            "A".to_string(),
            SymbolPin {
                name: "A".to_string(),
                number: "1".to_string(),
                x: 3.0,
                y: 5.0,
                rotation: 0,
                length: 2.54,
                electrical_type: "passive".to_string(),
            },
        );
        PartInstance {
            reference: "U1".to_string(),
            value: "X".to_string(),
            symbol: Arc::new(SymbolDef {
                name: "X".to_string(),
                lib_name: "JLCPCB".to_string(),
                pins,
                properties: HashMap::new(),
                raw: Sexpr::list(vec![]),
                width: 20.0,
                height: 20.0,
                y_extent_up: 10.0,
                y_extent_down: 10.0,
            }),
            position: Point::new(x, y),
            rotation: 0,
            belongs_to: None,
            pins: BTreeMap::new(),
            lcsc: String::new(),
            footprint: String::new(),
        }
    }

    #[test]
    fn pin_position_flips_y_exactly_once() {
        let part = part_at(100.0, 100.0);
        let pos = pin_position(&part, "A").unwrap();
        assert_eq!(pos, Point::new(103.0, 95.0));
    }

    #[test]
    fn pin_position_is_never_snapped() {
        let part = part_at(100.3, 99.9);
        let pos = pin_position(&part, "A").unwrap();
        assert_eq!(pos, Point::new(103.3, 94.9));
    }

    #[test]
    fn unknown_pin_yields_none() {
        assert!(pin_position(&part_at(0.0, 0.0), "NOPE").is_none());
    }

    #[test]
    fn stub_runs_opposite_the_stem() {
        let origin = Point::new(10.0, 10.0);
        assert_eq!(stub_for(0, origin).end, Point::new(10.0 - STUB_LENGTH, 10.0));
        assert_eq!(stub_for(180, origin).end, Point::new(10.0 + STUB_LENGTH, 10.0));
        // rot 90: stem points up (symbol frame), stub goes down the sheet
        assert_eq!(stub_for(90, origin).end, Point::new(10.0, 10.0 + STUB_LENGTH));
        assert_eq!(stub_for(270, origin).end, Point::new(10.0, 10.0 - STUB_LENGTH));
        assert_eq!(stub_for(0, origin).justify, "right");
        assert_eq!(stub_for(180, origin).justify, "left");
        assert_eq!(stub_for(90, origin).angle, 90);
    }

    #[test]
    fn long_names_are_shortened_uniquely() {
        let mapping = shorten_net_names(["VERY_LONG_NET_NAME_A", "VERY_LONG_NET_NAME_B"]);
        let a = &mapping["VERY_LONG_NET_NAME_A"];
        let b = &mapping["VERY_LONG_NET_NAME_B"];
        assert!(a.chars().count() <= MAX_LABEL_LENGTH);
        assert!(b.chars().count() <= MAX_LABEL_LENGTH);
        assert_ne!(a, b);
    }

    #[test]
    fn short_names_pass_through() {
        let mapping = shorten_net_names(["GND", "+3V3"]);
        assert_eq!(mapping["GND"], "GND");
        assert_eq!(mapping["+3V3"], "+3V3");
    }
}
