//! KiCad 9 schematic (.kicad_sch) generation.
//!
//! Assembles the output document in the order the consuming tool expects:
//! header, title block, embedded library symbols, no-connect markers, label
//! stubs, placed symbol instances, power-flag instances and the sheet
//! trailer. Element uuids are derived from a fixed namespace and a counter
//! so identical input produces a byte-identical document.

use std::collections::{BTreeMap, HashMap, HashSet};

use uuid::Uuid;

use schemplace_eda::SymbolDef;
use schemplace_sexpr::{parse, Arg, Sexpr, SexpWriter};

use crate::geom::{Point, SHEET_MARGIN};
use crate::labels::{
    collect_net_endpoints, pin_position, shorten_net_names, stub_for, NetEndpoint,
};
use crate::place::{place_parts, PlaceError, POWER_NETS};
use crate::{build_net_connections, ref_index, PartInstance, PartRecord};

const SCHEMA_VERSION: i64 = 20250114;

/// Title-block metadata. `date` is emitted as-is when set; otherwise the
/// current date is used, which makes the output day-dependent — pin it for
/// reproducible pipelines.
#[derive(Debug, Clone)]
pub struct SchematicMeta {
    pub title: String,
    pub date: Option<String>,
    pub revision: String,
}

impl Default for SchematicMeta {
    fn default() -> Self {
        SchematicMeta {
            title: "Generated Schematic".to_string(),
            date: None,
            revision: "1.0".to_string(),
        }
    }
}

/// Deterministic uuid source: v5 from a namespace derived from the document
/// title plus a running counter.
pub struct UuidSeq {
    namespace: Uuid,
    counter: u64,
}

impl UuidSeq {
    pub fn new(tag: &str) -> Self {
        UuidSeq {
            namespace: Uuid::new_v5(&Uuid::NAMESPACE_OID, tag.as_bytes()),
            counter: 0,
        }
    }

    pub fn next_id(&mut self) -> String {
        let id = Uuid::new_v5(&self.namespace, self.counter.to_string().as_bytes());
        self.counter += 1;
        id.to_string()
    }
}

/// Write a generated document to disk.
pub fn write_schematic_file(content: &str, path: &std::path::Path) -> std::io::Result<()> {
    std::fs::write(path, content)
}

/// Place the records and emit the complete schematic document.
pub fn generate(
    records: &[PartRecord],
    symbols: &HashMap<String, SymbolDef>,
    lcsc_index: &HashMap<String, String>,
    meta: &SchematicMeta,
) -> Result<String, PlaceError> {
    let parts = place_parts(records, symbols, lcsc_index)?;
    let nets = build_net_connections(&parts);
    let endpoints = collect_net_endpoints(&parts, &nets);
    Ok(write_schematic(&parts, &endpoints, meta))
}

/// Serialize placed parts and resolved net endpoints.
pub fn write_schematic(
    parts: &[PartInstance],
    endpoints: &BTreeMap<String, Vec<NetEndpoint>>,
    meta: &SchematicMeta,
) -> String {
    let short_names = shorten_net_names(endpoints.keys().map(|n| n.as_str()));
    let flag_nets = power_flag_nets(parts, endpoints);
    let date = meta
        .date
        .clone()
        .unwrap_or_else(|| chrono::Local::now().format("%Y-%m-%d").to_string());

    let mut uuids = UuidSeq::new(&meta.title);
    let root_uuid = uuids.next_id();

    let mut w = SexpWriter::new();
    w.open("kicad_sch", []);
    w.atom("version", [Arg::from(SCHEMA_VERSION)]);
    w.atom("generator", [Arg::from("eeschema")]);
    w.atom("generator_version", [Arg::from("\"9.0\"")]);
    w.atom("uuid", [Arg::from(root_uuid.clone())]);
    w.atom("paper", [Arg::from("A3")]);

    w.open("title_block", []);
    w.atom("title", [Arg::from(meta.title.as_str())]);
    w.atom("date", [Arg::from(date)]);
    w.atom("rev", [Arg::from(format!("\"{}\"", meta.revision))]);
    w.atom("comment", [Arg::from(1), Arg::from("Generated by schemplace")]);
    w.close();

    // Embedded library symbols, one per lib_id actually used
    w.open("lib_symbols", []);
    let mut embedded = HashSet::new();
    for part in parts {
        let lib_id = format!("{}:{}", part.symbol.lib_name, part.symbol.name);
        let has_body = part.symbol.raw.as_list().is_some_and(|l| !l.is_empty());
        if has_body && embedded.insert(lib_id.clone()) {
            let tree = embedded_symbol_tree(&part.symbol, &lib_id);
            w.tree(&tree);
        }
    }
    if !flag_nets.is_empty() {
        let flag = parse(PWR_FLAG_TEMPLATE).expect("built-in PWR_FLAG template parses");
        w.tree(&flag);
    }
    w.close();

    // No-connect markers for symbol pins absent from any net
    for pos in no_connect_positions(parts) {
        w.open("no_connect", []);
        w.atom("at", [Arg::from(pos.x), Arg::from(pos.y)]);
        w.atom("uuid", [Arg::from(uuids.next_id())]);
        w.close();
    }

    // Label stubs: a short wire from each pin plus the (shortened) net name
    for (net_name, net_endpoints) in endpoints {
        let label = short_names.get(net_name).cloned().unwrap_or_else(|| net_name.clone());
        for endpoint in net_endpoints {
            let stub = stub_for(endpoint.rotation, endpoint.position);

            w.open("wire", []);
            w.open("pts", []);
            w.atom(
                "xy",
                [Arg::from(endpoint.position.x), Arg::from(endpoint.position.y)],
            );
            w.atom("xy", [Arg::from(stub.end.x), Arg::from(stub.end.y)]);
            w.close();
            w.open("stroke", []);
            w.atom("width", [Arg::from(0)]);
            w.atom("type", [Arg::from("default")]);
            w.close();
            w.atom("uuid", [Arg::from(uuids.next_id())]);
            w.close();

            w.open("label", [Arg::from(label.as_str())]);
            w.atom(
                "at",
                [
                    Arg::from(stub.end.x),
                    Arg::from(stub.end.y),
                    Arg::from(stub.angle),
                ],
            );
            w.open("effects", []);
            w.open("font", []);
            w.atom("size", [Arg::from(1.27), Arg::from(1.27)]);
            w.close();
            w.atom("justify", [Arg::from(stub.justify), Arg::from(stub.vjustify)]);
            w.close();
            w.atom("uuid", [Arg::from(uuids.next_id())]);
            w.close();
        }
    }

    // Placed part instances
    for part in parts {
        emit_symbol_instance(&mut w, part, &root_uuid, &mut uuids);
    }

    // Power flags for nets with no power-output pin anywhere in the design
    emit_power_flags(&mut w, &flag_nets, &short_names, &root_uuid, &mut uuids);

    w.open("sheet_instances", []);
    w.open("path", [Arg::from("/")]);
    w.atom("page", [Arg::from("\"1\"")]);
    w.close();
    w.close();

    w.atom("embedded_fonts", [Arg::from("no")]);
    w.close();

    w.finish()
}

/// Recognized power nets; only these ever receive a power flag.
fn is_power_net(net: &str) -> bool {
    net == "GND" || POWER_NETS.contains(&net)
}

/// Power nets whose members include no `power_out` pin need an explicit
/// flag so the consuming tool's ERC sees them as driven. In practice this
/// is ground; supply rails normally have a regulator or connector output
/// pin on them.
fn power_flag_nets(
    parts: &[PartInstance],
    endpoints: &BTreeMap<String, Vec<NetEndpoint>>,
) -> Vec<String> {
    let refs = ref_index(parts);
    endpoints
        .iter()
        .filter(|(net, _)| is_power_net(net))
        .filter(|(_, eps)| {
            !eps.iter().any(|ep| {
                refs.get(&ep.reference)
                    .and_then(|&idx| parts[idx].symbol.pins.get(&ep.pin_name))
                    .map(|pin| pin.electrical_type == "power_out")
                    .unwrap_or(false)
            })
        })
        .map(|(net, _)| net.clone())
        .collect()
}

fn no_connect_positions(parts: &[PartInstance]) -> Vec<Point> {
    let mut positions = Vec::new();
    for part in parts {
        let mut names: Vec<&String> = part.symbol.pins.keys().collect();
        names.sort();
        for name in names {
            if part.pins.contains_key(name) {
                continue;
            }
            if let Some(pos) = pin_position(part, name) {
                positions.push(pos);
            }
        }
    }
    positions
}

/// Re-emit the parsed symbol under its fully-qualified id, normalizing the
/// two legacy boolean properties into the current ordered triple directly
/// after the name.
fn embedded_symbol_tree(symbol: &SymbolDef, lib_id: &str) -> Sexpr {
    let mut tree = symbol.raw.clone();
    let Some(items) = tree.as_list_mut() else {
        return tree;
    };

    let mut in_bom = "yes".to_string();
    let mut on_board = "yes".to_string();
    items.retain(|item| match item.head() {
        Some("in_bom") => {
            if let Some(value) = item.atom_at(1) {
                in_bom = value.to_string();
            }
            false
        }
        Some("on_board") => {
            if let Some(value) = item.atom_at(1) {
                on_board = value.to_string();
            }
            false
        }
        _ => true,
    });

    if items.len() >= 2 {
        items[1] = Sexpr::string(lib_id);
    }
    let insert_at = 2.min(items.len());
    items.insert(
        insert_at,
        Sexpr::list(vec![Sexpr::symbol("on_board"), Sexpr::symbol(on_board)]),
    );
    items.insert(
        insert_at,
        Sexpr::list(vec![Sexpr::symbol("in_bom"), Sexpr::symbol(in_bom)]),
    );
    items.insert(
        insert_at,
        Sexpr::list(vec![Sexpr::symbol("exclude_from_sim"), Sexpr::symbol("no")]),
    );

    tree
}

fn emit_symbol_instance(
    w: &mut SexpWriter,
    part: &PartInstance,
    root_uuid: &str,
    uuids: &mut UuidSeq,
) {
    let lib_id = format!("{}:{}", part.symbol.lib_name, part.symbol.name);
    let (x, y) = (part.position.x, part.position.y);

    w.open("symbol", []);
    w.atom("lib_id", [Arg::from(lib_id)]);
    w.atom("at", [Arg::from(x), Arg::from(y), Arg::from(part.rotation)]);
    w.atom("unit", [Arg::from(1)]);
    w.atom("exclude_from_sim", [Arg::from("no")]);
    w.atom("in_bom", [Arg::from("yes")]);
    w.atom("on_board", [Arg::from("yes")]);
    w.atom("dnp", [Arg::from("no")]);
    w.atom("uuid", [Arg::from(uuids.next_id())]);

    emit_property(w, "Reference", &part.reference, x, y - 5.0, false);
    emit_property(w, "Value", &part.value, x, y + 5.0, false);
    emit_property(w, "Footprint", &part.footprint, x, y, true);
    emit_property(w, "LCSC", &part.lcsc, x, y, true);

    let mut pins: Vec<_> = part.symbol.pins.values().collect();
    pins.sort_by(|a, b| a.number.cmp(&b.number).then(a.name.cmp(&b.name)));
    for pin in pins {
        w.open("pin", [Arg::from(format!("\"{}\"", pin.number))]);
        w.atom("uuid", [Arg::from(uuids.next_id())]);
        w.close();
    }

    w.open("instances", []);
    w.open("project", [Arg::from("")]);
    w.open("path", [Arg::from(format!("/{root_uuid}"))]);
    w.atom("reference", [Arg::from(part.reference.as_str())]);
    w.atom("unit", [Arg::from(1)]);
    w.close();
    w.close();
    w.close();

    w.close();
}

fn emit_property(w: &mut SexpWriter, key: &str, value: &str, x: f64, y: f64, hide: bool) {
    w.open("property", [Arg::from(key), Arg::from(value)]);
    w.atom("at", [Arg::from(x), Arg::from(y), Arg::from(0)]);
    w.open("effects", []);
    w.open("font", []);
    w.atom("size", [Arg::from(1.27), Arg::from(1.27)]);
    w.close();
    if hide {
        w.atom("hide", [Arg::from("yes")]);
    }
    w.close();
    w.close();
}

fn emit_power_flags(
    w: &mut SexpWriter,
    flag_nets: &[String],
    short_names: &BTreeMap<String, String>,
    root_uuid: &str,
    uuids: &mut UuidSeq,
) {
    let start_x = SHEET_MARGIN + 30.0;
    let y = SHEET_MARGIN + 10.0;
    let spacing = 25.0;

    for (idx, net_name) in flag_nets.iter().enumerate() {
        let x = start_x + idx as f64 * spacing;
        let reference = format!("#FLG{:02}", idx + 1);

        // Rotated 180 so the pin points down toward its label stub
        w.open("symbol", []);
        w.atom("lib_id", [Arg::from("power:PWR_FLAG")]);
        w.atom("at", [Arg::from(x), Arg::from(y), Arg::from(180)]);
        w.atom("unit", [Arg::from(1)]);
        w.atom("exclude_from_sim", [Arg::from("no")]);
        w.atom("in_bom", [Arg::from("no")]);
        w.atom("on_board", [Arg::from("yes")]);
        w.atom("dnp", [Arg::from("no")]);
        w.atom("uuid", [Arg::from(uuids.next_id())]);

        emit_property(w, "Reference", &reference, x, y - 5.0, true);
        emit_property(w, "Value", "PWR_FLAG", x, y - 7.0, false);
        emit_property(w, "Footprint", "", x, y, true);

        w.open("pin", [Arg::from("\"1\"")]);
        w.atom("uuid", [Arg::from(uuids.next_id())]);
        w.close();

        w.open("instances", []);
        w.open("project", [Arg::from("")]);
        w.open("path", [Arg::from(format!("/{root_uuid}"))]);
        w.atom("reference", [Arg::from(reference.as_str())]);
        w.atom("unit", [Arg::from(1)]);
        w.close();
        w.close();
        w.close();

        w.close();

        // Stub from the flag pin down to its net label
        let stub_end = y + 5.08;
        w.open("wire", []);
        w.open("pts", []);
        w.atom("xy", [Arg::from(x), Arg::from(y)]);
        w.atom("xy", [Arg::from(x), Arg::from(stub_end)]);
        w.close();
        w.open("stroke", []);
        w.atom("width", [Arg::from(0)]);
        w.atom("type", [Arg::from("default")]);
        w.close();
        w.atom("uuid", [Arg::from(uuids.next_id())]);
        w.close();

        let label = short_names
            .get(net_name)
            .cloned()
            .unwrap_or_else(|| net_name.clone());
        w.open("label", [Arg::from(label)]);
        w.atom("at", [Arg::from(x), Arg::from(stub_end), Arg::from(270)]);
        w.open("effects", []);
        w.open("font", []);
        w.atom("size", [Arg::from(1.27), Arg::from(1.27)]);
        w.close();
        w.atom("justify", [Arg::from("left")]);
        w.close();
        w.atom("uuid", [Arg::from(uuids.next_id())]);
        w.close();
    }
}

const PWR_FLAG_TEMPLATE: &str = r##"(symbol "power:PWR_FLAG"
	(power)
	(pin_numbers hide)
	(pin_names (offset 0) hide)
	(exclude_from_sim no)
	(in_bom no)
	(on_board yes)
	(property "Reference" "#FLG" (at 0 1.905 0) (effects (font (size 1.27 1.27)) hide))
	(property "Value" "PWR_FLAG" (at 0 3.81 0) (effects (font (size 1.27 1.27))))
	(property "Footprint" "" (at 0 0 0) (effects (font (size 1.27 1.27)) hide))
	(property "Datasheet" "" (at 0 0 0) (effects (font (size 1.27 1.27)) hide))
	(property "Description" "" (at 0 0 0) (effects (font (size 1.27 1.27)) hide))
	(symbol "PWR_FLAG_0_0"
		(pin power_out line (at 0 0 90) (length 0)
			(name "pwr" (effects (font (size 1.27 1.27))))
			(number "1" (effects (font (size 1.27 1.27))))
		)
	)
	(symbol "PWR_FLAG_0_1"
		(polyline
			(pts (xy 0 0) (xy 0 1.27) (xy -1.016 1.905) (xy 0 2.54) (xy 1.016 1.905) (xy 0 1.27))
			(stroke (width 0) (type default))
			(fill (type none))
		)
	)
)"##;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_sequence_is_deterministic_and_unique() {
        let mut a = UuidSeq::new("Test");
        let mut b = UuidSeq::new("Test");
        let first = a.next_id();
        assert_eq!(first, b.next_id());
        assert_ne!(first, a.next_id());

        let mut other = UuidSeq::new("Other title");
        assert_ne!(first, other.next_id());
    }

    #[test]
    fn pwr_flag_template_parses() {
        let tree = parse(PWR_FLAG_TEMPLATE).unwrap();
        assert_eq!(tree.head(), Some("symbol"));
        assert_eq!(tree.atom_at(1), Some("power:PWR_FLAG"));
    }

    #[test]
    fn embedded_symbol_normalizes_legacy_booleans() {
        let raw = parse(r#"(symbol "XC6206" (in_bom no) (property "Reference" "U") (on_board yes))"#)
            .unwrap();
        let symbol = SymbolDef {
            raw,
            ..SymbolDef::placeholder("XC6206", "JLCPCB")
        };
        let tree = embedded_symbol_tree(&symbol, "JLCPCB:XC6206");
        let items = tree.as_list().unwrap();
        assert_eq!(items[1], Sexpr::string("JLCPCB:XC6206"));
        assert_eq!(items[2].head(), Some("exclude_from_sim"));
        assert_eq!(items[3].head(), Some("in_bom"));
        assert_eq!(items[3].atom_at(1), Some("no"));
        assert_eq!(items[4].head(), Some("on_board"));
        assert_eq!(items[4].atom_at(1), Some("yes"));
        // The property block survives, after the normalized triple
        assert_eq!(items[5].head(), Some("property"));
    }
}
