//! Indented writer for the KiCad S-expression grammar.
//!
//! The writer exposes the three block primitives the schematic generator
//! needs: [`SexpWriter::open`] starts an indented block, [`SexpWriter::atom`]
//! writes a one-line block and [`SexpWriter::close`] ends the current block.
//! Parsed [`Sexpr`] trees can be re-emitted through [`SexpWriter::tree`],
//! re-indented to the writer's canonical unit (one tab).

use crate::{escape_string, Sexpr};

/// Unquoted keywords of the target grammar. Anything else that is not
/// numeric gets quoted.
const KEYWORDS: &[&str] = &[
    "yes",
    "no",
    "default",
    "none",
    "left",
    "right",
    "top",
    "bottom",
    "center",
    "hide",
    "input",
    "output",
    "bidirectional",
    "passive",
    "power_in",
    "power_out",
    "open_collector",
    "open_emitter",
    "unconnected",
    "unspecified",
    "line",
    "inverted",
    "clock",
];

/// A single argument of an `open`/`atom` call.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Text(String),
    Float(f64),
    Int(i64),
    Bool(bool),
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Arg::Text(value.to_string())
    }
}

impl From<String> for Arg {
    fn from(value: String) -> Self {
        Arg::Text(value)
    }
}

impl From<f64> for Arg {
    fn from(value: f64) -> Self {
        Arg::Float(value)
    }
}

impl From<i64> for Arg {
    fn from(value: i64) -> Self {
        Arg::Int(value)
    }
}

impl From<i32> for Arg {
    fn from(value: i32) -> Self {
        Arg::Int(value as i64)
    }
}

impl From<bool> for Arg {
    fn from(value: bool) -> Self {
        Arg::Bool(value)
    }
}

impl Arg {
    fn render(&self) -> String {
        match self {
            Arg::Text(s) => {
                if s.starts_with('"') || is_keyword(s) || is_numeric_literal(s) {
                    s.clone()
                } else {
                    format!("\"{}\"", escape_string(s))
                }
            }
            Arg::Bool(true) => "yes".to_string(),
            Arg::Bool(false) => "no".to_string(),
            Arg::Float(v) => format_float(*v),
            Arg::Int(v) => v.to_string(),
        }
    }
}

fn is_keyword(s: &str) -> bool {
    KEYWORDS.contains(&s)
}

/// Matches `-?digits[.digits]` — an atom that is already a numeric literal
/// and must not be quoted.
fn is_numeric_literal(s: &str) -> bool {
    let rest = s.strip_prefix('-').unwrap_or(s);
    let mut halves = rest.splitn(2, '.');
    let int_part = halves.next().unwrap_or("");
    let frac_part = halves.next();
    !int_part.is_empty()
        && int_part.bytes().all(|b| b.is_ascii_digit())
        && frac_part.map_or(true, |f| f.bytes().all(|b| b.is_ascii_digit()))
}

/// Four decimals, trailing zeros and a dangling dot trimmed.
fn format_float(v: f64) -> String {
    let text = format!("{v:.4}");
    let text = text.trim_end_matches('0').trim_end_matches('.');
    text.to_string()
}

/// Line-oriented S-expression writer with tab indentation.
#[derive(Debug, Default)]
pub struct SexpWriter {
    lines: Vec<String>,
    depth: usize,
}

impl SexpWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open an indented block: `(name args...` followed by children.
    pub fn open<I>(&mut self, name: &str, args: I)
    where
        I: IntoIterator<Item = Arg>,
    {
        let rendered = self.render_head(name, args);
        self.push_line(rendered);
        self.depth += 1;
    }

    /// Write a complete one-line block: `(name args...)`.
    pub fn atom<I>(&mut self, name: &str, args: I)
    where
        I: IntoIterator<Item = Arg>,
    {
        let mut rendered = self.render_head(name, args);
        rendered.push(')');
        self.push_line(rendered);
    }

    /// Close the block most recently opened with [`SexpWriter::open`].
    pub fn close(&mut self) {
        debug_assert!(self.depth > 0, "close() without matching open()");
        self.depth = self.depth.saturating_sub(1);
        self.push_line(")".to_string());
    }

    /// Re-emit a parsed tree at the current depth, canonically indented.
    /// Short well-known forms stay on one line; everything else opens an
    /// indented block per nested list.
    pub fn tree(&mut self, sexpr: &Sexpr) {
        match sexpr {
            Sexpr::Symbol(s) => self.push_line(s.clone()),
            Sexpr::String(s) => self.push_line(format!("\"{}\"", escape_string(s))),
            Sexpr::List(items) => {
                if items.is_empty() {
                    self.push_line("()".to_string());
                    return;
                }
                if inline_form(items) {
                    self.push_line(render_inline(items));
                    return;
                }
                // Leading atoms share the opening line; child lists and any
                // trailing atoms each get their own.
                let split = items
                    .iter()
                    .position(|i| matches!(i, Sexpr::List(_)))
                    .unwrap_or(items.len());
                let head: Vec<String> = items[..split].iter().map(render_node).collect();
                self.push_line(format!("({}", head.join(" ")));
                self.depth += 1;
                for item in &items[split..] {
                    self.tree(item);
                }
                self.depth -= 1;
                self.push_line(")".to_string());
            }
        }
    }

    pub fn finish(self) -> String {
        let mut out = self.lines.join("\n");
        out.push('\n');
        out
    }

    fn render_head<I>(&self, name: &str, args: I) -> String
    where
        I: IntoIterator<Item = Arg>,
    {
        let mut parts = vec![name.to_string()];
        parts.extend(args.into_iter().map(|a| a.render()));
        format!("({}", parts.join(" "))
    }

    fn push_line(&mut self, text: String) {
        self.lines.push(format!("{}{}", "\t".repeat(self.depth), text));
    }
}

/// Forms that read better on a single line.
fn inline_form(items: &[Sexpr]) -> bool {
    if let Some(Sexpr::Symbol(head)) = items.first() {
        match head.as_str() {
            "at" | "xy" | "size" | "diameter" | "width" | "type" | "shape" | "length"
            | "offset" | "fields_autoplaced" => return true,
            "color" if items.len() == 5 => return true,
            "font" if items.len() == 2 => return true,
            "justify" if items.len() <= 3 => return true,
            "lib_id" | "uuid" | "reference" | "unit" | "page" | "path" | "title" | "date"
            | "paper"
                if items.len() == 2 =>
            {
                return true
            }
            "in_bom" | "on_board" | "dnp" | "hide" | "exclude_from_sim" if items.len() <= 2 => {
                return true
            }
            _ => {}
        }
    }
    items.len() <= 2 && items.iter().all(|item| !matches!(item, Sexpr::List(_)))
}

fn render_inline(items: &[Sexpr]) -> String {
    let parts: Vec<String> = items.iter().map(render_node).collect();
    format!("({})", parts.join(" "))
}

fn render_node(sexpr: &Sexpr) -> String {
    match sexpr {
        Sexpr::Symbol(s) => s.clone(),
        Sexpr::String(s) => format!("\"{}\"", escape_string(s)),
        Sexpr::List(items) => render_inline(items),
    }
}
