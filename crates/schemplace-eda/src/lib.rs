//! KiCad symbol library parsing.
//!
//! Converts `.kicad_sym` library text into [`SymbolDef`] templates carrying
//! pin geometry, bounding extents and the raw parse tree for re-emission
//! into a generated schematic.

mod library;
mod symbol;

pub use library::{build_lcsc_index, parse_symbol_library};
pub use symbol::{scale_symbol_y, SymbolDef, SymbolPin};

/// Pins this many or more trigger Y-spacing scaling so net labels on
/// adjacent pins stay readable.
pub const MIN_PINS_FOR_SCALING: usize = 3;
