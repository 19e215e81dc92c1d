//! Geometry primitives and the sheet model.
//!
//! Positions are sheet-space millimeters, Y increasing downward. Forces and
//! displacements use the separate [`Vector`] type so positions and deltas
//! cannot be mixed up.

use std::ops::{Add, Div, Mul, Sub};

/// KiCad schematic grid pitch in mm.
pub const GRID: f64 = 2.54;

/// A3 landscape sheet.
pub const SHEET_WIDTH: f64 = 420.0;
pub const SHEET_HEIGHT: f64 = 297.0;
pub const SHEET_MARGIN: f64 = 20.0;

/// Extra space kept around part bodies so label stubs never touch a
/// neighbouring part.
pub const ROUTING_CHANNEL: f64 = 5.0;

/// Strip at the bottom of the sheet reserved for decoupling capacitors.
pub const DECOUPLING_AREA_HEIGHT: f64 = 50.0;
pub const DECOUPLING_AREA_TOP: f64 = SHEET_HEIGHT - SHEET_MARGIN - DECOUPLING_AREA_HEIGHT;

/// 2D position in sheet space.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Point { x, y }
    }

    /// Snap each axis to a multiple of `grid`, rounding half away from zero.
    /// Banker's rounding would collapse adjacent half-grid values onto the
    /// same point.
    pub fn snap(self, grid: f64) -> Point {
        Point {
            x: round_half_away(self.x / grid) * grid,
            y: round_half_away(self.y / grid) * grid,
        }
    }

    pub fn snap_to_grid(self) -> Point {
        self.snap(GRID)
    }

    /// Displacement from `self` to `other`.
    pub fn vector_to(self, other: Point) -> Vector {
        Vector {
            x: other.x - self.x,
            y: other.y - self.y,
        }
    }
}

impl Add for Point {
    type Output = Point;
    fn add(self, rhs: Point) -> Point {
        Point::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Point {
    type Output = Point;
    fn sub(self, rhs: Point) -> Point {
        Point::new(self.x - rhs.x, self.y - rhs.y)
    }
}

fn round_half_away(v: f64) -> f64 {
    if v >= 0.0 {
        (v + 0.5).floor()
    } else {
        (v - 0.5).ceil()
    }
}

/// Force / displacement quantity.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector {
    pub x: f64,
    pub y: f64,
}

impl Vector {
    pub fn new(x: f64, y: f64) -> Self {
        Vector { x, y }
    }

    pub fn magnitude(self) -> f64 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    pub fn normalize(self) -> Vector {
        let mag = self.magnitude();
        if mag < 1e-3 {
            return Vector::default();
        }
        Vector::new(self.x / mag, self.y / mag)
    }
}

impl Add for Vector {
    type Output = Vector;
    fn add(self, rhs: Vector) -> Vector {
        Vector::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Vector {
    type Output = Vector;
    fn sub(self, rhs: Vector) -> Vector {
        Vector::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f64> for Vector {
    type Output = Vector;
    fn mul(self, rhs: f64) -> Vector {
        Vector::new(self.x * rhs, self.y * rhs)
    }
}

impl Div<f64> for Vector {
    type Output = Vector;
    fn div(self, rhs: f64) -> Vector {
        if rhs == 0.0 {
            return Vector::default();
        }
        Vector::new(self.x / rhs, self.y / rhs)
    }
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        BBox {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    /// Boxes that merely touch do not intersect.
    pub fn intersects(&self, other: &BBox) -> bool {
        if self.max_x <= other.min_x || other.max_x <= self.min_x {
            return false;
        }
        if self.max_y <= other.min_y || other.max_y <= self.min_y {
            return false;
        }
        true
    }
}

/// Clamp a part anchor point so the body (described by its half-width and
/// asymmetric Y extents) stays inside the sheet, optionally keeping it out
/// of the reserved decoupling strip.
pub fn constrain_to_sheet(
    pos: Point,
    allow_decoupling_area: bool,
    half_width: f64,
    y_extent_up: f64,
    y_extent_down: f64,
) -> Point {
    let x_min = SHEET_MARGIN + half_width;
    let x_max = SHEET_WIDTH - SHEET_MARGIN - half_width;
    let x = pos.x.clamp(x_min, x_max.max(x_min));

    // y_extent_up reaches toward the sheet top (smaller Y), y_extent_down
    // toward the bottom (larger Y).
    let y_min = SHEET_MARGIN + y_extent_up;
    let y_max = if allow_decoupling_area {
        SHEET_HEIGHT - SHEET_MARGIN - y_extent_down
    } else {
        DECOUPLING_AREA_TOP - y_extent_down
    };
    let y = pos.y.clamp(y_min, y_max.max(y_min));

    Point::new(x, y)
}
