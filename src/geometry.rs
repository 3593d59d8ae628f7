use serde::{Deserialize, Serialize};

/**
 * A point in the horizontal plane
 */
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

// ============================================================================
impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Point { x, y }
    }

    pub fn distance(&self, other: Point) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    pub fn midpoint(&self, other: Point) -> Point {
        Point::new(0.5 * (self.x + other.x), 0.5 * (self.y + other.y))
    }
}

/**
 * Signed area of the triangle (a, b, c); positive when the vertices are
 * ordered counter-clockwise.
 */
pub fn signed_area(a: Point, b: Point, c: Point) -> f64 {
    0.5 * ((b.x - a.x) * (c.y - a.y) - (c.x - a.x) * (b.y - a.y))
}

pub fn centroid(a: Point, b: Point, c: Point) -> Point {
    Point::new((a.x + b.x + c.x) / 3.0, (a.y + b.y + c.y) / 3.0)
}

/**
 * Distance from p to the infinite line through a and b.
 */
pub fn distance_to_line(p: Point, a: Point, b: Point) -> f64 {
    let length = a.distance(b);

    if length == 0.0 {
        p.distance(a)
    } else {
        (2.0 * signed_area(a, b, p)).abs() / length
    }
}
