//! Small geometric value types shared by the octree and the LAS header.

/// A triplet of f64, used for scales, offsets and world coordinates.
#[derive(Debug, Default, Copy, Clone, PartialEq)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// The default coordinate scale of a freshly configured file.
    pub const fn default_scale() -> Self {
        Self::new(0.01, 0.01, 0.01)
    }

    pub const fn default_offset() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }
}

impl From<(f64, f64, f64)> for Vector3 {
    fn from((x, y, z): (f64, f64, f64)) -> Self {
        Self::new(x, y, z)
    }
}

/// An axis-aligned box with closed intervals on all three axes.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Bounds {
    pub min: Vector3,
    pub max: Vector3,
}

impl Bounds {
    pub const fn new(min: Vector3, max: Vector3) -> Self {
        Self { min, max }
    }

    /// A degenerate box at the origin, nothing but the origin fits in it.
    pub const fn zero() -> Self {
        Self::new(Vector3::new(0.0, 0.0, 0.0), Vector3::new(0.0, 0.0, 0.0))
    }

    /// The box every other box is within.
    pub const fn everything() -> Self {
        Self::new(
            Vector3::new(f64::MIN, f64::MIN, f64::MIN),
            Vector3::new(f64::MAX, f64::MAX, f64::MAX),
        )
    }

    /// A box covering `(x_min, y_min)..(x_max, y_max)` with an unbounded
    /// z range, the usual shape of a map-view query.
    pub const fn from_2d(x_min: f64, y_min: f64, x_max: f64, y_max: f64) -> Self {
        Self::new(
            Vector3::new(x_min, y_min, f64::MIN),
            Vector3::new(x_max, y_max, f64::MAX),
        )
    }

    pub fn contains(&self, point: Vector3) -> bool {
        point.x >= self.min.x
            && point.x <= self.max.x
            && point.y >= self.min.y
            && point.y <= self.max.y
            && point.z >= self.min.z
            && point.z <= self.max.z
    }

    /// `self` entirely inside `other`. `within` implies `intersects`.
    pub fn within(&self, other: &Bounds) -> bool {
        self.min.x >= other.min.x
            && self.max.x <= other.max.x
            && self.min.y >= other.min.y
            && self.max.y <= other.max.y
            && self.min.z >= other.min.z
            && self.max.z <= other.max.z
    }

    pub fn intersects(&self, other: &Bounds) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_within_implies_intersects() {
        let outer = Bounds::new(Vector3::new(-10.0, -10.0, -5.0), Vector3::new(10.0, 10.0, 5.0));
        let steps = [-10.0, -5.0, 0.0, 2.5, 5.0];
        for &x in &steps {
            for &y in &steps {
                for &z in &steps {
                    let b = Bounds::new(
                        Vector3::new(x, y, z),
                        Vector3::new(x + 4.0, y + 4.0, z + 2.0),
                    );
                    if b.within(&outer) {
                        assert!(b.intersects(&outer));
                    }
                }
            }
        }
    }

    #[test]
    fn test_touching_boxes_intersect() {
        let a = Bounds::new(Vector3::new(0.0, 0.0, 0.0), Vector3::new(1.0, 1.0, 1.0));
        let b = Bounds::new(Vector3::new(1.0, 1.0, 1.0), Vector3::new(2.0, 2.0, 2.0));
        assert!(a.intersects(&b));
        assert!(!a.within(&b));
    }

    #[test]
    fn test_zero_and_everything() {
        let zero = Bounds::zero();
        assert!(zero.contains(Vector3::default()));
        assert!(!zero.contains(Vector3::new(0.1, 0.0, 0.0)));
        assert!(zero.within(&Bounds::everything()));
    }

    #[test]
    fn test_2d_box_ignores_z() {
        let b = Bounds::from_2d(0.0, 0.0, 10.0, 10.0);
        assert!(b.contains(Vector3::new(5.0, 5.0, 1e9)));
        assert!(!b.contains(Vector3::new(11.0, 5.0, 0.0)));
    }
}
