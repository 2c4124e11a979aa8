//! Voxel keys, the coordinates of the implicit octree.

use std::fmt;
use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::geometry::{Bounds, Vector3};
use crate::info::CopcInfo;
use crate::las::LasHeader;

/// The address of a voxel: an octree depth and three cell indices.
///
/// A key is valid when `0 <= x, y, z < 2^d`. Two sentinels exist:
/// [`VoxelKey::ROOT`] addresses the whole octree cube and
/// [`VoxelKey::INVALID`] marks the absence of a voxel.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct VoxelKey {
    pub d: i32,
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl VoxelKey {
    pub const ROOT: VoxelKey = VoxelKey::new(0, 0, 0, 0);
    pub const INVALID: VoxelKey = VoxelKey::new(-1, -1, -1, -1);

    /// Trees deeper than this are rejected, `1 << d` must stay well away
    /// from the i32 coordinate range.
    pub const MAX_DEPTH: i32 = 30;

    pub const fn new(d: i32, x: i32, y: i32, z: i32) -> Self {
        Self { d, x, y, z }
    }

    pub fn is_valid(&self) -> bool {
        if self.d < 0 || self.d > Self::MAX_DEPTH {
            return false;
        }
        let side = 1i64 << self.d;
        [self.x, self.y, self.z]
            .iter()
            .all(|&c| c >= 0 && (c as i64) < side)
    }

    /// The key one level up, [`VoxelKey::INVALID`] for the root and for
    /// sentinel inputs.
    pub fn parent(&self) -> VoxelKey {
        if !self.is_valid() || self.d == 0 {
            return VoxelKey::INVALID;
        }
        VoxelKey::new(self.d - 1, self.x >> 1, self.y >> 1, self.z >> 1)
    }

    /// The eight sub-voxels, empty for sentinel inputs and at the depth cap.
    pub fn children(&self) -> Vec<VoxelKey> {
        if !self.is_valid() || self.d == Self::MAX_DEPTH {
            return Vec::new();
        }
        let mut children = Vec::with_capacity(8);
        for i in 0..8 {
            children.push(VoxelKey::new(
                self.d + 1,
                self.x * 2 + (i & 1),
                self.y * 2 + ((i >> 1) & 1),
                self.z * 2 + ((i >> 2) & 1),
            ));
        }
        children
    }

    /// Strict: a key is not its own ancestor.
    pub fn is_ancestor_of(&self, other: &VoxelKey) -> bool {
        if !self.is_valid() || !other.is_valid() || other.d <= self.d {
            return false;
        }
        let shift = other.d - self.d;
        self.x == other.x >> shift && self.y == other.y >> shift && self.z == other.z >> shift
    }

    pub fn is_child_of(&self, other: &VoxelKey) -> bool {
        other.is_ancestor_of(self)
    }

    /// The world-axis-aligned box of the voxel.
    ///
    /// The octree cube starts at the header `min` with a side equal to the
    /// longest header extent; every depth halves the step.
    pub fn bounds(&self, header: &LasHeader) -> Bounds {
        let step = header.span() / f64::from(1u32 << self.d.clamp(0, Self::MAX_DEPTH));
        let min = Vector3::new(
            header.min.x + step * f64::from(self.x),
            header.min.y + step * f64::from(self.y),
            header.min.z + step * f64::from(self.z),
        );
        Bounds::new(min, Vector3::new(min.x + step, min.y + step, min.z + step))
    }

    /// The point spacing a node at depth `d` is expected to have.
    pub fn resolution_at_depth(d: i32, info: &CopcInfo) -> f64 {
        info.spacing / f64::from(1u32 << d.clamp(0, Self::MAX_DEPTH))
    }

    pub fn resolution(&self, info: &CopcInfo) -> f64 {
        Self::resolution_at_depth(self.d, info)
    }

    pub fn within(&self, header: &LasHeader, other: &Bounds) -> bool {
        self.bounds(header).within(other)
    }

    pub fn intersects(&self, header: &LasHeader, other: &Bounds) -> bool {
        self.bounds(header).intersects(other)
    }

    pub fn read_from<R: Read>(src: &mut R) -> std::io::Result<Self> {
        Ok(Self {
            d: src.read_i32::<LittleEndian>()?,
            x: src.read_i32::<LittleEndian>()?,
            y: src.read_i32::<LittleEndian>()?,
            z: src.read_i32::<LittleEndian>()?,
        })
    }

    pub fn write_to<W: Write>(&self, dst: &mut W) -> std::io::Result<()> {
        dst.write_i32::<LittleEndian>(self.d)?;
        dst.write_i32::<LittleEndian>(self.x)?;
        dst.write_i32::<LittleEndian>(self.y)?;
        dst.write_i32::<LittleEndian>(self.z)?;
        Ok(())
    }
}

impl fmt::Display for VoxelKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}-{}-{}-{}", self.d, self.x, self.y, self.z)
    }
}

impl From<(i32, i32, i32, i32)> for VoxelKey {
    fn from((d, x, y, z): (i32, i32, i32, i32)) -> Self {
        Self::new(d, x, y, z)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn header_with(min: (f64, f64, f64), max: (f64, f64, f64)) -> LasHeader {
        let mut header = LasHeader::default();
        header.min = Vector3::new(min.0, min.1, min.2);
        header.max = Vector3::new(max.0, max.1, max.2);
        header
    }

    #[test]
    fn test_validity() {
        assert!(VoxelKey::ROOT.is_valid());
        assert!(!VoxelKey::INVALID.is_valid());
        assert!(VoxelKey::new(1, 1, 1, 1).is_valid());
        assert!(!VoxelKey::new(1, 2, 0, 0).is_valid());
        assert!(!VoxelKey::new(0, 0, 0, 1).is_valid());
        assert!(!VoxelKey::new(-2, 0, 0, 0).is_valid());
        // coordinates are fine for d=31 but the depth cap rejects the key
        assert!(!VoxelKey::new(31, 0, 0, 0).is_valid());
        assert!(VoxelKey::new(30, (1 << 30) - 1, 0, 0).is_valid());
    }

    #[test]
    fn test_parent_and_children_roundtrip() {
        for d in 1..6 {
            for x in 0..(1 << d) {
                let key = VoxelKey::new(d, x, (1 << d) - 1 - x, x / 2);
                assert!(key.is_valid());
                let parent = key.parent();
                assert!(parent.is_valid());
                assert!(parent.children().contains(&key));
                assert!(parent.is_ancestor_of(&key));
                assert!(key.is_child_of(&parent));
            }
        }
    }

    #[test]
    fn test_parent_of_root_and_sentinels() {
        assert_eq!(VoxelKey::ROOT.parent(), VoxelKey::INVALID);
        assert_eq!(VoxelKey::INVALID.parent(), VoxelKey::INVALID);
        assert!(VoxelKey::INVALID.children().is_empty());
    }

    #[test]
    fn test_ancestor_is_strict() {
        let key = VoxelKey::new(2, 3, 1, 0);
        assert!(!key.is_ancestor_of(&key));
        assert!(VoxelKey::ROOT.is_ancestor_of(&key));
        assert!(!key.is_ancestor_of(&VoxelKey::ROOT));
        assert!(!VoxelKey::new(1, 0, 0, 0).is_ancestor_of(&key));
        assert!(VoxelKey::new(1, 1, 0, 0).is_ancestor_of(&key));
    }

    #[test]
    fn test_bounds_follow_the_cubic_span() {
        let header = header_with((-10.0, -10.0, -5.0), (10.0, 10.0, 5.0));
        assert_eq!(header.span(), 20.0);

        let b = VoxelKey::ROOT.bounds(&header);
        assert_eq!(b.min, Vector3::new(-10.0, -10.0, -5.0));
        assert_eq!(b.max, Vector3::new(10.0, 10.0, 15.0));

        let b = VoxelKey::new(1, 1, 1, 1).bounds(&header);
        assert_eq!(b.min, Vector3::new(0.0, 0.0, 5.0));
        assert_eq!(b.max, Vector3::new(10.0, 10.0, 15.0));
    }

    #[test]
    fn test_bounds_stay_inside_the_root_cube() {
        let header = header_with((2.0, -4.0, 1.0), (6.0, 4.0, 5.0));
        let cube = VoxelKey::ROOT.bounds(&header);
        for d in 0..5 {
            for x in 0..(1 << d) {
                let key = VoxelKey::new(d, x, 0, (1 << d) - 1);
                assert!(key.bounds(&header).within(&cube), "{}", key);
            }
        }
    }

    #[test]
    fn test_resolution_halves_with_depth() {
        let info = CopcInfo {
            spacing: 32.0,
            ..Default::default()
        };
        assert_eq!(VoxelKey::resolution_at_depth(0, &info), 32.0);
        assert_eq!(VoxelKey::resolution_at_depth(3, &info), 4.0);
        assert_eq!(VoxelKey::new(5, 0, 0, 0).resolution(&info), 1.0);
    }

    #[test]
    fn test_codec_roundtrip() {
        let key = VoxelKey::new(5, 9, 7, 0);
        let mut buf = Vec::new();
        key.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), 16);
        let back = VoxelKey::read_from(&mut std::io::Cursor::new(buf)).unwrap();
        assert_eq!(back, key);
    }

    #[test]
    fn test_display() {
        assert_eq!(VoxelKey::new(5, 9, 7, 0).to_string(), "5-9-7-0");
        assert_eq!(VoxelKey::INVALID.to_string(), "-1--1--1--1");
    }
}
