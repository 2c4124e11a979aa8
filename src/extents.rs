//! Per-dimension statistics stored in the COPC extents VLR.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::errors::CopcError;
use crate::geometry::Vector3;

/// Statistics of one point attribute.
#[derive(Debug, Default, Copy, Clone, PartialEq)]
pub struct CopcExtent {
    pub minimum: f64,
    pub maximum: f64,
    pub mean: f64,
    pub variance: f64,
}

impl CopcExtent {
    pub fn new(minimum: f64, maximum: f64, mean: f64, variance: f64) -> crate::Result<Self> {
        if minimum > maximum || variance < 0.0 {
            return Err(CopcError::InvalidExtent {
                min: minimum,
                max: maximum,
                variance,
            });
        }
        Ok(Self {
            minimum,
            maximum,
            mean,
            variance,
        })
    }
}

/// The extents of every non positional attribute of a point format, plus
/// one per extra bytes field.
///
/// The attribute order is fixed: intensity, return number, number of
/// returns, scanner channel, scan direction flag, edge of flight line,
/// classification, user data, scan angle, point source id, gps time, then
/// red/green/blue for formats 7 and 8, nir for format 8, and finally the
/// extra bytes fields in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct CopcExtents {
    point_format_id: u8,
    extents: Vec<CopcExtent>,
    has_extended_stats: bool,
}

impl CopcExtents {
    pub const USER_ID: &'static str = "copc";
    pub const RECORD_ID: u16 = 10000;

    /// `(minimum, maximum)` doubles per serialized extent.
    pub const BYTES_PER_EXTENT: u64 = 16;

    pub fn new(point_format_id: u8, num_eb_items: usize) -> crate::Result<Self> {
        let count = Self::number_of_extents(point_format_id, num_eb_items)?;
        Ok(Self {
            point_format_id,
            extents: vec![CopcExtent::default(); count],
            has_extended_stats: false,
        })
    }

    /// How many extents a file of the given format carries, x, y and z not
    /// included (their extents are echoed from the LAS header).
    pub fn number_of_extents(point_format_id: u8, num_eb_items: usize) -> crate::Result<usize> {
        let base = match point_format_id {
            6 => 11,
            7 => 14,
            8 => 15,
            other => return Err(CopcError::UnsupportedPointFormat(other)),
        };
        Ok(base + num_eb_items)
    }

    /// Serialized VLR payload size: three positional pairs followed by the
    /// extent array.
    pub fn byte_size(point_format_id: u8, num_eb_items: usize) -> crate::Result<u64> {
        let count = Self::number_of_extents(point_format_id, num_eb_items)?;
        Ok((count as u64 + 3) * Self::BYTES_PER_EXTENT)
    }

    pub fn point_format_id(&self) -> u8 {
        self.point_format_id
    }

    pub fn extents(&self) -> &[CopcExtent] {
        &self.extents
    }

    pub fn extents_mut(&mut self) -> &mut [CopcExtent] {
        &mut self.extents
    }

    pub fn has_extended_stats(&self) -> bool {
        self.has_extended_stats
    }

    /// Loads mean/variance pairs from the experimental extended stats
    /// record. Nothing in this crate emits that record yet, the loader is
    /// the integration point for readers that find one.
    pub fn set_extended_stats(&mut self, stats: &[(f64, f64)]) -> crate::Result<()> {
        if stats.len() != self.extents.len() {
            return Err(CopcError::InvalidExtentCount {
                expected: self.extents.len(),
                actual: stats.len(),
            });
        }
        for (extent, &(mean, variance)) in self.extents.iter_mut().zip(stats) {
            if variance < 0.0 {
                return Err(CopcError::InvalidExtent {
                    min: extent.minimum,
                    max: extent.maximum,
                    variance,
                });
            }
            extent.mean = mean;
            extent.variance = variance;
        }
        self.has_extended_stats = true;
        Ok(())
    }

    /// Parses the VLR payload. The first three pairs repeat the positional
    /// extents of the LAS header and are skipped.
    pub fn read_from<R: Read>(
        mut src: R,
        byte_size: u64,
        point_format_id: u8,
        num_eb_items: usize,
    ) -> crate::Result<Self> {
        if byte_size != Self::byte_size(point_format_id, num_eb_items)? {
            return Err(CopcError::InvalidVlrSize {
                user_id: Self::USER_ID,
                size: byte_size,
            });
        }
        for _ in 0..3 {
            src.read_f64::<LittleEndian>()?;
            src.read_f64::<LittleEndian>()?;
        }
        let count = Self::number_of_extents(point_format_id, num_eb_items)?;
        let mut extents = Vec::with_capacity(count);
        for _ in 0..count {
            let minimum = src.read_f64::<LittleEndian>()?;
            let maximum = src.read_f64::<LittleEndian>()?;
            extents.push(CopcExtent {
                minimum,
                maximum,
                mean: 0.0,
                variance: 0.0,
            });
        }
        Ok(Self {
            point_format_id,
            extents,
            has_extended_stats: false,
        })
    }

    /// Writes the VLR payload, echoing the positional extents first.
    pub fn write_to<W: Write>(&self, mut dst: W, min: Vector3, max: Vector3) -> std::io::Result<()> {
        for (lo, hi) in [(min.x, max.x), (min.y, max.y), (min.z, max.z)] {
            dst.write_f64::<LittleEndian>(lo)?;
            dst.write_f64::<LittleEndian>(hi)?;
        }
        for extent in &self.extents {
            dst.write_f64::<LittleEndian>(extent.minimum)?;
            dst.write_f64::<LittleEndian>(extent.maximum)?;
        }
        Ok(())
    }
}
