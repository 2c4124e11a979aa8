//! The COPC info descriptor, the first VLR of every COPC file.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

/// Payload of the `(user_id: "copc", record_id: 1)` VLR.
///
/// `center_*` and `halfsize` define the octree cube, `spacing` the intended
/// point separation at the root level. `root_hier_offset`/`root_hier_size`
/// locate the root hierarchy page and are only known once the file is
/// finalized.
#[derive(Debug, Default, Copy, Clone, PartialEq)]
pub struct CopcInfo {
    pub center_x: f64,
    pub center_y: f64,
    pub center_z: f64,
    pub halfsize: f64,
    pub spacing: f64,
    pub root_hier_offset: u64,
    pub root_hier_size: u64,
    pub gps_time_minimum: f64,
    pub gps_time_maximum: f64,
}

impl CopcInfo {
    pub const USER_ID: &'static str = "copc";
    pub const RECORD_ID: u16 = 1;
    /// 9 doubles followed by 11 reserved u64
    pub const PAYLOAD_SIZE: u64 = 160;
    /// The payload must start at this absolute file offset
    pub const PAYLOAD_OFFSET: u64 = 429;

    pub fn read_from<R: Read>(src: &mut R) -> std::io::Result<Self> {
        let info = Self {
            center_x: src.read_f64::<LittleEndian>()?,
            center_y: src.read_f64::<LittleEndian>()?,
            center_z: src.read_f64::<LittleEndian>()?,
            halfsize: src.read_f64::<LittleEndian>()?,
            spacing: src.read_f64::<LittleEndian>()?,
            root_hier_offset: src.read_u64::<LittleEndian>()?,
            root_hier_size: src.read_u64::<LittleEndian>()?,
            gps_time_minimum: src.read_f64::<LittleEndian>()?,
            gps_time_maximum: src.read_f64::<LittleEndian>()?,
        };
        for _ in 0..11 {
            src.read_u64::<LittleEndian>()?;
        }
        Ok(info)
    }

    pub fn write_to<W: Write>(&self, dst: &mut W) -> std::io::Result<()> {
        dst.write_f64::<LittleEndian>(self.center_x)?;
        dst.write_f64::<LittleEndian>(self.center_y)?;
        dst.write_f64::<LittleEndian>(self.center_z)?;
        dst.write_f64::<LittleEndian>(self.halfsize)?;
        dst.write_f64::<LittleEndian>(self.spacing)?;
        dst.write_u64::<LittleEndian>(self.root_hier_offset)?;
        dst.write_u64::<LittleEndian>(self.root_hier_size)?;
        dst.write_f64::<LittleEndian>(self.gps_time_minimum)?;
        dst.write_f64::<LittleEndian>(self.gps_time_maximum)?;
        for _ in 0..11 {
            dst.write_u64::<LittleEndian>(0)?;
        }
        Ok(())
    }
}
