//! The fixed 375 byte LAS 1.4 public header.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::errors::CopcError;
use crate::geometry::{Bounds, Vector3};

/// High bit of the point format field, set when point data is compressed.
const IS_COMPRESSED_MASK: u8 = 0x80;

/// Bit 4 of `global_encoding`: coordinate system is described by a WKT
/// record, mandatory for point formats 6 and up.
const WKT_BIT: u16 = 1 << 4;

fn read_fixed_string<R: Read>(src: &mut R, len: usize) -> std::io::Result<String> {
    let mut bytes = vec![0u8; len];
    src.read_exact(&mut bytes)?;
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(len);
    Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
}

fn write_fixed_string<W: Write>(dst: &mut W, s: &str, len: usize) -> std::io::Result<()> {
    let mut bytes = vec![0u8; len];
    let n = s.len().min(len);
    bytes[..n].copy_from_slice(&s.as_bytes()[..n]);
    dst.write_all(&bytes)
}

/// The LAS 1.4 public header.
///
/// The legacy (pre 1.4) point counts are always written as zeros, as
/// required for point formats 6 to 8, and `point_format_id` is kept in its
/// logical form: the compression bit is applied on the wire only.
#[derive(Debug, Clone, PartialEq)]
pub struct LasHeader {
    pub file_source_id: u16,
    pub global_encoding: u16,
    pub guid_1: u32,
    pub guid_2: u16,
    pub guid_3: u16,
    pub guid_4: [u8; 8],
    pub version_major: u8,
    pub version_minor: u8,
    system_identifier: String,
    generating_software: String,
    pub creation_day: u16,
    pub creation_year: u16,
    pub offset_to_point_data: u32,
    pub number_of_vlrs: u32,
    pub point_format_id: u8,
    pub point_record_length: u16,
    pub scale: Vector3,
    pub offset: Vector3,
    pub min: Vector3,
    pub max: Vector3,
    pub start_of_waveform: u64,
    pub evlr_offset: u64,
    pub evlr_count: u32,
    pub point_count: u64,
    pub points_by_return: [u64; 15],
}

impl Default for LasHeader {
    fn default() -> Self {
        Self {
            file_source_id: 0,
            global_encoding: WKT_BIT,
            guid_1: 0,
            guid_2: 0,
            guid_3: 0,
            guid_4: [0; 8],
            version_major: 1,
            version_minor: 4,
            system_identifier: String::new(),
            generating_software: String::new(),
            creation_day: 0,
            creation_year: 0,
            offset_to_point_data: 0,
            number_of_vlrs: 0,
            point_format_id: 6,
            point_record_length: 30,
            scale: Vector3::default_scale(),
            offset: Vector3::default_offset(),
            min: Vector3::default(),
            max: Vector3::default(),
            start_of_waveform: 0,
            evlr_offset: 0,
            evlr_count: 0,
            point_count: 0,
            points_by_return: [0; 15],
        }
    }
}

impl LasHeader {
    /// Serialized size in the 1.4 layout.
    pub const SIZE: u64 = 375;

    /// Point record size of the format without extra bytes.
    pub fn base_point_record_length(point_format_id: u8) -> crate::Result<u16> {
        match point_format_id {
            6 => Ok(30),
            7 => Ok(36),
            8 => Ok(38),
            other => Err(CopcError::UnsupportedPointFormat(other)),
        }
    }

    /// Extra bytes per point, beyond the format's base record.
    pub fn eb_byte_size(&self) -> u16 {
        self.point_record_length
            .saturating_sub(Self::base_point_record_length(self.point_format_id).unwrap_or(0))
    }

    /// Side of the octree cube: the longest of the three extents.
    pub fn span(&self) -> f64 {
        (self.max.x - self.min.x)
            .max(self.max.y - self.min.y)
            .max(self.max.z - self.min.z)
    }

    pub fn bounds(&self) -> Bounds {
        Bounds::new(self.min, self.max)
    }

    pub fn system_identifier(&self) -> &str {
        &self.system_identifier
    }

    pub fn set_system_identifier(&mut self, value: &str) -> crate::Result<()> {
        if value.len() > 32 {
            return Err(CopcError::StringTooLong {
                field: "system_identifier",
                len: value.len(),
            });
        }
        self.system_identifier = value.to_owned();
        Ok(())
    }

    pub fn generating_software(&self) -> &str {
        &self.generating_software
    }

    pub fn set_generating_software(&mut self, value: &str) -> crate::Result<()> {
        if value.len() > 32 {
            return Err(CopcError::StringTooLong {
                field: "generating_software",
                len: value.len(),
            });
        }
        self.generating_software = value.to_owned();
        Ok(())
    }

    pub fn read_from<R: Read>(src: &mut R) -> crate::Result<Self> {
        let mut signature = [0u8; 4];
        src.read_exact(&mut signature)?;
        if &signature != b"LASF" {
            return Err(CopcError::NotLas14 { major: 0, minor: 0 });
        }
        let file_source_id = src.read_u16::<LittleEndian>()?;
        let global_encoding = src.read_u16::<LittleEndian>()?;
        let guid_1 = src.read_u32::<LittleEndian>()?;
        let guid_2 = src.read_u16::<LittleEndian>()?;
        let guid_3 = src.read_u16::<LittleEndian>()?;
        let mut guid_4 = [0u8; 8];
        src.read_exact(&mut guid_4)?;
        let version_major = src.read_u8()?;
        let version_minor = src.read_u8()?;
        if version_major != 1 || version_minor != 4 {
            return Err(CopcError::NotLas14 {
                major: version_major,
                minor: version_minor,
            });
        }
        let system_identifier = read_fixed_string(src, 32)?;
        let generating_software = read_fixed_string(src, 32)?;
        let creation_day = src.read_u16::<LittleEndian>()?;
        let creation_year = src.read_u16::<LittleEndian>()?;
        let header_size = src.read_u16::<LittleEndian>()?;
        if u64::from(header_size) != Self::SIZE {
            return Err(CopcError::NotLas14 {
                major: version_major,
                minor: version_minor,
            });
        }
        let offset_to_point_data = src.read_u32::<LittleEndian>()?;
        let number_of_vlrs = src.read_u32::<LittleEndian>()?;
        let point_format_id = src.read_u8()? & !IS_COMPRESSED_MASK;
        let point_record_length = src.read_u16::<LittleEndian>()?;
        let _legacy_point_count = src.read_u32::<LittleEndian>()?;
        for _ in 0..5 {
            let _legacy_by_return = src.read_u32::<LittleEndian>()?;
        }
        let scale = Vector3::new(
            src.read_f64::<LittleEndian>()?,
            src.read_f64::<LittleEndian>()?,
            src.read_f64::<LittleEndian>()?,
        );
        let offset = Vector3::new(
            src.read_f64::<LittleEndian>()?,
            src.read_f64::<LittleEndian>()?,
            src.read_f64::<LittleEndian>()?,
        );
        // the header interleaves max and min per axis
        let max_x = src.read_f64::<LittleEndian>()?;
        let min_x = src.read_f64::<LittleEndian>()?;
        let max_y = src.read_f64::<LittleEndian>()?;
        let min_y = src.read_f64::<LittleEndian>()?;
        let max_z = src.read_f64::<LittleEndian>()?;
        let min_z = src.read_f64::<LittleEndian>()?;
        let start_of_waveform = src.read_u64::<LittleEndian>()?;
        let evlr_offset = src.read_u64::<LittleEndian>()?;
        let evlr_count = src.read_u32::<LittleEndian>()?;
        let point_count = src.read_u64::<LittleEndian>()?;
        let mut points_by_return = [0u64; 15];
        for count in points_by_return.iter_mut() {
            *count = src.read_u64::<LittleEndian>()?;
        }
        Ok(Self {
            file_source_id,
            global_encoding,
            guid_1,
            guid_2,
            guid_3,
            guid_4,
            version_major,
            version_minor,
            system_identifier,
            generating_software,
            creation_day,
            creation_year,
            offset_to_point_data,
            number_of_vlrs,
            point_format_id,
            point_record_length,
            scale,
            offset,
            min: Vector3::new(min_x, min_y, min_z),
            max: Vector3::new(max_x, max_y, max_z),
            start_of_waveform,
            evlr_offset,
            evlr_count,
            point_count,
            points_by_return,
        })
    }

    pub fn write_to<W: Write>(&self, dst: &mut W) -> std::io::Result<()> {
        dst.write_all(b"LASF")?;
        dst.write_u16::<LittleEndian>(self.file_source_id)?;
        dst.write_u16::<LittleEndian>(self.global_encoding)?;
        dst.write_u32::<LittleEndian>(self.guid_1)?;
        dst.write_u16::<LittleEndian>(self.guid_2)?;
        dst.write_u16::<LittleEndian>(self.guid_3)?;
        dst.write_all(&self.guid_4)?;
        dst.write_u8(self.version_major)?;
        dst.write_u8(self.version_minor)?;
        write_fixed_string(dst, &self.system_identifier, 32)?;
        write_fixed_string(dst, &self.generating_software, 32)?;
        dst.write_u16::<LittleEndian>(self.creation_day)?;
        dst.write_u16::<LittleEndian>(self.creation_year)?;
        dst.write_u16::<LittleEndian>(Self::SIZE as u16)?;
        dst.write_u32::<LittleEndian>(self.offset_to_point_data)?;
        dst.write_u32::<LittleEndian>(self.number_of_vlrs)?;
        dst.write_u8(self.point_format_id | IS_COMPRESSED_MASK)?;
        dst.write_u16::<LittleEndian>(self.point_record_length)?;
        // legacy counts must be zero for formats 6 and up
        dst.write_u32::<LittleEndian>(0)?;
        for _ in 0..5 {
            dst.write_u32::<LittleEndian>(0)?;
        }
        for v in [self.scale, self.offset] {
            dst.write_f64::<LittleEndian>(v.x)?;
            dst.write_f64::<LittleEndian>(v.y)?;
            dst.write_f64::<LittleEndian>(v.z)?;
        }
        dst.write_f64::<LittleEndian>(self.max.x)?;
        dst.write_f64::<LittleEndian>(self.min.x)?;
        dst.write_f64::<LittleEndian>(self.max.y)?;
        dst.write_f64::<LittleEndian>(self.min.y)?;
        dst.write_f64::<LittleEndian>(self.max.z)?;
        dst.write_f64::<LittleEndian>(self.min.z)?;
        dst.write_u64::<LittleEndian>(self.start_of_waveform)?;
        dst.write_u64::<LittleEndian>(self.evlr_offset)?;
        dst.write_u32::<LittleEndian>(self.evlr_count)?;
        dst.write_u64::<LittleEndian>(self.point_count)?;
        for count in &self.points_by_return {
            dst.write_u64::<LittleEndian>(*count)?;
        }
        Ok(())
    }
}
