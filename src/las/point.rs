//! In-memory point records for the LAS 1.4 formats 6, 7 and 8.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::errors::CopcError;
use crate::geometry::Vector3;
use crate::las::header::LasHeader;

/// One point record with world (already scaled) coordinates.
///
/// Formats 7 and 8 add `red`/`green`/`blue`, format 8 adds `nir`; the
/// fields are simply ignored by smaller formats. `extra_bytes` must match
/// the extra bytes declared by the file the point goes into.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub intensity: u16,
    /// 4 bits
    pub return_number: u8,
    /// 4 bits
    pub number_of_returns: u8,
    /// 4 bits: synthetic, key-point, withheld, overlap
    pub classification_flags: u8,
    /// 2 bits
    pub scanner_channel: u8,
    pub scan_direction_flag: bool,
    pub edge_of_flight_line: bool,
    pub classification: u8,
    pub user_data: u8,
    pub scan_angle: i16,
    pub point_source_id: u16,
    pub gps_time: f64,
    pub red: u16,
    pub green: u16,
    pub blue: u16,
    pub nir: u16,
    pub extra_bytes: Vec<u8>,
}

impl Point {
    pub fn position(&self) -> Vector3 {
        Vector3::new(self.x, self.y, self.z)
    }

    fn pack_coordinate(value: f64, scale: f64, offset: f64) -> crate::Result<i32> {
        let scaled = ((value - offset) / scale).round();
        if scaled < f64::from(i32::MIN) || scaled > f64::from(i32::MAX) {
            return Err(CopcError::CoordinateOutOfRange(value));
        }
        Ok(scaled as i32)
    }

    fn write_to<W: Write>(
        &self,
        dst: &mut W,
        point_format_id: u8,
        eb_byte_size: u16,
        scale: Vector3,
        offset: Vector3,
    ) -> crate::Result<()> {
        dst.write_i32::<LittleEndian>(Self::pack_coordinate(self.x, scale.x, offset.x)?)?;
        dst.write_i32::<LittleEndian>(Self::pack_coordinate(self.y, scale.y, offset.y)?)?;
        dst.write_i32::<LittleEndian>(Self::pack_coordinate(self.z, scale.z, offset.z)?)?;
        dst.write_u16::<LittleEndian>(self.intensity)?;
        dst.write_u8((self.return_number & 0x0f) | ((self.number_of_returns & 0x0f) << 4))?;
        dst.write_u8(
            (self.classification_flags & 0x0f)
                | ((self.scanner_channel & 0x03) << 4)
                | (u8::from(self.scan_direction_flag) << 6)
                | (u8::from(self.edge_of_flight_line) << 7),
        )?;
        dst.write_u8(self.classification)?;
        dst.write_u8(self.user_data)?;
        dst.write_i16::<LittleEndian>(self.scan_angle)?;
        dst.write_u16::<LittleEndian>(self.point_source_id)?;
        dst.write_f64::<LittleEndian>(self.gps_time)?;
        if point_format_id >= 7 {
            dst.write_u16::<LittleEndian>(self.red)?;
            dst.write_u16::<LittleEndian>(self.green)?;
            dst.write_u16::<LittleEndian>(self.blue)?;
        }
        if point_format_id == 8 {
            dst.write_u16::<LittleEndian>(self.nir)?;
        }
        if self.extra_bytes.len() != usize::from(eb_byte_size) {
            return Err(CopcError::PointsMismatch);
        }
        dst.write_all(&self.extra_bytes)?;
        Ok(())
    }

    fn read_from<R: Read>(
        src: &mut R,
        point_format_id: u8,
        eb_byte_size: u16,
        scale: Vector3,
        offset: Vector3,
    ) -> std::io::Result<Self> {
        let x = f64::from(src.read_i32::<LittleEndian>()?) * scale.x + offset.x;
        let y = f64::from(src.read_i32::<LittleEndian>()?) * scale.y + offset.y;
        let z = f64::from(src.read_i32::<LittleEndian>()?) * scale.z + offset.z;
        let intensity = src.read_u16::<LittleEndian>()?;
        let returns = src.read_u8()?;
        let flags = src.read_u8()?;
        let classification = src.read_u8()?;
        let user_data = src.read_u8()?;
        let scan_angle = src.read_i16::<LittleEndian>()?;
        let point_source_id = src.read_u16::<LittleEndian>()?;
        let gps_time = src.read_f64::<LittleEndian>()?;
        let (mut red, mut green, mut blue, mut nir) = (0, 0, 0, 0);
        if point_format_id >= 7 {
            red = src.read_u16::<LittleEndian>()?;
            green = src.read_u16::<LittleEndian>()?;
            blue = src.read_u16::<LittleEndian>()?;
        }
        if point_format_id == 8 {
            nir = src.read_u16::<LittleEndian>()?;
        }
        let mut extra_bytes = vec![0u8; usize::from(eb_byte_size)];
        src.read_exact(&mut extra_bytes)?;
        Ok(Self {
            x,
            y,
            z,
            intensity,
            return_number: returns & 0x0f,
            number_of_returns: returns >> 4,
            classification_flags: flags & 0x0f,
            scanner_channel: (flags >> 4) & 0x03,
            scan_direction_flag: flags & 0x40 != 0,
            edge_of_flight_line: flags & 0x80 != 0,
            classification,
            user_data,
            scan_angle,
            point_source_id,
            gps_time,
            red,
            green,
            blue,
            nir,
            extra_bytes,
        })
    }
}

/// A batch of points bound to a point format and a coordinate grid.
///
/// The writer only accepts batches whose format, scale and offset match the
/// file header exactly.
#[derive(Debug, Clone, PartialEq)]
pub struct Points {
    point_format_id: u8,
    point_record_length: u16,
    scale: Vector3,
    offset: Vector3,
    points: Vec<Point>,
}

impl Points {
    pub fn new(
        point_format_id: u8,
        eb_byte_size: u16,
        scale: Vector3,
        offset: Vector3,
    ) -> crate::Result<Self> {
        let base = LasHeader::base_point_record_length(point_format_id)?;
        Ok(Self {
            point_format_id,
            point_record_length: base + eb_byte_size,
            scale,
            offset,
            points: Vec::new(),
        })
    }

    /// A batch matching a file header's format and grid.
    pub fn for_header(header: &LasHeader) -> crate::Result<Self> {
        Self::new(
            header.point_format_id,
            header.eb_byte_size(),
            header.scale,
            header.offset,
        )
    }

    pub fn point_format_id(&self) -> u8 {
        self.point_format_id
    }

    pub fn point_record_length(&self) -> u16 {
        self.point_record_length
    }

    pub fn eb_byte_size(&self) -> u16 {
        self.point_record_length
            - LasHeader::base_point_record_length(self.point_format_id).unwrap_or(0)
    }

    pub fn scale(&self) -> Vector3 {
        self.scale
    }

    pub fn offset(&self) -> Vector3 {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn push(&mut self, point: Point) {
        self.points.push(point);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Point> {
        self.points.iter()
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn extend(&mut self, other: &Points) {
        self.points.extend_from_slice(&other.points);
    }

    /// True when this batch can be stored in a file with that header.
    pub fn matches(&self, header: &LasHeader) -> bool {
        self.point_format_id == header.point_format_id
            && self.point_record_length == header.point_record_length
            && self.scale == header.scale
            && self.offset == header.offset
    }

    /// Serializes all points to raw little-endian LAS records.
    pub fn pack(&self) -> crate::Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.points.len() * usize::from(self.point_record_length));
        let eb_byte_size = self.eb_byte_size();
        for point in &self.points {
            point.write_to(
                &mut buf,
                self.point_format_id,
                eb_byte_size,
                self.scale,
                self.offset,
            )?;
        }
        Ok(buf)
    }

    /// Parses raw LAS records, the inverse of [`Points::pack`].
    pub fn unpack(
        data: &[u8],
        point_format_id: u8,
        point_record_length: u16,
        scale: Vector3,
        offset: Vector3,
    ) -> crate::Result<Self> {
        let record_length = usize::from(point_record_length);
        if record_length == 0 || data.len() % record_length != 0 {
            return Err(CopcError::PointsMismatch);
        }
        let base = LasHeader::base_point_record_length(point_format_id)?;
        if point_record_length < base {
            return Err(CopcError::PointsMismatch);
        }
        let eb_byte_size = point_record_length - base;
        let mut src = std::io::Cursor::new(data);
        let mut points = Vec::with_capacity(data.len() / record_length);
        for _ in 0..data.len() / record_length {
            points.push(Point::read_from(
                &mut src,
                point_format_id,
                eb_byte_size,
                scale,
                offset,
            )?);
        }
        Ok(Self {
            point_format_id,
            point_record_length,
            scale,
            offset,
            points,
        })
    }
}

impl<'a> IntoIterator for &'a Points {
    type Item = &'a Point;
    type IntoIter = std::slice::Iter<'a, Point>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.iter()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample_point(eb: usize) -> Point {
        Point {
            x: 12.34,
            y: -56.78,
            z: 9.0,
            intensity: 42,
            return_number: 2,
            number_of_returns: 3,
            classification_flags: 0b1001,
            scanner_channel: 1,
            scan_direction_flag: true,
            edge_of_flight_line: false,
            classification: 5,
            user_data: 77,
            scan_angle: -1500,
            point_source_id: 200,
            gps_time: 123456.789,
            red: 1,
            green: 2,
            blue: 3,
            nir: 4,
            extra_bytes: vec![0xab; eb],
        }
    }

    #[test]
    fn test_record_lengths() {
        for (format, base) in [(6u8, 30u16), (7, 36), (8, 38)] {
            let points = Points::new(
                format,
                0,
                Vector3::default_scale(),
                Vector3::default_offset(),
            )
            .unwrap();
            assert_eq!(points.point_record_length(), base);
        }
        assert!(Points::new(5, 0, Vector3::default_scale(), Vector3::default_offset()).is_err());
    }

    #[test]
    fn test_pack_unpack_roundtrip() {
        for (format, eb) in [(6u8, 0usize), (7, 0), (8, 0), (7, 4), (8, 2)] {
            let scale = Vector3::new(0.01, 0.01, 0.01);
            let offset = Vector3::new(100.0, 200.0, 300.0);
            let mut points = Points::new(format, eb as u16, scale, offset).unwrap();
            points.push(sample_point(eb));
            points.push(Point {
                extra_bytes: vec![0; eb],
                ..Default::default()
            });

            let packed = points.pack().unwrap();
            assert_eq!(
                packed.len(),
                2 * usize::from(points.point_record_length())
            );

            let back = Points::unpack(
                &packed,
                format,
                points.point_record_length(),
                scale,
                offset,
            )
            .unwrap();
            assert_eq!(back.len(), 2);
            let p = &back.points()[0];
            assert!((p.x - 12.34).abs() < 0.005);
            assert!((p.y - -56.78).abs() < 0.005);
            assert_eq!(p.intensity, 42);
            assert_eq!(p.return_number, 2);
            assert_eq!(p.number_of_returns, 3);
            assert_eq!(p.classification_flags, 0b1001);
            assert_eq!(p.scanner_channel, 1);
            assert!(p.scan_direction_flag);
            assert!(!p.edge_of_flight_line);
            assert_eq!(p.classification, 5);
            assert_eq!(p.scan_angle, -1500);
            assert_eq!(p.gps_time, 123456.789);
            if format >= 7 {
                assert_eq!((p.red, p.green, p.blue), (1, 2, 3));
            }
            if format == 8 {
                assert_eq!(p.nir, 4);
            }
            assert_eq!(p.extra_bytes, vec![0xab; eb]);

            // a second pack is byte identical
            assert_eq!(back.pack().unwrap(), packed);
        }
    }

    #[test]
    fn test_out_of_range_coordinate() {
        let mut points = Points::new(
            6,
            0,
            Vector3::new(0.001, 0.001, 0.001),
            Vector3::default_offset(),
        )
        .unwrap();
        points.push(Point {
            x: 1e10,
            ..Default::default()
        });
        assert!(matches!(
            points.pack(),
            Err(CopcError::CoordinateOutOfRange(_))
        ));
    }

    #[test]
    fn test_extra_bytes_must_match_declaration() {
        let mut points = Points::new(
            6,
            2,
            Vector3::default_scale(),
            Vector3::default_offset(),
        )
        .unwrap();
        points.push(Point::default()); // no extra bytes on the point
        assert!(matches!(points.pack(), Err(CopcError::PointsMismatch)));
    }
}
