//! Variable length record headers, regular and extended.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

/// The well known VLR identities of a COPC file, besides
/// [`CopcInfo`](crate::CopcInfo), [`CopcExtents`](crate::CopcExtents) and
/// the hierarchy [`Page`](crate::Page) which carry their own constants.
pub const WKT_USER_ID: &str = "LASF_Projection";
pub const WKT_RECORD_ID: u16 = 2112;
pub const EB_USER_ID: &str = "LASF_Spec";
pub const EB_RECORD_ID: u16 = 4;

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

/// Header of a (E)VLR. Regular records store their payload length on 16
/// bits, extended ones on 64; everything else is shared.
#[derive(Debug, Clone, PartialEq)]
pub struct VlrHeader {
    pub user_id: String,
    pub record_id: u16,
    pub record_length: u64,
    pub description: String,
    pub is_extended: bool,
}

impl VlrHeader {
    /// Serialized header size of a regular VLR.
    pub const SIZE: u64 = 54;
    /// Serialized header size of an extended VLR.
    pub const EVLR_SIZE: u64 = 60;

    pub fn new(user_id: &str, record_id: u16, record_length: u64, description: &str) -> Self {
        Self {
            user_id: user_id.to_owned(),
            record_id,
            record_length,
            description: description.to_owned(),
            is_extended: false,
        }
    }

    pub fn new_extended(
        user_id: &str,
        record_id: u16,
        record_length: u64,
        description: &str,
    ) -> Self {
        Self {
            is_extended: true,
            ..Self::new(user_id, record_id, record_length, description)
        }
    }

    /// Serialized size of this header.
    pub fn size(&self) -> u64 {
        if self.is_extended {
            Self::EVLR_SIZE
        } else {
            Self::SIZE
        }
    }

    pub fn matches(&self, user_id: &str, record_id: u16) -> bool {
        self.user_id == user_id && self.record_id == record_id
    }

    pub fn read_from<R: Read>(src: &mut R) -> std::io::Result<Self> {
        src.read_u16::<LittleEndian>()?; // reserved
        let user_id = read_fixed_string(src, 16)?;
        let record_id = src.read_u16::<LittleEndian>()?;
        let record_length = u64::from(src.read_u16::<LittleEndian>()?);
        let description = read_fixed_string(src, 32)?;
        Ok(Self {
            user_id,
            record_id,
            record_length,
            description,
            is_extended: false,
        })
    }

    pub fn read_extended_from<R: Read>(src: &mut R) -> std::io::Result<Self> {
        src.read_u16::<LittleEndian>()?; // reserved
        let user_id = read_fixed_string(src, 16)?;
        let record_id = src.read_u16::<LittleEndian>()?;
        let record_length = src.read_u64::<LittleEndian>()?;
        let description = read_fixed_string(src, 32)?;
        Ok(Self {
            user_id,
            record_id,
            record_length,
            description,
            is_extended: true,
        })
    }

    pub fn write_to<W: Write>(&self, dst: &mut W) -> std::io::Result<()> {
        dst.write_u16::<LittleEndian>(0)?;
        write_fixed_string(dst, &self.user_id, 16)?;
        dst.write_u16::<LittleEndian>(self.record_id)?;
        if self.is_extended {
            dst.write_u64::<LittleEndian>(self.record_length)?;
        } else {
            dst.write_u16::<LittleEndian>(self.record_length as u16)?;
        }
        write_fixed_string(dst, &self.description, 32)?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_vlr_header_roundtrip() {
        let header = VlrHeader::new("copc", 1, 160, "COPC info VLR");
        let mut buf = Vec::new();
        header.write_to(&mut buf).unwrap();
        assert_eq!(buf.len() as u64, VlrHeader::SIZE);
        let back = VlrHeader::read_from(&mut std::io::Cursor::new(buf)).unwrap();
        assert_eq!(back, header);
        assert!(back.matches("copc", 1));
        assert!(!back.matches("copc", 2));
    }

    #[test]
    fn test_evlr_header_roundtrip() {
        let header = VlrHeader::new_extended(WKT_USER_ID, WKT_RECORD_ID, 1 << 33, "");
        let mut buf = Vec::new();
        header.write_to(&mut buf).unwrap();
        assert_eq!(buf.len() as u64, VlrHeader::EVLR_SIZE);
        let back = VlrHeader::read_extended_from(&mut std::io::Cursor::new(buf)).unwrap();
        assert_eq!(back, header);
        assert_eq!(back.record_length, 1 << 33);
    }
}
