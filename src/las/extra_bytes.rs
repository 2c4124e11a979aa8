//! The extra bytes VLR, describing user defined per point fields.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

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

/// One item of the extra bytes VLR, a 192 byte record.
///
/// `no_data`, `min` and `max` are "anytype" unions in the LAS definition and are
/// kept as raw 8 byte words; `options` tells which of them are relevant,
/// except for `data_type == 0` where it holds the field's byte size.
#[derive(Debug, Clone, PartialEq)]
pub struct EbItem {
    pub data_type: u8,
    pub options: u8,
    pub name: String,
    pub no_data: [u64; 3],
    pub min: [u64; 3],
    pub max: [u64; 3],
    pub scale: [f64; 3],
    pub offset: [f64; 3],
    pub description: String,
}

impl Default for EbItem {
    fn default() -> Self {
        Self {
            data_type: 1,
            options: 0,
            name: String::new(),
            no_data: [0; 3],
            min: [0; 3],
            max: [0; 3],
            scale: [0.0; 3],
            offset: [0.0; 3],
            description: String::new(),
        }
    }
}

impl EbItem {
    /// Serialized size of one item.
    pub const SIZE: u64 = 192;

    /// Bytes this field adds to every point record.
    ///
    /// Types 1 to 10 are scalars, the deprecated ranges 11-20 and 21-30 are
    /// 2 and 3 tuples of the same scalars, and type 0 is an opaque blob
    /// whose size is carried by `options`.
    pub fn byte_size(&self) -> u16 {
        fn scalar_size(t: u8) -> u16 {
            match t {
                1 | 2 => 1,
                3 | 4 => 2,
                5 | 6 | 9 => 4,
                7 | 8 | 10 => 8,
                _ => 0,
            }
        }
        match self.data_type {
            0 => u16::from(self.options),
            t @ 1..=10 => scalar_size(t),
            t @ 11..=20 => 2 * scalar_size(t - 10),
            t @ 21..=30 => 3 * scalar_size(t - 20),
            _ => 0,
        }
    }

    pub fn read_from<R: Read>(src: &mut R) -> std::io::Result<Self> {
        let mut reserved = [0u8; 2];
        src.read_exact(&mut reserved)?;
        let data_type = src.read_u8()?;
        let options = src.read_u8()?;
        let name = read_fixed_string(src, 32)?;
        let mut unused = [0u8; 4];
        src.read_exact(&mut unused)?;
        let mut no_data = [0u64; 3];
        let mut min = [0u64; 3];
        let mut max = [0u64; 3];
        let mut scale = [0.0f64; 3];
        let mut offset = [0.0f64; 3];
        for v in no_data.iter_mut().chain(&mut min).chain(&mut max) {
            *v = src.read_u64::<LittleEndian>()?;
        }
        for v in scale.iter_mut().chain(&mut offset) {
            *v = src.read_f64::<LittleEndian>()?;
        }
        let description = read_fixed_string(src, 32)?;
        Ok(Self {
            data_type,
            options,
            name,
            no_data,
            min,
            max,
            scale,
            offset,
            description,
        })
    }

    pub fn write_to<W: Write>(&self, dst: &mut W) -> std::io::Result<()> {
        dst.write_all(&[0u8; 2])?;
        dst.write_u8(self.data_type)?;
        dst.write_u8(self.options)?;
        write_fixed_string(dst, &self.name, 32)?;
        dst.write_all(&[0u8; 4])?;
        for v in self.no_data.iter().chain(&self.min).chain(&self.max) {
            dst.write_u64::<LittleEndian>(*v)?;
        }
        for v in self.scale.iter().chain(&self.offset) {
            dst.write_f64::<LittleEndian>(*v)?;
        }
        write_fixed_string(dst, &self.description, 32)?;
        Ok(())
    }
}

/// The `(user_id: "LASF_Spec", record_id: 4)` VLR.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EbVlr {
    pub items: Vec<EbItem>,
}

impl EbVlr {
    /// A VLR of `n` default fields named `FIELD_0`, `FIELD_1`, ...
    pub fn with_field_count(n: usize) -> Self {
        let items = (0..n)
            .map(|i| EbItem {
                name: format!("FIELD_{}", i),
                ..Default::default()
            })
            .collect();
        Self { items }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Bytes all fields together add to every point record.
    pub fn byte_size(&self) -> u16 {
        self.items.iter().map(EbItem::byte_size).sum()
    }

    /// Serialized payload size.
    pub fn record_length(&self) -> u64 {
        self.items.len() as u64 * EbItem::SIZE
    }

    pub fn read_from<R: Read>(src: &mut R, record_length: u64) -> std::io::Result<Self> {
        let mut items = Vec::with_capacity((record_length / EbItem::SIZE) as usize);
        for _ in 0..record_length / EbItem::SIZE {
            items.push(EbItem::read_from(src)?);
        }
        Ok(Self { items })
    }

    pub fn write_to<W: Write>(&self, dst: &mut W) -> std::io::Result<()> {
        for item in &self.items {
            item.write_to(dst)?;
        }
        Ok(())
    }
}
