//! Hierarchy records: the 32 byte entries of COPC pages and the pages
//! themselves.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::errors::CopcError;
use crate::key::VoxelKey;

/// A compressed chunk of point records.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Node {
    pub key: VoxelKey,
    /// Absolute file offset of the compressed chunk
    pub offset: u64,
    /// Size of the compressed chunk in bytes
    pub byte_size: u64,
    pub point_count: u64,
}

/// A reference to a child hierarchy page.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PagePointer {
    pub key: VoxelKey,
    /// Absolute file offset of the page payload
    pub offset: u64,
    /// `32 * entry_count` of the referenced page
    pub byte_size: u64,
}

/// One 32 byte hierarchy record.
///
/// On the wire the variant is discriminated by the point count field:
/// `-1` marks a page pointer, a non negative count a node, and an all-zero
/// payload a reservation without data.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Entry {
    Node(Node),
    Page(PagePointer),
    Empty(VoxelKey),
}

impl Entry {
    /// Serialized size of one entry.
    pub const SIZE: u64 = 32;

    pub fn key(&self) -> VoxelKey {
        match self {
            Entry::Node(node) => node.key,
            Entry::Page(page) => page.key,
            Entry::Empty(key) => *key,
        }
    }

    pub fn read_from<R: Read>(src: &mut R) -> crate::Result<Self> {
        let key = VoxelKey::read_from(src)?;
        let offset = src.read_i64::<LittleEndian>()?;
        let byte_size = src.read_i32::<LittleEndian>()?;
        let point_count = src.read_i32::<LittleEndian>()?;

        match point_count {
            -1 => Ok(Entry::Page(PagePointer {
                key,
                offset: offset as u64,
                byte_size: byte_size as u64,
            })),
            0 if offset == 0 && byte_size == 0 => Ok(Entry::Empty(key)),
            count if count >= 0 => Ok(Entry::Node(Node {
                key,
                offset: offset as u64,
                byte_size: byte_size as u64,
                point_count: count as u64,
            })),
            count => Err(CopcError::InvalidPointCount(count)),
        }
    }

    pub fn write_to<W: Write>(&self, dst: &mut W) -> crate::Result<()> {
        let (key, offset, byte_size, point_count) = match self {
            Entry::Node(node) => (
                node.key,
                node.offset,
                node.byte_size,
                i32::try_from(node.point_count)
                    .map_err(|_| CopcError::ChunkTooLarge(node.point_count))?,
            ),
            Entry::Page(page) => (page.key, page.offset, page.byte_size, -1),
            Entry::Empty(key) => (*key, 0, 0, 0),
        };
        if byte_size > i32::MAX as u64 {
            return Err(CopcError::ChunkTooLarge(byte_size));
        }
        key.write_to(dst)?;
        dst.write_i64::<LittleEndian>(offset as i64)?;
        dst.write_i32::<LittleEndian>(byte_size as i32)?;
        dst.write_i32::<LittleEndian>(point_count)?;
        Ok(())
    }
}

/// A contiguous run of entries, the building block of the hierarchy.
///
/// Entries keep their insertion order; the order carries no meaning.
#[derive(Debug, Clone)]
pub struct Page {
    pub key: VoxelKey,
    pub entries: Vec<Entry>,
    /// Readers materialize pages on demand; an unloaded page only has its
    /// location known and must not be mutated.
    pub loaded: bool,
}

impl Page {
    /// The EVLR identity each serialized page is framed with.
    pub const USER_ID: &'static str = "copc";
    pub const RECORD_ID: u16 = 1000;

    pub fn new(key: VoxelKey) -> Self {
        Self {
            key,
            entries: Vec::new(),
            loaded: true,
        }
    }

    pub fn byte_size(&self) -> u64 {
        self.entries.len() as u64 * Entry::SIZE
    }

    /// True when `key` may be stored in this page: the page's own key or
    /// any key in its sub-tree.
    pub fn covers(&self, key: &VoxelKey) -> bool {
        *key == self.key || self.key.is_ancestor_of(key)
    }

    /// Adds a node entry. The node key must lie in this page's sub-tree.
    pub fn add_node(&mut self, node: Node) -> crate::Result<()> {
        if !self.covers(&node.key) {
            return Err(CopcError::NotADescendant {
                page: self.key,
                key: node.key,
            });
        }
        self.entries.push(Entry::Node(node));
        Ok(())
    }

    /// Adds a pointer to a child page, which must be a strict descendant
    /// and not already referenced from this page.
    pub fn add_page_pointer(&mut self, pointer: PagePointer) -> crate::Result<()> {
        if !self.key.is_ancestor_of(&pointer.key) {
            return Err(CopcError::NotADescendant {
                page: self.key,
                key: pointer.key,
            });
        }
        if self
            .entries
            .iter()
            .any(|e| matches!(e, Entry::Page(p) if p.key == pointer.key))
        {
            return Err(CopcError::DuplicateKey(pointer.key));
        }
        self.entries.push(Entry::Page(pointer));
        Ok(())
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.entries.iter().filter_map(|e| match e {
            Entry::Node(node) => Some(node),
            _ => None,
        })
    }

    pub fn page_pointers(&self) -> impl Iterator<Item = &PagePointer> {
        self.entries.iter().filter_map(|e| match e {
            Entry::Page(pointer) => Some(pointer),
            _ => None,
        })
    }

    /// Parses a page payload, which must be a whole number of entries.
    pub fn from_payload(key: VoxelKey, payload: &[u8]) -> crate::Result<Self> {
        if payload.len() as u64 % Entry::SIZE != 0 {
            return Err(CopcError::TruncatedPage {
                key,
                byte_size: payload.len() as u64,
            });
        }
        let mut src = std::io::Cursor::new(payload);
        let mut entries = Vec::with_capacity(payload.len() / Entry::SIZE as usize);
        for _ in 0..payload.len() / Entry::SIZE as usize {
            entries.push(Entry::read_from(&mut src)?);
        }
        Ok(Self {
            key,
            entries,
            loaded: true,
        })
    }

    pub fn write_to<W: Write>(&self, dst: &mut W) -> crate::Result<()> {
        for entry in &self.entries {
            entry.write_to(dst)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_entry_codec_roundtrip() {
        let entries = [
            Entry::Node(Node {
                key: VoxelKey::new(5, 9, 7, 0),
                offset: 1234,
                byte_size: 5678,
                point_count: 12021,
            }),
            Entry::Page(PagePointer {
                key: VoxelKey::new(1, 1, 1, 1),
                offset: 98765,
                byte_size: 64,
            }),
            Entry::Empty(VoxelKey::new(2, 0, 1, 0)),
        ];
        for entry in entries {
            let mut buf = Vec::new();
            entry.write_to(&mut buf).unwrap();
            assert_eq!(buf.len() as u64, Entry::SIZE);
            let back = Entry::read_from(&mut std::io::Cursor::new(buf)).unwrap();
            assert_eq!(back, entry);
        }
    }

    #[test]
    fn test_page_pointer_wire_discriminant() {
        let mut buf = Vec::new();
        Entry::Page(PagePointer {
            key: VoxelKey::ROOT,
            offset: 1,
            byte_size: 32,
        })
        .write_to(&mut buf)
        .unwrap();
        // the last 4 bytes are the point count, -1 for pages
        assert_eq!(&buf[28..], &(-1i32).to_le_bytes());
    }

    #[test]
    fn test_point_count_below_minus_one_is_rejected() {
        let mut buf = Vec::new();
        VoxelKey::ROOT.write_to(&mut buf).unwrap();
        buf.extend_from_slice(&1i64.to_le_bytes());
        buf.extend_from_slice(&32i32.to_le_bytes());
        buf.extend_from_slice(&(-2i32).to_le_bytes());
        assert!(matches!(
            Entry::read_from(&mut std::io::Cursor::new(buf)),
            Err(CopcError::InvalidPointCount(-2))
        ));
    }

    #[test]
    fn test_page_byte_size() {
        let mut page = Page::new(VoxelKey::ROOT);
        assert_eq!(page.byte_size(), 0);
        page.add_node(Node {
            key: VoxelKey::new(1, 0, 0, 0),
            offset: 10,
            byte_size: 20,
            point_count: 1,
        })
        .unwrap();
        assert_eq!(page.byte_size(), 32);
    }

    #[test]
    fn test_page_rejects_foreign_keys() {
        let mut page = Page::new(VoxelKey::new(1, 1, 1, 1));
        let err = page.add_node(Node {
            key: VoxelKey::new(1, 1, 1, 0),
            offset: 10,
            byte_size: 20,
            point_count: 1,
        });
        assert!(matches!(err, Err(CopcError::NotADescendant { .. })));

        let err = page.add_page_pointer(PagePointer {
            key: VoxelKey::new(2, 4, 5, 0),
            offset: 0,
            byte_size: 0,
        });
        assert!(matches!(err, Err(CopcError::NotADescendant { .. })));

        // its own key may hold a node but not a sub-page
        assert!(page
            .add_node(Node {
                key: VoxelKey::new(1, 1, 1, 1),
                offset: 10,
                byte_size: 20,
                point_count: 1,
            })
            .is_ok());
        let err = page.add_page_pointer(PagePointer {
            key: VoxelKey::new(1, 1, 1, 1),
            offset: 0,
            byte_size: 0,
        });
        assert!(matches!(err, Err(CopcError::NotADescendant { .. })));
    }

    #[test]
    fn test_payload_must_be_multiple_of_entry_size() {
        let err = Page::from_payload(VoxelKey::ROOT, &[0u8; 33]);
        assert!(matches!(err, Err(CopcError::TruncatedPage { .. })));
        let page = Page::from_payload(VoxelKey::ROOT, &[]).unwrap();
        assert!(page.entries.is_empty());
    }
}
