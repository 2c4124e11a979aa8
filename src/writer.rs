//! Writing COPC files: sequential chunk emission, in-memory hierarchy
//! construction and the finalization protocol.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

use byteorder::{LittleEndian, WriteBytesExt};
use laz::laszip::{ChunkTable, ChunkTableEntry};
use laz::LazVlr;
use tracing::debug;

use crate::compression;
use crate::config::CopcConfigWriter;
use crate::errors::CopcError;
use crate::extents::CopcExtents;
use crate::hierarchy::{Entry, Node, Page, PagePointer};
use crate::info::CopcInfo;
use crate::key::VoxelKey;
use crate::las::extra_bytes::EbVlr;
use crate::las::header::LasHeader;
use crate::las::point::Points;
use crate::las::vlr;
use crate::las::vlr::VlrHeader;

/// One chunk as it was appended: where it starts and how many points it
/// holds. The chunk table wants consecutive byte sizes instead, the
/// conversion happens when the table is written.
#[derive(Debug, Copy, Clone)]
struct ChunkDescriptor {
    offset: u64,
    point_count: u64,
}

/// Writes a COPC file to any seekable destination.
///
/// Compressed chunks are streamed out as nodes are added while the
/// hierarchy stays in memory; [`CopcWriter::close`] emits the chunk table,
/// the hierarchy and the metadata records, then rewrites the header with
/// the final offsets. A writer that is dropped without `close` leaves an
/// unreadable file behind.
pub struct CopcWriter<W: Write + Seek> {
    dest: W,
    config: CopcConfigWriter,
    laz_vlr: LazVlr,
    pages: HashMap<VoxelKey, Page>,
    node_keys: HashSet<VoxelKey>,
    chunks: Vec<ChunkDescriptor>,
    point_count: u64,
    offset_to_point_data: u64,
    open: bool,
}

impl CopcWriter<BufWriter<File>> {
    /// Creates the file at `path` and writes into it through a buffer.
    pub fn create_path<P: AsRef<Path>>(path: P, config: CopcConfigWriter) -> crate::Result<Self> {
        Self::new(BufWriter::new(File::create(path)?), config)
    }
}

impl<W: Write + Seek> CopcWriter<W> {
    /// Starts a file: reserves the pre-point section (header and VLRs plus
    /// the chunk table offset) and sets up the root hierarchy page.
    pub fn new(mut dest: W, mut config: CopcConfigWriter) -> crate::Result<Self> {
        let header = config.las_header();
        let laz_vlr = compression::build_laz_vlr(header.point_format_id, header.eb_byte_size())?;
        let laz_record_length = compression::laz_vlr_record(&laz_vlr)?.len() as u64;

        let eb_vlr = config.extra_bytes_vlr();
        let mut offset_to_point_data = LasHeader::SIZE + VlrHeader::SIZE + CopcInfo::PAYLOAD_SIZE;
        if !eb_vlr.is_empty() {
            offset_to_point_data += VlrHeader::SIZE + eb_vlr.record_length();
        }
        offset_to_point_data += VlrHeader::SIZE + laz_record_length;

        {
            let number_of_vlrs = if config.extra_bytes_vlr().is_empty() { 2 } else { 3 };
            let header = config.las_header_mut();
            header.offset_to_point_data = offset_to_point_data as u32;
            header.number_of_vlrs = number_of_vlrs;
        }

        dest.seek(SeekFrom::Start(0))?;
        Self::write_header_and_vlrs(&mut dest, &config, &laz_vlr)?;
        let position = dest.seek(SeekFrom::Current(0))?;
        if position > offset_to_point_data {
            return Err(CopcError::OffsetToPointDataExceeded {
                expected: offset_to_point_data,
                actual: position,
            });
        }

        // reserve the chunk table offset, patched on close
        dest.seek(SeekFrom::Start(offset_to_point_data))?;
        dest.write_i64::<LittleEndian>(-1)?;

        let mut pages = HashMap::new();
        pages.insert(VoxelKey::ROOT, Page::new(VoxelKey::ROOT));

        Ok(Self {
            dest,
            config,
            laz_vlr,
            pages,
            node_keys: HashSet::new(),
            chunks: Vec::new(),
            point_count: 0,
            offset_to_point_data,
            open: true,
        })
    }

    fn write_header_and_vlrs(
        dest: &mut W,
        config: &CopcConfigWriter,
        laz_vlr: &LazVlr,
    ) -> crate::Result<()> {
        config.las_header().write_to(dest)?;

        VlrHeader::new(
            CopcInfo::USER_ID,
            CopcInfo::RECORD_ID,
            CopcInfo::PAYLOAD_SIZE,
            "",
        )
        .write_to(dest)?;
        config.copc_info().write_to(dest)?;

        let eb_vlr = config.extra_bytes_vlr();
        if !eb_vlr.is_empty() {
            VlrHeader::new(vlr::EB_USER_ID, vlr::EB_RECORD_ID, eb_vlr.record_length(), "")
                .write_to(dest)?;
            eb_vlr.write_to(dest)?;
        }

        let laz_record = compression::laz_vlr_record(laz_vlr)?;
        VlrHeader::new(
            LazVlr::USER_ID,
            LazVlr::RECORD_ID,
            laz_record.len() as u64,
            LazVlr::DESCRIPTION,
        )
        .write_to(dest)?;
        dest.write_all(&laz_record)?;
        Ok(())
    }

    fn ensure_open(&self) -> crate::Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(CopcError::WriterClosed)
        }
    }

    pub fn config(&self) -> &CopcConfigWriter {
        &self.config
    }

    pub fn las_header(&self) -> &LasHeader {
        self.config.las_header()
    }

    pub fn las_header_mut(&mut self) -> &mut LasHeader {
        self.config.las_header_mut()
    }

    pub fn copc_info(&self) -> &CopcInfo {
        self.config.copc_info()
    }

    pub fn copc_info_mut(&mut self) -> &mut CopcInfo {
        self.config.copc_info_mut()
    }

    pub fn copc_extents(&self) -> &CopcExtents {
        self.config.copc_extents()
    }

    pub fn copc_extents_mut(&mut self) -> &mut CopcExtents {
        self.config.copc_extents_mut()
    }

    pub fn wkt(&self) -> &str {
        self.config.wkt()
    }

    pub fn extra_bytes_vlr(&self) -> &EbVlr {
        self.config.extra_bytes_vlr()
    }

    /// Points written so far.
    pub fn point_count(&self) -> u64 {
        self.point_count
    }

    pub fn root_page(&self) -> &Page {
        &self.pages[&VoxelKey::ROOT]
    }

    pub fn page(&self, key: VoxelKey) -> Option<&Page> {
        self.pages.get(&key)
    }

    /// Looks a node up in the in-memory hierarchy.
    pub fn find_node(&self, key: VoxelKey) -> Option<Node> {
        self.pages
            .values()
            .flat_map(Page::nodes)
            .find(|node| node.key == key)
            .copied()
    }

    /// Creates an empty page under `parent` and records a pointer entry
    /// with zero placeholders, back-patched on close.
    pub fn add_sub_page(&mut self, parent: VoxelKey, key: VoxelKey) -> crate::Result<&Page> {
        self.ensure_open()?;
        if !key.is_valid() {
            return Err(CopcError::InvalidKey(key));
        }
        if self.pages.contains_key(&key) {
            return Err(CopcError::DuplicateKey(key));
        }
        let parent_page = self
            .pages
            .get_mut(&parent)
            .ok_or(CopcError::PageNotFound(parent))?;
        parent_page.add_page_pointer(PagePointer {
            key,
            offset: 0,
            byte_size: 0,
        })?;
        self.pages.insert(key, Page::new(key));
        Ok(&self.pages[&key])
    }

    fn validate_node_key(&self, page_key: VoxelKey, key: VoxelKey) -> crate::Result<()> {
        if !key.is_valid() {
            return Err(CopcError::InvalidKey(key));
        }
        if !self.pages.contains_key(&page_key) {
            return Err(CopcError::PageNotFound(page_key));
        }
        let root_in_root = page_key == VoxelKey::ROOT && key == VoxelKey::ROOT;
        if !root_in_root && !page_key.is_ancestor_of(&key) {
            return Err(CopcError::NotADescendant {
                page: page_key,
                key,
            });
        }
        if self.node_keys.contains(&key) {
            return Err(CopcError::DuplicateKey(key));
        }
        Ok(())
    }

    /// Compresses `points` into a new chunk and records it as the node of
    /// `key` inside the page `page_key`.
    pub fn add_node(
        &mut self,
        page_key: VoxelKey,
        key: VoxelKey,
        points: &Points,
    ) -> crate::Result<Node> {
        self.ensure_open()?;
        if points.is_empty() {
            return Err(CopcError::EmptyNode(key));
        }
        if !points.matches(self.config.las_header()) {
            return Err(CopcError::PointsMismatch);
        }
        self.validate_node_key(page_key, key)?;
        let records = points.pack()?;

        let offset = self.dest.seek(SeekFrom::End(0))?;
        let byte_size = compression::compress_chunk(&mut self.dest, &self.laz_vlr, &records)?;
        self.finish_node(page_key, key, offset, byte_size, points.len() as u64)
    }

    /// Appends an already compressed chunk, byte for byte.
    pub fn add_node_compressed(
        &mut self,
        page_key: VoxelKey,
        key: VoxelKey,
        data: &[u8],
        point_count: u64,
    ) -> crate::Result<Node> {
        self.ensure_open()?;
        if point_count == 0 || data.is_empty() {
            return Err(CopcError::EmptyNode(key));
        }
        self.validate_node_key(page_key, key)?;

        let offset = self.dest.seek(SeekFrom::End(0))?;
        self.dest.write_all(data)?;
        self.finish_node(page_key, key, offset, data.len() as u64, point_count)
    }

    fn finish_node(
        &mut self,
        page_key: VoxelKey,
        key: VoxelKey,
        offset: u64,
        byte_size: u64,
        point_count: u64,
    ) -> crate::Result<Node> {
        if byte_size > i32::MAX as u64 {
            return Err(CopcError::ChunkTooLarge(byte_size));
        }
        if point_count > i32::MAX as u64 {
            return Err(CopcError::ChunkTooLarge(point_count));
        }
        let node = Node {
            key,
            offset,
            byte_size,
            point_count,
        };
        self.pages
            .get_mut(&page_key)
            .expect("validated above")
            .add_node(node)?;
        self.node_keys.insert(key);
        self.chunks.push(ChunkDescriptor {
            offset,
            point_count,
        });
        self.point_count += point_count;
        Ok(node)
    }

    fn write_chunk_table(&mut self) -> crate::Result<u64> {
        let table_offset = self.dest.seek(SeekFrom::End(0))?;
        if self.chunks.len() > u32::MAX as usize {
            return Err(CopcError::TooManyChunks(self.chunks.len()));
        }
        debug!("writing chunk table with {} chunks", self.chunks.len());

        // chunks are contiguous: each descriptor's size is the distance to
        // the next chunk start, the last one ends at the table itself
        let mut table = ChunkTable::with_capacity(self.chunks.len());
        for (i, chunk) in self.chunks.iter().enumerate() {
            let end = self
                .chunks
                .get(i + 1)
                .map(|next| next.offset)
                .unwrap_or(table_offset);
            table.push(ChunkTableEntry {
                point_count: chunk.point_count,
                byte_count: end - chunk.offset,
            });
        }
        table.write_to(&mut self.dest, &self.laz_vlr)?;

        // patch the offset reserved at the start of the point data
        self.dest.seek(SeekFrom::Start(self.offset_to_point_data))?;
        self.dest.write_i64::<LittleEndian>(table_offset as i64)?;
        self.dest.seek(SeekFrom::End(0))?;
        Ok(table_offset)
    }

    /// Serializes the page tree post-order so every pointer can be patched
    /// with its target's location; the root page comes out last. Returns
    /// the root page payload offset and size.
    fn write_page(&mut self, key: VoxelKey) -> crate::Result<(u64, u64)> {
        let child_keys: Vec<VoxelKey> = self.pages[&key]
            .page_pointers()
            .map(|pointer| pointer.key)
            .collect();
        let mut locations = HashMap::new();
        for child in child_keys {
            locations.insert(child, self.write_page(child)?);
        }

        let page = self.pages.get_mut(&key).expect("pages are never removed");
        for entry in &mut page.entries {
            if let Entry::Page(pointer) = entry {
                let (offset, byte_size) = locations[&pointer.key];
                pointer.offset = offset;
                pointer.byte_size = byte_size;
            }
        }

        let page = &self.pages[&key];
        let byte_size = page.byte_size();
        VlrHeader::new_extended(Page::USER_ID, Page::RECORD_ID, byte_size, &key.to_string())
            .write_to(&mut self.dest)?;
        let offset = self.dest.seek(SeekFrom::Current(0))?;
        page.write_to(&mut self.dest)?;
        Ok((offset, byte_size))
    }

    fn write_extents_evlr(&mut self) -> crate::Result<()> {
        let header = self.config.las_header();
        let byte_size = CopcExtents::byte_size(
            header.point_format_id,
            self.config.extra_bytes_vlr().items.len(),
        )?;
        VlrHeader::new_extended(CopcExtents::USER_ID, CopcExtents::RECORD_ID, byte_size, "")
            .write_to(&mut self.dest)?;
        let (min, max) = (header.min, header.max);
        self.config.copc_extents().write_to(&mut self.dest, min, max)?;
        Ok(())
    }

    fn write_wkt_evlr(&mut self) -> crate::Result<()> {
        let wkt = self.config.wkt().as_bytes().to_vec();
        VlrHeader::new_extended(vlr::WKT_USER_ID, vlr::WKT_RECORD_ID, wkt.len() as u64, "")
            .write_to(&mut self.dest)?;
        self.dest.write_all(&wkt)?;
        Ok(())
    }

    /// Finalizes the file. Idempotent; afterwards the writer only serves
    /// read access to its configuration.
    ///
    /// The tail is laid out as: chunk table, hierarchy pages (one EVLR
    /// each, root last), the extents EVLR and, when a WKT is configured,
    /// the WKT EVLR. The header and the COPC info VLR are then rewritten
    /// with the final counts and offsets.
    pub fn close(&mut self) -> crate::Result<()> {
        if !self.open {
            return Ok(());
        }
        self.write_chunk_table()?;

        let evlr_offset = self.dest.seek(SeekFrom::End(0))?;
        let mut evlr_count = self.pages.len() as u32;
        debug!("writing {} hierarchy pages", self.pages.len());

        let (root_hier_offset, root_hier_size) = self.write_page(VoxelKey::ROOT)?;
        {
            let info = self.config.copc_info_mut();
            info.root_hier_offset = root_hier_offset;
            info.root_hier_size = root_hier_size;
        }

        self.write_extents_evlr()?;
        evlr_count += 1;
        if !self.config.wkt().is_empty() {
            self.write_wkt_evlr()?;
            evlr_count += 1;
        }

        {
            let point_count = self.point_count;
            let header = self.config.las_header_mut();
            header.point_count = point_count;
            header.evlr_offset = evlr_offset;
            header.evlr_count = evlr_count;
        }

        self.dest.seek(SeekFrom::Start(0))?;
        Self::write_header_and_vlrs(&mut self.dest, &self.config, &self.laz_vlr)?;
        self.dest.flush()?;
        self.open = false;
        Ok(())
    }

    /// Hands the destination back. The writer must have been closed,
    /// otherwise the stream holds an unfinished file.
    pub fn into_inner(self) -> W {
        self.dest
    }
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use super::*;
    use crate::geometry::Vector3;

    fn new_writer(format: u8) -> CopcWriter<Cursor<Vec<u8>>> {
        CopcWriter::new(
            Cursor::new(Vec::new()),
            CopcConfigWriter::new(format).unwrap(),
        )
        .unwrap()
    }

    fn one_point_batch(writer: &CopcWriter<Cursor<Vec<u8>>>) -> Points {
        let mut points = Points::for_header(writer.las_header()).unwrap();
        points.push(crate::las::point::Point::default());
        points
    }

    #[test]
    fn test_pre_point_section_layout() {
        let writer = new_writer(6);
        // header + copc info vlr + laz vlr (34 + 6 for the single item)
        let expected = 375 + 54 + 160 + 54 + 40;
        assert_eq!(writer.offset_to_point_data, expected);
        assert_eq!(writer.las_header().number_of_vlrs, 2);
        // the chunk table offset placeholder is reserved
        assert_eq!(writer.dest.get_ref().len() as u64, expected + 8);
    }

    #[test]
    fn test_add_node_validations() {
        let mut writer = new_writer(6);
        let points = one_point_batch(&writer);

        assert!(matches!(
            writer.add_node(VoxelKey::ROOT, VoxelKey::INVALID, &points),
            Err(CopcError::InvalidKey(_))
        ));
        assert!(matches!(
            writer.add_node(VoxelKey::new(1, 0, 0, 0), VoxelKey::new(2, 0, 0, 0), &points),
            Err(CopcError::PageNotFound(_))
        ));

        let empty = Points::for_header(writer.las_header()).unwrap();
        assert!(matches!(
            writer.add_node(VoxelKey::ROOT, VoxelKey::ROOT, &empty),
            Err(CopcError::EmptyNode(_))
        ));

        let mismatched = Points::new(
            6,
            0,
            Vector3::new(1.0, 1.0, 1.0),
            Vector3::default_offset(),
        )
        .unwrap();
        let mismatched = {
            let mut p = mismatched;
            p.push(crate::las::point::Point::default());
            p
        };
        assert!(matches!(
            writer.add_node(VoxelKey::ROOT, VoxelKey::ROOT, &mismatched),
            Err(CopcError::PointsMismatch)
        ));

        writer.add_node(VoxelKey::ROOT, VoxelKey::ROOT, &points).unwrap();
        assert!(matches!(
            writer.add_node(VoxelKey::ROOT, VoxelKey::ROOT, &points),
            Err(CopcError::DuplicateKey(_))
        ));
        assert_eq!(writer.point_count(), 1);
        assert!(writer.find_node(VoxelKey::ROOT).is_some());
        assert!(writer.find_node(VoxelKey::new(5, 4, 3, 2)).is_none());
    }

    #[test]
    fn test_sub_page_validations() {
        let mut writer = new_writer(6);

        assert!(matches!(
            writer.add_sub_page(VoxelKey::ROOT, VoxelKey::INVALID),
            Err(CopcError::InvalidKey(_))
        ));

        let sub = writer
            .add_sub_page(VoxelKey::ROOT, VoxelKey::new(1, 1, 1, 1))
            .unwrap();
        assert!(sub.loaded);
        let sub_key = sub.key;

        // not a descendant of the sub page
        assert!(matches!(
            writer.add_sub_page(sub_key, VoxelKey::new(1, 1, 1, 0)),
            Err(CopcError::NotADescendant { .. })
        ));
        assert!(matches!(
            writer.add_sub_page(sub_key, VoxelKey::new(2, 4, 5, 0)),
            Err(CopcError::NotADescendant { .. })
        ));
        // a page key may exist only once
        assert!(matches!(
            writer.add_sub_page(VoxelKey::ROOT, VoxelKey::new(1, 1, 1, 1)),
            Err(CopcError::DuplicateKey(_))
        ));
        // a page is not its own sub page
        assert!(matches!(
            writer.add_sub_page(sub_key, sub_key),
            Err(CopcError::DuplicateKey(_) | CopcError::NotADescendant { .. })
        ));
    }

    #[test]
    fn test_mutation_after_close_is_rejected() {
        let mut writer = new_writer(6);
        let points = one_point_batch(&writer);
        writer.close().unwrap();
        // close is idempotent
        writer.close().unwrap();

        assert!(matches!(
            writer.add_node(VoxelKey::ROOT, VoxelKey::ROOT, &points),
            Err(CopcError::WriterClosed)
        ));
        assert!(matches!(
            writer.add_sub_page(VoxelKey::ROOT, VoxelKey::new(1, 0, 0, 0)),
            Err(CopcError::WriterClosed)
        ));
    }
}
