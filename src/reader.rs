//! Reading COPC files: VLR discovery, on-demand hierarchy traversal and
//! point decompression.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use laz::LazVlr;
use tracing::{debug, warn};

use crate::compression;
use crate::config::CopcConfig;
use crate::errors::CopcError;
use crate::extents::CopcExtents;
use crate::geometry::Bounds;
use crate::hierarchy::{Entry, Node, Page, PagePointer};
use crate::info::CopcInfo;
use crate::key::VoxelKey;
use crate::las::extra_bytes::EbVlr;
use crate::las::header::LasHeader;
use crate::las::point::Points;
use crate::las::vlr;
use crate::las::vlr::VlrHeader;

/// Reads a COPC file from any seekable source.
///
/// Opening parses the LAS header and all (E)VLR headers, locates the COPC
/// descriptors and the laszip VLR; no hierarchy page is touched until a
/// query needs it. Loaded pages are cached for the lifetime of the reader.
pub struct CopcReader<R> {
    src: R,
    config: CopcConfig,
    laz_vlr: LazVlr,
    /// Every (E)VLR of the file, keyed by the absolute offset of its header
    vlrs: BTreeMap<u64, VlrHeader>,
    /// Loaded hierarchy pages
    pages: HashMap<VoxelKey, Page>,
    /// Where known but not yet loaded pages live
    page_locations: HashMap<VoxelKey, PagePointer>,
}

impl CopcReader<BufReader<File>> {
    /// Opens a file from a path through a buffered reader.
    pub fn from_path<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        Self::new(BufReader::new(File::open(path)?))
    }
}

impl<R: Read + Seek> CopcReader<R> {
    pub fn new(mut src: R) -> crate::Result<Self> {
        src.seek(SeekFrom::Start(0))?;
        let las_header = LasHeader::read_from(&mut src)?;
        if !matches!(las_header.point_format_id, 6..=8) {
            return Err(CopcError::UnsupportedPointFormat(las_header.point_format_id));
        }

        let vlrs = Self::read_vlr_headers(&mut src, &las_header)?;

        let copc_info = Self::read_copc_info(&mut src, &vlrs)?;
        let eb_vlr = Self::read_extra_bytes_vlr(&mut src, &vlrs)?;
        let copc_extents = Self::read_extents_vlr(&mut src, &vlrs, &las_header, &eb_vlr)?;
        let wkt = Self::read_wkt_vlr(&mut src, &vlrs)?;
        let laz_vlr = Self::read_laszip_vlr(&mut src, &vlrs)?;

        let mut page_locations = HashMap::new();
        page_locations.insert(
            VoxelKey::ROOT,
            PagePointer {
                key: VoxelKey::ROOT,
                offset: copc_info.root_hier_offset,
                byte_size: copc_info.root_hier_size,
            },
        );

        Ok(Self {
            src,
            config: CopcConfig {
                las_header,
                copc_info,
                copc_extents,
                wkt,
                eb_vlr,
            },
            laz_vlr,
            vlrs,
            pages: HashMap::new(),
            page_locations,
        })
    }

    fn read_vlr_headers(
        src: &mut R,
        las_header: &LasHeader,
    ) -> crate::Result<BTreeMap<u64, VlrHeader>> {
        let mut vlrs = BTreeMap::new();

        let mut pos = src.seek(SeekFrom::Start(LasHeader::SIZE))?;
        for _ in 0..las_header.number_of_vlrs {
            let header = VlrHeader::read_from(src)?;
            let skip = header.record_length;
            vlrs.insert(pos, header);
            pos = src.seek(SeekFrom::Current(skip as i64))?;
        }

        if las_header.evlr_count > 0 {
            let mut pos = src.seek(SeekFrom::Start(las_header.evlr_offset))?;
            for _ in 0..las_header.evlr_count {
                let header = VlrHeader::read_extended_from(src)?;
                let skip = header.record_length;
                vlrs.insert(pos, header);
                pos = src.seek(SeekFrom::Current(skip as i64))?;
            }
        }

        Ok(vlrs)
    }

    /// Position of the payload of the first record matching the identity.
    fn find_vlr(vlrs: &BTreeMap<u64, VlrHeader>, user_id: &str, record_id: u16) -> Option<u64> {
        vlrs.iter()
            .find(|(_, header)| header.matches(user_id, record_id))
            .map(|(offset, header)| offset + header.size())
    }

    fn read_copc_info(src: &mut R, vlrs: &BTreeMap<u64, VlrHeader>) -> crate::Result<CopcInfo> {
        match Self::find_vlr(vlrs, CopcInfo::USER_ID, CopcInfo::RECORD_ID) {
            // COPC pins the payload to byte 429, anything else is not COPC
            Some(offset) if offset == CopcInfo::PAYLOAD_OFFSET => {
                src.seek(SeekFrom::Start(offset))?;
                Ok(CopcInfo::read_from(src)?)
            }
            _ => Err(CopcError::CopcInfoVlrNotFound),
        }
    }

    fn read_extra_bytes_vlr(
        src: &mut R,
        vlrs: &BTreeMap<u64, VlrHeader>,
    ) -> crate::Result<EbVlr> {
        let found = vlrs
            .iter()
            .find(|(_, h)| h.matches(vlr::EB_USER_ID, vlr::EB_RECORD_ID));
        match found {
            Some((offset, header)) => {
                src.seek(SeekFrom::Start(offset + header.size()))?;
                Ok(EbVlr::read_from(src, header.record_length)?)
            }
            None => Ok(EbVlr::default()),
        }
    }

    fn read_extents_vlr(
        src: &mut R,
        vlrs: &BTreeMap<u64, VlrHeader>,
        las_header: &LasHeader,
        eb_vlr: &EbVlr,
    ) -> crate::Result<CopcExtents> {
        let found = vlrs
            .iter()
            .find(|(_, h)| h.matches(CopcExtents::USER_ID, CopcExtents::RECORD_ID));
        match found {
            Some((offset, header)) => {
                src.seek(SeekFrom::Start(offset + header.size()))?;
                CopcExtents::read_from(
                    &mut *src,
                    header.record_length,
                    las_header.point_format_id,
                    eb_vlr.items.len(),
                )
            }
            None => CopcExtents::new(las_header.point_format_id, eb_vlr.items.len()),
        }
    }

    fn read_wkt_vlr(src: &mut R, vlrs: &BTreeMap<u64, VlrHeader>) -> crate::Result<String> {
        let found = vlrs
            .iter()
            .find(|(_, h)| h.matches(vlr::WKT_USER_ID, vlr::WKT_RECORD_ID));
        match found {
            Some((offset, header)) => {
                src.seek(SeekFrom::Start(offset + header.size()))?;
                let mut bytes = vec![0u8; header.record_length as usize];
                src.read_exact(&mut bytes)?;
                let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
                Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
            }
            None => Ok(String::new()),
        }
    }

    fn read_laszip_vlr(src: &mut R, vlrs: &BTreeMap<u64, VlrHeader>) -> crate::Result<LazVlr> {
        let found = vlrs
            .iter()
            .find(|(_, h)| h.matches(LazVlr::USER_ID, LazVlr::RECORD_ID));
        match found {
            Some((offset, header)) => {
                src.seek(SeekFrom::Start(offset + header.size()))?;
                let mut bytes = vec![0u8; header.record_length as usize];
                src.read_exact(&mut bytes)?;
                Ok(LazVlr::from_buffer(&bytes)?)
            }
            None => Err(CopcError::LaszipVlrNotFound),
        }
    }

    pub fn config(&self) -> &CopcConfig {
        &self.config
    }

    pub fn las_header(&self) -> &LasHeader {
        self.config.las_header()
    }

    pub fn copc_info(&self) -> &CopcInfo {
        self.config.copc_info()
    }

    pub fn copc_extents(&self) -> &CopcExtents {
        self.config.copc_extents()
    }

    pub fn wkt(&self) -> &str {
        self.config.wkt()
    }

    pub fn extra_bytes_vlr(&self) -> &EbVlr {
        self.config.extra_bytes_vlr()
    }

    /// All (E)VLR headers of the file, keyed by absolute header offset.
    pub fn vlrs(&self) -> &BTreeMap<u64, VlrHeader> {
        &self.vlrs
    }

    /// Loads a page into the cache, remembering the sub pages it points to.
    fn load_page(&mut self, key: VoxelKey) -> crate::Result<()> {
        if self.pages.contains_key(&key) {
            return Ok(());
        }
        let location = *self
            .page_locations
            .get(&key)
            .ok_or(CopcError::PageNotFound(key))?;
        if location.byte_size % Entry::SIZE != 0 {
            return Err(CopcError::TruncatedPage {
                key,
                byte_size: location.byte_size,
            });
        }
        debug!(
            "loading hierarchy page {} ({} bytes at {})",
            key, location.byte_size, location.offset
        );
        self.src.seek(SeekFrom::Start(location.offset))?;
        let mut payload = vec![0u8; location.byte_size as usize];
        self.src.read_exact(&mut payload)?;
        let page = Page::from_payload(key, &payload)?;
        for pointer in page.page_pointers() {
            self.page_locations.entry(pointer.key).or_insert(*pointer);
        }
        self.pages.insert(key, page);
        Ok(())
    }

    /// Finds the node storing the chunk of `key`, loading pages on the way.
    ///
    /// `Ok(None)` for absent or invalid keys; only I/O and format problems
    /// are errors.
    pub fn find_node(&mut self, key: VoxelKey) -> crate::Result<Option<Node>> {
        if !key.is_valid() {
            return Ok(None);
        }
        let mut page_key = VoxelKey::ROOT;
        loop {
            self.load_page(page_key)?;
            let page = &self.pages[&page_key];
            let mut next_page = None;
            for entry in &page.entries {
                match entry {
                    Entry::Node(node) if node.key == key => return Ok(Some(*node)),
                    // descending must make progress, a pointer that does
                    // not go deeper would loop on malformed input
                    Entry::Page(pointer)
                        if (pointer.key == key || pointer.key.is_ancestor_of(&key))
                            && pointer.key.d > page_key.d =>
                    {
                        next_page = Some(pointer.key);
                    }
                    _ => {}
                }
            }
            match next_page {
                Some(next) => page_key = next,
                None => return Ok(None),
            }
        }
    }

    /// Depth-first walk over the pages relevant to the sub-tree of `root`,
    /// handing every node to `visit`. `descend` can prune whole pages.
    fn walk_nodes<F, P>(&mut self, root: VoxelKey, mut descend: P, mut visit: F) -> crate::Result<()>
    where
        F: FnMut(Node),
        P: FnMut(&VoxelKey) -> bool,
    {
        let mut visited = std::collections::HashSet::new();
        let mut stack = vec![VoxelKey::ROOT];
        while let Some(page_key) = stack.pop() {
            if !visited.insert(page_key) {
                continue;
            }
            self.load_page(page_key)?;
            let page = &self.pages[&page_key];
            let mut sub_pages = Vec::new();
            let mut found = Vec::new();
            for entry in &page.entries {
                match entry {
                    Entry::Node(node) => {
                        if (node.key == root || root.is_ancestor_of(&node.key))
                            && descend(&node.key)
                        {
                            found.push(*node);
                        }
                    }
                    Entry::Page(pointer) => {
                        // descend into pages on the path to `root` and into
                        // pages inside its sub-tree
                        let on_path = pointer.key == root
                            || pointer.key.is_ancestor_of(&root)
                            || root.is_ancestor_of(&pointer.key);
                        if on_path && descend(&pointer.key) {
                            sub_pages.push(pointer.key);
                        }
                    }
                    Entry::Empty(_) => {}
                }
            }
            for node in found {
                visit(node);
            }
            stack.extend(sub_pages);
        }
        Ok(())
    }

    /// Every node in the sub-tree of `key`, the node of `key` included.
    pub fn get_all_children(&mut self, key: VoxelKey) -> crate::Result<Vec<Node>> {
        if !key.is_valid() {
            return Ok(Vec::new());
        }
        let mut nodes = Vec::new();
        self.walk_nodes(key, |_| true, |node| nodes.push(node))?;
        Ok(nodes)
    }

    /// Every node of the file.
    pub fn get_all_nodes(&mut self) -> crate::Result<Vec<Node>> {
        self.get_all_children(VoxelKey::ROOT)
    }

    /// Keys of every hierarchy page.
    pub fn get_page_list(&mut self) -> crate::Result<Vec<VoxelKey>> {
        // walk everything so all page pointers are discovered
        self.walk_nodes(VoxelKey::ROOT, |_| true, |_| {})?;
        let mut keys: Vec<VoxelKey> = self.page_locations.keys().copied().collect();
        keys.sort_by_key(|k| (k.d, k.x, k.y, k.z));
        Ok(keys)
    }

    /// The octree depth matching a requested resolution.
    ///
    /// Zero or negative asks for the deepest level present in the file;
    /// otherwise the first depth whose sample spacing is at least as fine
    /// as `resolution` is selected, capped at the deepest level present.
    pub fn depth_at_resolution(&mut self, resolution: f64) -> crate::Result<i32> {
        let mut max_depth = -1;
        self.walk_nodes(
            VoxelKey::ROOT,
            |_| true,
            |node| max_depth = max_depth.max(node.key.d),
        )?;
        if resolution <= 0.0 {
            return Ok(max_depth);
        }
        let mut current = self.config.copc_info().spacing;
        for depth in 0..=max_depth {
            if current <= resolution {
                return Ok(depth);
            }
            current /= 2.0;
        }
        Ok(max_depth)
    }

    /// All nodes exactly at the depth selected by `resolution`.
    pub fn get_nodes_at_resolution(&mut self, resolution: f64) -> crate::Result<Vec<Node>> {
        let depth = self.depth_at_resolution(resolution)?;
        let mut nodes = Vec::new();
        self.walk_nodes(
            VoxelKey::ROOT,
            |key| key.d <= depth,
            |node| {
                if node.key.d == depth {
                    nodes.push(node)
                }
            },
        )?;
        Ok(nodes)
    }

    /// All nodes at or above the depth selected by `resolution`.
    pub fn get_nodes_within_resolution(&mut self, resolution: f64) -> crate::Result<Vec<Node>> {
        let depth = self.depth_at_resolution(resolution)?;
        let mut nodes = Vec::new();
        self.walk_nodes(
            VoxelKey::ROOT,
            |key| key.d <= depth,
            |node| nodes.push(node),
        )?;
        Ok(nodes)
    }

    fn get_nodes_by_box<F>(
        &mut self,
        bounds: &Bounds,
        resolution: f64,
        accept: F,
    ) -> crate::Result<Vec<Node>>
    where
        F: Fn(&VoxelKey, &LasHeader, &Bounds) -> bool,
    {
        let max_depth = if resolution > 0.0 {
            self.depth_at_resolution(resolution)?
        } else {
            VoxelKey::MAX_DEPTH
        };
        let header = self.config.las_header().clone();
        let bounds = *bounds;
        let mut nodes = Vec::new();
        self.walk_nodes(
            VoxelKey::ROOT,
            // a voxel's box contains all of its descendants' boxes, so a
            // page whose key does not intersect can be skipped entirely
            |key| key.d <= max_depth && key.intersects(&header, &bounds),
            |node| {
                if accept(&node.key, &header, &bounds) {
                    nodes.push(node)
                }
            },
        )?;
        Ok(nodes)
    }

    /// Nodes whose voxel lies entirely inside `bounds`, optionally cut off
    /// at the depth matching `resolution` (0 means no cut-off).
    pub fn get_nodes_within_box(
        &mut self,
        bounds: &Bounds,
        resolution: f64,
    ) -> crate::Result<Vec<Node>> {
        self.get_nodes_by_box(bounds, resolution, |key, header, bounds| {
            key.within(header, bounds)
        })
    }

    /// Nodes whose voxel intersects `bounds`.
    pub fn get_nodes_intersect_box(
        &mut self,
        bounds: &Bounds,
        resolution: f64,
    ) -> crate::Result<Vec<Node>> {
        self.get_nodes_by_box(bounds, resolution, |key, header, bounds| {
            key.intersects(header, bounds)
        })
    }

    /// The compressed chunk of a node, exactly as stored.
    pub fn get_point_data_compressed(&mut self, node: &Node) -> crate::Result<Vec<u8>> {
        self.src.seek(SeekFrom::Start(node.offset))?;
        let mut data = vec![0u8; node.byte_size as usize];
        self.src.read_exact(&mut data)?;
        Ok(data)
    }

    /// The decompressed raw records of a node,
    /// `point_count * point_record_length` bytes.
    pub fn get_point_data(&mut self, node: &Node) -> crate::Result<Vec<u8>> {
        self.src.seek(SeekFrom::Start(node.offset))?;
        compression::decompress_chunk(&mut self.src, &self.laz_vlr, node.point_count)
    }

    /// The decompressed, parsed points of a node.
    pub fn get_points(&mut self, node: &Node) -> crate::Result<Points> {
        let data = self.get_point_data(node)?;
        let header = self.config.las_header();
        Points::unpack(
            &data,
            header.point_format_id,
            header.point_record_length,
            header.scale,
            header.offset,
        )
    }

    /// Every point of every node within `resolution` (0 reads everything),
    /// merged into one batch.
    pub fn get_all_points(&mut self, resolution: f64) -> crate::Result<Points> {
        let nodes = self.get_nodes_within_resolution(resolution)?;
        let mut all = Points::for_header(self.config.las_header())?;
        for node in nodes {
            all.extend(&self.get_points(&node)?);
        }
        Ok(all)
    }

    /// Points inside `bounds` from every node intersecting it.
    pub fn get_points_within_box(
        &mut self,
        bounds: &Bounds,
        resolution: f64,
    ) -> crate::Result<Points> {
        let nodes = self.get_nodes_intersect_box(bounds, resolution)?;
        let mut selected = Points::for_header(self.config.las_header())?;
        for node in nodes {
            for point in self.get_points(&node)?.points() {
                if bounds.contains(point.position()) {
                    selected.push(point.clone());
                }
            }
        }
        Ok(selected)
    }

    /// Checks that every point of every node lies inside both the node's
    /// voxel and the header bounds. With `verbose`, each violation is
    /// logged.
    pub fn validate_spatial_bounds(&mut self, verbose: bool) -> crate::Result<bool> {
        let header = self.config.las_header().clone();
        let header_bounds = header.bounds();
        let mut valid = true;
        for node in self.get_all_nodes()? {
            let node_bounds = node.key.bounds(&header);
            for point in self.get_points(&node)?.points() {
                let position = point.position();
                if !node_bounds.contains(position) {
                    valid = false;
                    if verbose {
                        warn!(
                            "point ({}, {}, {}) is outside of its node {}",
                            position.x, position.y, position.z, node.key
                        );
                    }
                }
                if !header_bounds.contains(position) {
                    valid = false;
                    if verbose {
                        warn!(
                            "point ({}, {}, {}) is outside of the file bounds",
                            position.x, position.y, position.z
                        );
                    }
                }
            }
        }
        Ok(valid)
    }
}
