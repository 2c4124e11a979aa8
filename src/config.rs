//! File configuration: the LAS header base, COPC descriptors, WKT and
//! extra bytes, bundled the way readers hand them out and writers consume
//! them.

use crate::errors::CopcError;
use crate::extents::CopcExtents;
use crate::geometry::Vector3;
use crate::info::CopcInfo;
use crate::las::extra_bytes::EbVlr;
use crate::las::header::LasHeader;

/// Everything that describes a COPC file apart from its points and
/// hierarchy. Readers expose it as a read-only view; to write a new file,
/// turn it into a [`CopcConfigWriter`].
#[derive(Debug, Clone)]
pub struct CopcConfig {
    pub(crate) las_header: LasHeader,
    pub(crate) copc_info: CopcInfo,
    pub(crate) copc_extents: CopcExtents,
    pub(crate) wkt: String,
    pub(crate) eb_vlr: EbVlr,
}

impl CopcConfig {
    pub fn las_header(&self) -> &LasHeader {
        &self.las_header
    }

    pub fn copc_info(&self) -> &CopcInfo {
        &self.copc_info
    }

    pub fn copc_extents(&self) -> &CopcExtents {
        &self.copc_extents
    }

    pub fn wkt(&self) -> &str {
        &self.wkt
    }

    pub fn extra_bytes_vlr(&self) -> &EbVlr {
        &self.eb_vlr
    }
}

/// Configuration of a file being written: same data as [`CopcConfig`] but
/// with builder methods and mutable views. The writer is its exclusive
/// owner once construction starts.
#[derive(Debug, Clone)]
pub struct CopcConfigWriter {
    config: CopcConfig,
}

impl CopcConfigWriter {
    /// A default configuration for the given point format (6, 7 or 8):
    /// scale 0.01, zero offset, no WKT, no extra bytes.
    pub fn new(point_format_id: u8) -> crate::Result<Self> {
        let base = LasHeader::base_point_record_length(point_format_id)?;
        let mut las_header = LasHeader::default();
        las_header.point_format_id = point_format_id;
        las_header.point_record_length = base;
        Ok(Self {
            config: CopcConfig {
                copc_extents: CopcExtents::new(point_format_id, 0)?,
                las_header,
                copc_info: CopcInfo::default(),
                wkt: String::new(),
                eb_vlr: EbVlr::default(),
            },
        })
    }

    pub fn with_scale(mut self, scale: Vector3) -> Self {
        self.config.las_header.scale = scale;
        self
    }

    pub fn with_offset(mut self, offset: Vector3) -> Self {
        self.config.las_header.offset = offset;
        self
    }

    pub fn with_wkt(mut self, wkt: &str) -> Self {
        self.config.wkt = wkt.to_owned();
        self
    }

    /// Declares extra bytes fields. The point record length and the extent
    /// array grow accordingly.
    pub fn with_extra_bytes(mut self, eb_vlr: EbVlr) -> crate::Result<Self> {
        let header = &mut self.config.las_header;
        let base = LasHeader::base_point_record_length(header.point_format_id)?;
        header.point_record_length = base + eb_vlr.byte_size();
        self.config.copc_extents =
            CopcExtents::new(header.point_format_id, eb_vlr.items.len())?;
        self.config.eb_vlr = eb_vlr;
        Ok(self)
    }

    pub fn config(&self) -> &CopcConfig {
        &self.config
    }

    pub fn las_header(&self) -> &LasHeader {
        &self.config.las_header
    }

    pub fn las_header_mut(&mut self) -> &mut LasHeader {
        &mut self.config.las_header
    }

    pub fn copc_info(&self) -> &CopcInfo {
        &self.config.copc_info
    }

    pub fn copc_info_mut(&mut self) -> &mut CopcInfo {
        &mut self.config.copc_info
    }

    pub fn copc_extents(&self) -> &CopcExtents {
        &self.config.copc_extents
    }

    pub fn copc_extents_mut(&mut self) -> &mut CopcExtents {
        &mut self.config.copc_extents
    }

    pub fn wkt(&self) -> &str {
        &self.config.wkt
    }

    pub fn extra_bytes_vlr(&self) -> &EbVlr {
        &self.config.eb_vlr
    }

    pub(crate) fn into_config(self) -> CopcConfig {
        self.config
    }
}

/// Seeds a writer configuration from an existing file: bounds, grid,
/// spacing, WKT and extra bytes survive, counters and offsets start over.
impl From<CopcConfig> for CopcConfigWriter {
    fn from(mut config: CopcConfig) -> Self {
        config.las_header.point_count = 0;
        config.las_header.points_by_return = [0; 15];
        config.las_header.offset_to_point_data = 0;
        config.las_header.number_of_vlrs = 0;
        config.las_header.evlr_offset = 0;
        config.las_header.evlr_count = 0;
        config.las_header.start_of_waveform = 0;
        config.copc_info.root_hier_offset = 0;
        config.copc_info.root_hier_size = 0;
        Self { config }
    }
}

impl TryFrom<u8> for CopcConfigWriter {
    type Error = CopcError;

    fn try_from(point_format_id: u8) -> crate::Result<Self> {
        Self::new(point_format_id)
    }
}
