use std::fmt;

use crate::key::VoxelKey;

/// Errors of this crate.
///
/// Every failure is propagated to the caller, nothing is retried or
/// recovered internally.
#[derive(Debug)]
pub enum CopcError {
    /// Point formats other than 6, 7 and 8 cannot be stored in a COPC file
    UnsupportedPointFormat(u8),
    /// An extent with `min > max` or a negative variance
    InvalidExtent { min: f64, max: f64, variance: f64 },
    /// The number of extents does not match the point format / extra bytes
    InvalidExtentCount { expected: usize, actual: usize },
    /// `system_identifier` and `generating_software` are 32 bytes at most
    StringTooLong { field: &'static str, len: usize },
    /// The voxel key has out of range coordinates or is a sentinel
    InvalidKey(VoxelKey),
    /// The key already has a node or a page somewhere in the hierarchy
    DuplicateKey(VoxelKey),
    /// The key does not belong to the sub-tree of the target page
    NotADescendant { page: VoxelKey, key: VoxelKey },
    /// No page with that key exists in the writer's hierarchy
    PageNotFound(VoxelKey),
    /// A node must hold at least one point
    EmptyNode(VoxelKey),
    /// The points do not match the file's point format or scale/offset
    PointsMismatch,
    /// A scaled coordinate does not fit in the 32 bit integer record field
    CoordinateOutOfRange(f64),
    /// The mandatory COPC info VLR is missing or not at file offset 429
    CopcInfoVlrNotFound,
    /// The file does not start with a LAS 1.4 header
    NotLas14 { major: u8, minor: u8 },
    /// A VLR payload has an unexpected size
    InvalidVlrSize { user_id: &'static str, size: u64 },
    /// The laszip VLR, needed to decompress points, is missing
    LaszipVlrNotFound,
    /// A hierarchy page payload is not a whole number of 32 byte entries
    TruncatedPage { key: VoxelKey, byte_size: u64 },
    /// A hierarchy entry with a point count below -1
    InvalidPointCount(i32),
    /// The LAS header and VLRs overran the reserved pre-point section
    OffsetToPointDataExceeded { expected: u64, actual: u64 },
    /// The chunk table stores counts on 32 bits
    TooManyChunks(usize),
    /// A chunk or page does not fit the 32 bit entry size field
    ChunkTooLarge(u64),
    /// The writer was already closed
    WriterClosed,
    IoError(std::io::Error),
    LasZipError(laz::LasZipError),
}

impl From<std::io::Error> for CopcError {
    fn from(e: std::io::Error) -> Self {
        CopcError::IoError(e)
    }
}

impl From<laz::LasZipError> for CopcError {
    fn from(e: laz::LasZipError) -> Self {
        CopcError::LasZipError(e)
    }
}

impl fmt::Display for CopcError {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        match self {
            CopcError::UnsupportedPointFormat(id) => {
                write!(f, "point format {} is not supported, must be 6, 7 or 8", id)
            }
            CopcError::InvalidExtent { min, max, variance } => write!(
                f,
                "invalid extent (min: {}, max: {}, variance: {})",
                min, max, variance
            ),
            CopcError::InvalidExtentCount { expected, actual } => write!(
                f,
                "wrong number of extents, expected {} but got {}",
                expected, actual
            ),
            CopcError::StringTooLong { field, len } => {
                write!(f, "{} is {} bytes long, the maximum is 32", field, len)
            }
            CopcError::InvalidKey(key) => write!(f, "invalid voxel key {}", key),
            CopcError::DuplicateKey(key) => {
                write!(f, "key {} is already present in the hierarchy", key)
            }
            CopcError::NotADescendant { page, key } => {
                write!(f, "key {} is not a descendant of page {}", key, page)
            }
            CopcError::PageNotFound(key) => write!(f, "no page with key {}", key),
            CopcError::EmptyNode(key) => write!(f, "node {} would contain no points", key),
            CopcError::PointsMismatch => write!(
                f,
                "the points' format or scale/offset do not match the file header"
            ),
            CopcError::CoordinateOutOfRange(v) => {
                write!(f, "scaled coordinate {} does not fit in an i32", v)
            }
            CopcError::CopcInfoVlrNotFound => {
                write!(f, "COPC info VLR not found at file offset 429")
            }
            CopcError::NotLas14 { major, minor } => {
                write!(f, "not a LAS 1.4 file (version is {}.{})", major, minor)
            }
            CopcError::InvalidVlrSize { user_id, size } => {
                write!(f, "VLR '{}' has unexpected size {}", user_id, size)
            }
            CopcError::LaszipVlrNotFound => write!(f, "laszip VLR not found"),
            CopcError::TruncatedPage { key, byte_size } => {
                write!(f, "hierarchy page {} has truncated size {}", key, byte_size)
            }
            CopcError::InvalidPointCount(count) => {
                write!(f, "hierarchy entry with invalid point count {}", count)
            }
            CopcError::OffsetToPointDataExceeded { expected, actual } => write!(
                f,
                "header and VLRs end at {} which is past the offset to point data {}",
                actual, expected
            ),
            CopcError::TooManyChunks(count) => write!(
                f,
                "{} chunks cannot be stored in a 32 bit chunk table",
                count
            ),
            CopcError::ChunkTooLarge(size) => {
                write!(f, "chunk of {} bytes overflows the entry size field", size)
            }
            CopcError::WriterClosed => write!(f, "the writer is closed"),
            CopcError::IoError(e) => write!(f, "IoError: {}", e),
            CopcError::LasZipError(e) => write!(f, "LasZipError: {}", e),
        }
    }
}

impl std::error::Error for CopcError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CopcError::IoError(e) => Some(e),
            CopcError::LasZipError(e) => Some(e),
            _ => None,
        }
    }
}
