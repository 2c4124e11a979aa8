//! Library to read and write Cloud Optimized Point Cloud (COPC) files.
//!
//! A COPC file is a LAS 1.4 / LAZ file whose points are organized into an
//! octree of compressed chunks, with an embedded hierarchy that maps voxel
//! keys to those chunks. Spatial and level-of-detail subsets can therefore
//! be read without scanning the whole file.
//!
//! Reading:
//!
//! ```no_run
//! use copc::{CopcReader, VoxelKey};
//!
//! fn main() -> copc::Result<()> {
//!     let mut reader = CopcReader::from_path("autzen-classified.copc.laz")?;
//!     if let Some(node) = reader.find_node(VoxelKey::new(5, 9, 7, 0))? {
//!         let points = reader.get_points(&node)?;
//!         println!("{} points", points.len());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! Writing:
//!
//! ```no_run
//! use copc::{CopcConfigWriter, CopcWriter, Point, Points, VoxelKey};
//!
//! fn main() -> copc::Result<()> {
//!     let config = CopcConfigWriter::new(6)?;
//!     let mut writer = CopcWriter::create_path("out.copc.laz", config)?;
//!     let mut points = Points::for_header(writer.las_header())?;
//!     points.push(Point::default());
//!     writer.add_node(VoxelKey::ROOT, VoxelKey::ROOT, &points)?;
//!     writer.close()
//! }
//! ```

pub mod config;
pub mod errors;
pub mod extents;
pub mod geometry;
pub mod hierarchy;
pub mod info;
pub mod key;
pub mod las;
pub mod reader;
pub mod writer;

mod compression;

pub use config::{CopcConfig, CopcConfigWriter};
pub use errors::CopcError;
pub use extents::{CopcExtent, CopcExtents};
pub use geometry::{Bounds, Vector3};
pub use hierarchy::{Entry, Node, Page, PagePointer};
pub use info::CopcInfo;
pub use key::VoxelKey;
pub use las::{EbItem, EbVlr, LasHeader, Point, Points};
pub use reader::CopcReader;
pub use writer::CopcWriter;

pub type Result<T> = std::result::Result<T, CopcError>;
