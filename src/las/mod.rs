//! The LAS 1.4 side of a COPC file: the public header, the variable length
//! record headers and the point records of formats 6, 7 and 8.

pub mod extra_bytes;
pub mod header;
pub mod point;
pub mod vlr;

pub use extra_bytes::{EbItem, EbVlr};
pub use header::LasHeader;
pub use point::{Point, Points};
pub use vlr::VlrHeader;
