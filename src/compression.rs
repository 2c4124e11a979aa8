//! The boundary to the LAZ codec: one compressor or decompressor per
//! chunk, since every COPC node is an independent variable-size chunk.

use std::io::{Read, Seek, SeekFrom, Write};

use byteorder::{LittleEndian, WriteBytesExt};
use laz::record::{
    LayeredPointRecordCompressor, LayeredPointRecordDecompressor, RecordCompressor,
    RecordDecompressor,
};
use laz::{LazItemRecordBuilder, LazVlr};

/// Builds the laszip VLR of a new file: layered chunked compression with
/// variable-size chunks, items derived from the point format and the extra
/// bytes width.
///
/// The record is assembled by hand and round-tripped through
/// [`LazVlr::from_buffer`]; the resulting bytes are exactly what
/// [`laz_vlr_record`] later writes into the file.
pub(crate) fn build_laz_vlr(point_format_id: u8, eb_byte_size: u16) -> crate::Result<LazVlr> {
    let record = laz_vlr_record_from_items(point_format_id, eb_byte_size)?;
    Ok(LazVlr::from_buffer(&record)?)
}

/// The serialized laszip VLR payload.
pub(crate) fn laz_vlr_record(vlr: &LazVlr) -> crate::Result<Vec<u8>> {
    let mut record = Vec::new();
    vlr.write_to(&mut record)?;
    Ok(record)
}

fn laz_vlr_record_from_items(point_format_id: u8, eb_byte_size: u16) -> crate::Result<Vec<u8>> {
    let items = LazItemRecordBuilder::default_for_point_format_id(point_format_id, eb_byte_size)?;

    let mut record = Vec::with_capacity(34 + 6 * items.len());
    // formats 6..8 always use the layered chunked compressor
    record.write_u16::<LittleEndian>(3)?;
    // coder: arithmetic, the only one defined
    record.write_u16::<LittleEndian>(0)?;
    // version of the compressor
    record.write_u8(2)?;
    record.write_u8(2)?;
    record.write_u16::<LittleEndian>(0)?;
    // options
    record.write_u32::<LittleEndian>(0)?;
    // chunk size: the variable-size sentinel
    record.write_u32::<LittleEndian>(u32::MAX)?;
    // special evlrs, unused
    record.write_i64::<LittleEndian>(-1)?;
    record.write_i64::<LittleEndian>(-1)?;
    record.write_u16::<LittleEndian>(items.len() as u16)?;
    for item in &items {
        record.write_u16::<LittleEndian>(u16::from(item.item_type()))?;
        record.write_u16::<LittleEndian>(item.size())?;
        record.write_u16::<LittleEndian>(item.version())?;
    }
    Ok(record)
}

/// Compresses one chunk of raw point records at the current position of
/// `dst` and returns the number of bytes written.
pub(crate) fn compress_chunk<W: Write + Seek>(
    dst: &mut W,
    vlr: &LazVlr,
    records: &[u8],
) -> crate::Result<u64> {
    let start = dst.seek(SeekFrom::Current(0))?;
    let mut compressor = LayeredPointRecordCompressor::new(&mut *dst);
    compressor.set_fields_from(vlr.items())?;
    let record_size = compressor.record_size();
    for record in records.chunks_exact(record_size) {
        compressor.compress_next(record)?;
    }
    compressor.done()?;
    drop(compressor);
    let end = dst.seek(SeekFrom::Current(0))?;
    Ok(end - start)
}

/// Decompresses one chunk of `point_count` records; `src` must be
/// positioned at the chunk start.
pub(crate) fn decompress_chunk<R: Read + Seek>(
    src: &mut R,
    vlr: &LazVlr,
    point_count: u64,
) -> crate::Result<Vec<u8>> {
    let mut decompressor = LayeredPointRecordDecompressor::new(&mut *src);
    decompressor.set_fields_from(vlr.items())?;
    let record_size = decompressor.record_size();
    let mut out = vec![0u8; record_size * point_count as usize];
    for record in out.chunks_exact_mut(record_size) {
        decompressor.decompress_next(record)?;
    }
    Ok(out)
}
