use std::io::Cursor;

use copc::{
    CopcConfigWriter, CopcError, CopcReader, CopcWriter, EbVlr, Point, Points, Vector3, VoxelKey,
};

fn write_with<F>(config: CopcConfigWriter, build: F) -> Cursor<Vec<u8>>
where
    F: FnOnce(&mut CopcWriter<Cursor<Vec<u8>>>),
{
    let mut writer = CopcWriter::new(Cursor::new(Vec::new()), config).unwrap();
    build(&mut writer);
    writer.close().unwrap();
    writer.into_inner()
}

#[test]
fn test_default_writer_empty_file() {
    let stream = write_with(CopcConfigWriter::new(6).unwrap(), |_| {});

    let mut reader = CopcReader::new(stream).unwrap();
    let header = reader.las_header();
    assert_eq!(header.point_count, 0);
    assert_eq!(header.scale.z, 0.01);
    assert_eq!(header.offset.z, 0.0);
    assert_eq!(header.point_format_id, 6);
    assert_eq!(header.point_record_length, 30);

    let info = reader.copc_info();
    assert!(info.root_hier_offset > 0);
    assert_eq!(info.root_hier_size, 0);

    assert!(reader.wkt().is_empty());
    assert!(reader.extra_bytes_vlr().is_empty());
    assert_eq!(reader.get_all_nodes().unwrap().len(), 0);
}

#[test]
fn test_unsupported_point_formats_are_rejected() {
    assert!(matches!(
        CopcConfigWriter::new(5),
        Err(CopcError::UnsupportedPointFormat(5))
    ));
    assert!(matches!(
        CopcConfigWriter::new(9),
        Err(CopcError::UnsupportedPointFormat(9))
    ));
}

#[test]
fn test_custom_scale_offset_roundtrip() {
    let config = CopcConfigWriter::new(8)
        .unwrap()
        .with_scale(Vector3::new(2.0, 3.0, 4.0))
        .with_offset(Vector3::new(-0.02, -0.03, -40.8));
    let stream = write_with(config, |writer| {
        writer.las_header_mut().file_source_id = 200;
        writer
            .las_header_mut()
            .set_system_identifier("test_string")
            .unwrap();
    });

    let mut reader = CopcReader::new(stream).unwrap();
    let header = reader.las_header();
    assert_eq!(header.file_source_id, 200);
    assert_eq!(header.point_format_id, 8);
    assert_eq!(header.scale, Vector3::new(2.0, 3.0, 4.0));
    assert_eq!(header.offset, Vector3::new(-0.02, -0.03, -40.8));
    assert_eq!(header.system_identifier(), "test_string");
    assert_eq!(reader.get_all_nodes().unwrap().len(), 0);
}

#[test]
fn test_string_attributes_are_bounded() {
    let mut config = CopcConfigWriter::new(8).unwrap();
    assert!(config
        .las_header_mut()
        .set_system_identifier(&"a".repeat(33))
        .is_err());
    assert!(config
        .las_header_mut()
        .set_generating_software(&"a".repeat(33))
        .is_err());
    assert!(config.las_header_mut().set_system_identifier("ok").is_ok());
}

#[test]
fn test_nested_pages() {
    let stream = write_with(CopcConfigWriter::new(6).unwrap(), |writer| {
        let sub = writer
            .add_sub_page(VoxelKey::ROOT, VoxelKey::new(1, 1, 1, 1))
            .unwrap();
        let sub_key = sub.key;
        assert!(sub.loaded);

        // neither key is below the sub page
        assert!(writer
            .add_sub_page(sub_key, VoxelKey::new(1, 1, 1, 0))
            .is_err());
        assert!(writer
            .add_sub_page(sub_key, VoxelKey::new(2, 4, 5, 0))
            .is_err());
        assert!(writer
            .add_sub_page(VoxelKey::ROOT, VoxelKey::INVALID)
            .is_err());
    });

    let mut reader = CopcReader::new(stream).unwrap();
    assert!(reader.copc_info().root_hier_offset > 0);
    // one page pointer entry in the root page
    assert_eq!(reader.copc_info().root_hier_size, 32);
    assert!(reader.find_node(VoxelKey::INVALID).unwrap().is_none());
    assert_eq!(
        reader.get_page_list().unwrap(),
        vec![VoxelKey::ROOT, VoxelKey::new(1, 1, 1, 1)]
    );
}

#[test]
fn test_extra_bytes_data_type_0() {
    let mut eb_vlr = EbVlr::with_field_count(1);
    eb_vlr.items[0].data_type = 0;
    eb_vlr.items[0].options = 4;
    let config = CopcConfigWriter::new(7)
        .unwrap()
        .with_extra_bytes(eb_vlr)
        .unwrap();
    assert_eq!(config.las_header().point_record_length, 40); // 36 + 4

    let stream = write_with(config, |_| {});
    let mut reader = CopcReader::new(stream).unwrap();
    let items = &reader.extra_bytes_vlr().items;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].data_type, 0);
    assert_eq!(items[0].options, 4);
    assert_eq!(items[0].name, "FIELD_0");
    assert_eq!(items[0].max[2], 0);
    assert_eq!(items[0].min[2], 0);
    assert_eq!(items[0].offset[2], 0.0);
    assert_eq!(items[0].scale[2], 0.0);
    assert_eq!(reader.las_header().point_record_length, 40);
}

#[test]
fn test_extra_bytes_data_type_29() {
    let mut eb_vlr = EbVlr::with_field_count(1);
    eb_vlr.items[0].data_type = 29;
    let config = CopcConfigWriter::new(7)
        .unwrap()
        .with_extra_bytes(eb_vlr)
        .unwrap();
    assert_eq!(config.las_header().point_record_length, 48); // 36 + 12

    let stream = write_with(config, |_| {});
    let mut reader = CopcReader::new(stream).unwrap();
    assert_eq!(reader.extra_bytes_vlr().items.len(), 1);
    assert_eq!(reader.las_header().point_record_length, 48);
}

#[test]
fn test_header_updates_survive_the_roundtrip() {
    let min = Vector3::new(-20.0, -30.0, -40.0);
    let max = Vector3::new(20.0, 30.0, 40.0);
    let points_by_return: [u64; 15] = std::array::from_fn(|i| i as u64 + 1);

    let stream = write_with(CopcConfigWriter::new(6).unwrap(), |writer| {
        writer.las_header_mut().min = min;
        writer.las_header_mut().max = max;
        writer.las_header_mut().points_by_return = points_by_return;
        writer.copc_info_mut().spacing = 36.3711;
    });

    let mut reader = CopcReader::new(stream).unwrap();
    assert_eq!(reader.las_header().min, min);
    assert_eq!(reader.las_header().max, max);
    assert_eq!(reader.las_header().points_by_return, points_by_return);
    assert_eq!(reader.copc_info().spacing, 36.3711);
    assert_eq!(reader.get_all_nodes().unwrap().len(), 0);
}

fn grid_points(writer: &CopcWriter<Cursor<Vec<u8>>>, seeds: &[(f64, f64, f64)]) -> Points {
    let mut points = Points::for_header(writer.las_header()).unwrap();
    for (i, &(x, y, z)) in seeds.iter().enumerate() {
        points.push(Point {
            x,
            y,
            z,
            intensity: i as u16,
            return_number: 1,
            number_of_returns: 1,
            gps_time: i as f64 * 0.5,
            red: 100,
            green: 200,
            blue: 300,
            ..Default::default()
        });
    }
    points
}

#[test]
fn test_node_roundtrip() {
    let config = CopcConfigWriter::new(7).unwrap();
    let mut written = Vec::new();
    let stream = write_with(config, |writer| {
        writer.las_header_mut().min = Vector3::new(0.0, 0.0, 0.0);
        writer.las_header_mut().max = Vector3::new(10.0, 10.0, 10.0);

        let root_points = grid_points(writer, &[(5.0, 5.0, 5.0), (2.0, 7.0, 3.0)]);
        written.push(
            writer
                .add_node(VoxelKey::ROOT, VoxelKey::ROOT, &root_points)
                .unwrap(),
        );

        let sub = writer
            .add_sub_page(VoxelKey::ROOT, VoxelKey::new(1, 1, 1, 1))
            .unwrap();
        let sub_key = sub.key;
        let sub_points = grid_points(writer, &[(7.0, 8.0, 9.0)]);
        written.push(writer.add_node(sub_key, sub_key, &sub_points).unwrap());
    });

    let mut reader = CopcReader::new(stream).unwrap();
    assert_eq!(reader.las_header().point_count, 3);

    for node in &written {
        let found = reader.find_node(node.key).unwrap().expect("node exists");
        assert_eq!(found, *node);

        let compressed = reader.get_point_data_compressed(&found).unwrap();
        assert_eq!(compressed.len() as u64, found.byte_size);

        let raw = reader.get_point_data(&found).unwrap();
        assert_eq!(
            raw.len() as u64,
            found.point_count * u64::from(reader.las_header().point_record_length)
        );
    }

    let root_node = reader.find_node(VoxelKey::ROOT).unwrap().unwrap();
    let points = reader.get_points(&root_node).unwrap();
    assert_eq!(points.len(), 2);
    assert_eq!(points.points()[0].x, 5.0);
    assert_eq!(points.points()[0].intensity, 0);
    assert_eq!(points.points()[1].y, 7.0);
    assert_eq!(points.points()[1].gps_time, 0.5);
    assert_eq!(points.points()[1].red, 100);

    assert!(reader.find_node(VoxelKey::new(5, 4, 3, 2)).unwrap().is_none());
    assert!(reader.validate_spatial_bounds(false).unwrap());
}

#[test]
fn test_compressed_chunks_are_copied_bit_exact() {
    // first file, written from raw points
    let stream = write_with(CopcConfigWriter::new(6).unwrap(), |writer| {
        writer.las_header_mut().min = Vector3::new(0.0, 0.0, 0.0);
        writer.las_header_mut().max = Vector3::new(10.0, 10.0, 10.0);
        let points = grid_points(writer, &[(1.0, 2.0, 3.0), (4.0, 5.0, 6.0), (7.0, 8.0, 9.0)]);
        writer
            .add_node(VoxelKey::ROOT, VoxelKey::ROOT, &points)
            .unwrap();
    });
    let mut source = CopcReader::new(stream).unwrap();
    let node = source.find_node(VoxelKey::ROOT).unwrap().unwrap();
    let compressed = source.get_point_data_compressed(&node).unwrap();
    let raw = source.get_point_data(&node).unwrap();

    // second file, seeded with the compressed chunk of the first
    let config = CopcConfigWriter::from(source.config().clone());
    let stream = write_with(config, |writer| {
        writer
            .add_node_compressed(VoxelKey::ROOT, VoxelKey::ROOT, &compressed, node.point_count)
            .unwrap();
    });

    let mut copy = CopcReader::new(stream).unwrap();
    let copied_node = copy.find_node(VoxelKey::ROOT).unwrap().unwrap();
    assert_eq!(copied_node.point_count, node.point_count);
    assert_eq!(copied_node.byte_size, node.byte_size);
    assert_eq!(copy.get_point_data_compressed(&copied_node).unwrap(), compressed);
    assert_eq!(copy.get_point_data(&copied_node).unwrap(), raw);
}

#[test]
fn test_configuration_copy() {
    let mut eb_vlr = EbVlr::with_field_count(1);
    eb_vlr.items[0].data_type = 0;
    eb_vlr.items[0].options = 4;
    let config = CopcConfigWriter::new(7)
        .unwrap()
        .with_wkt("TEST_WKT")
        .with_extra_bytes(eb_vlr)
        .unwrap();
    let stream = write_with(config, |writer| {
        writer.las_header_mut().min = Vector3::new(-800.0, 300.0, 800.0);
        writer.las_header_mut().max = Vector3::new(5000.0, 8444.0, 3333.0);
        writer.copc_info_mut().spacing = 36.3711;
    });
    let source = CopcReader::new(stream).unwrap();

    let copied = CopcConfigWriter::from(source.config().clone())
        .with_scale(Vector3::new(1.0, 1.0, 1.0))
        .with_offset(Vector3::new(50.0, 50.0, 50.0));
    let stream = write_with(copied, |_| {});

    let mut reader = CopcReader::new(stream).unwrap();
    let header = reader.las_header();
    assert_eq!(header.scale, Vector3::new(1.0, 1.0, 1.0));
    assert_eq!(header.offset, Vector3::new(50.0, 50.0, 50.0));
    assert_eq!(header.min, Vector3::new(-800.0, 300.0, 800.0));
    assert_eq!(header.max, Vector3::new(5000.0, 8444.0, 3333.0));
    assert_eq!(header.point_count, 0);
    assert_eq!(header.point_record_length, 40);
    assert_eq!(reader.copc_info().spacing, 36.3711);
    assert_eq!(reader.wkt(), "TEST_WKT");
    assert_eq!(reader.extra_bytes_vlr(), source.extra_bytes_vlr());
    assert_eq!(reader.get_all_nodes().unwrap().len(), 0);
}

#[test]
fn test_garbage_input_is_not_a_copc_file() {
    assert!(CopcReader::new(Cursor::new(vec![0u8; 1024])).is_err());

    // a LAS header alone is not enough, the COPC info VLR is mandatory
    let mut config = CopcConfigWriter::new(6).unwrap();
    config.las_header_mut().point_count = 0;
    let mut bytes = Vec::new();
    config.las_header().write_to(&mut bytes).unwrap();
    bytes.resize(2048, 0);
    assert!(CopcReader::new(Cursor::new(bytes)).is_err());
}
