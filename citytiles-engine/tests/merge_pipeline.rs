use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};

use citytiles_core::geometry::{LonLat, TileCoord, TileExtent, TilePolygon};
use citytiles_core::model::{GeoReference, IdSequence};
use citytiles_engine::converter::{ConversionFailure, MeshConverter};
use citytiles_engine::errors::EngineError;
use citytiles_engine::extraction::{ExtractOptions, extract};
use citytiles_engine::merge::{
    ExternalModel, MergeOptions, MergePipeline, MissPolicy, ModelOutcome, discover_models,
};
use citytiles_engine::resolver::resolve;
use citytiles_engine::spatial_index::SpatialIndex;
use citytiles_engine::synthesizer::MergeOutcome;
use citytiles_io::{KmlFacade, TileNaming, load_lookup_document};

const DATASET: &str = "Herne";

/// 记录调用并写出占位网格的转换器。
#[derive(Default)]
struct FakeConverter {
    calls: RefCell<Vec<(PathBuf, PathBuf)>>,
}

impl MeshConverter for FakeConverter {
    fn convert(&self, input: &Path, output: &Path) -> Result<(), ConversionFailure> {
        fs::create_dir_all(output.parent().expect("输出目录")).expect("创建输出目录失败");
        fs::write(output, "{\"asset\":{}}").expect("写入网格失败");
        self.calls
            .borrow_mut()
            .push((input.to_path_buf(), output.to_path_buf()));
        Ok(())
    }
}

struct FailingConverter;

impl MeshConverter for FailingConverter {
    fn convert(&self, _input: &Path, _output: &Path) -> Result<(), ConversionFailure> {
        Err(ConversionFailure::new("converter exited with status 1"))
    }
}

/// 把源网格原样复制到输出位置。
struct CopyingConverter;

impl MeshConverter for CopyingConverter {
    fn convert(&self, input: &Path, output: &Path) -> Result<(), ConversionFailure> {
        fs::create_dir_all(output.parent().expect("输出目录")).expect("创建输出目录失败");
        fs::copy(input, output).map_err(|err| ConversionFailure::new(err.to_string()))?;
        Ok(())
    }
}

fn tile_extent(coord: TileCoord) -> TileExtent {
    let south = 51.539 + 0.002 * coord.y as f64;
    let west = 7.220 + 0.002 * coord.x as f64;
    TileExtent::new(south + 0.002, south, west + 0.002, west)
}

fn tile_kml(naming: &TileNaming, coord: TileCoord, entities: &[(&str, GeoReference)]) -> String {
    let e = tile_extent(coord);
    let mut placemarks = String::new();
    for (name, geo) in entities {
        placemarks.push_str(&format!(
            "<Placemark><name>{name}</name><Model><altitudeMode>relativeToGround</altitudeMode>\
             <Location><longitude>{}</longitude><latitude>{}</latitude><altitude>{}</altitude></Location>\
             <Orientation><heading>{}</heading></Orientation>\
             <Link><href>{name}/{name}.dae</href></Link></Model></Placemark>",
            geo.longitude, geo.latitude, geo.altitude, geo.heading
        ));
    }
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<kml xmlns="http://www.opengis.net/kml/2.2"><Document><name>{}</name>{placemarks}
<Placemark><name>Tile border</name><LineString><coordinates>{w},{s} {e},{s} {e},{n} {w},{n} {w},{s}</coordinates></LineString></Placemark>
</Document></kml>"#,
        naming.tile_file_name(coord),
        w = e.west,
        s = e.south,
        e = e.east,
        n = e.north,
    )
}

fn folder_kml(naming: &TileNaming, coord: TileCoord) -> String {
    let e = tile_extent(coord);
    format!(
        "<Folder><name>{}</name><Region><LatLonAltBox><north>{}</north><south>{}</south><east>{}</east><west>{}</west></LatLonAltBox></Region>\
         <NetworkLink><name>Display as collada</name><Link><href>{}</href></Link></NetworkLink></Folder>",
        naming.folder_name(coord),
        e.north,
        e.south,
        e.east,
        e.west,
        naming.tile_href(coord)
    )
}

/// 两个瓦片 (0,0) 与 (0,1)，(0,0) 中已有两个建筑。
fn build_dataset(root: &Path) -> TileNaming {
    let naming = TileNaming::new(DATASET);
    let existing = [
        ("DENW_A", GeoReference::new(7.2205, 51.5395, 1.0, -3.4)),
        ("DENW_B", GeoReference::new(7.2215, 51.5405, 2.5, 178.0)),
    ];
    for (coord, entities) in [
        (TileCoord::new(0, 0), &existing[..]),
        (TileCoord::new(0, 1), &[][..]),
    ] {
        let path = naming.tile_document(root, coord);
        fs::create_dir_all(path.parent().expect("瓦片目录")).expect("创建瓦片目录失败");
        fs::write(&path, tile_kml(&naming, coord, entities)).expect("写入瓦片文档失败");
    }
    let folders = folder_kml(&naming, TileCoord::new(0, 0)) + &folder_kml(&naming, TileCoord::new(0, 1));
    fs::write(
        naming.root_document(root),
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<kml xmlns="http://www.opengis.net/kml/2.2"><Document><name>{DATASET}</name>{folders}</Document></kml>"#
        ),
    )
    .expect("写入根文档失败");
    naming
}

fn write_model(models: &Path, dir: &str, name: &str, lon: f64, lat: f64, heading: f64) -> PathBuf {
    let model_dir = models.join(dir);
    fs::create_dir_all(&model_dir).expect("创建模型目录失败");
    fs::write(model_dir.join("mesh.dae"), "<COLLADA/>").expect("写入网格失败");
    fs::write(
        model_dir.join("doc.kml"),
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<kml xmlns="http://www.opengis.net/kml/2.2"><Folder><Placemark><name>{name}</name><Model id="model_1">
<altitudeMode>relativeToGround</altitudeMode>
<Location><longitude>{lon}</longitude><latitude>{lat}</latitude><altitude>4.5</altitude></Location>
<Orientation><heading>{heading}</heading><tilt>0</tilt><roll>0</roll></Orientation>
<Link><href>mesh.dae</href></Link></Model></Placemark></Folder></kml>"#
        ),
    )
    .expect("写入模型文档失败");
    model_dir
}

fn snapshot(root: &Path, naming: &TileNaming) -> Vec<Option<String>> {
    [
        naming.tile_document(root, TileCoord::new(0, 0)),
        naming.tile_document(root, TileCoord::new(0, 1)),
        naming.root_document(root),
        naming.lookup_document(root),
    ]
    .iter()
    .map(|path| fs::read_to_string(path).ok())
    .collect()
}

#[test]
fn spatial_index_polygons_match_declared_extents() {
    let dir = tempfile::tempdir().expect("创建临时目录失败");
    let naming = build_dataset(dir.path());
    let index = SpatialIndex::build(dir.path(), &naming, &KmlFacade::new()).expect("构建索引失败");

    assert_eq!(index.len(), 2);
    for (coord, polygon) in index.iter() {
        assert_eq!(polygon, &TilePolygon::from_extent(&tile_extent(coord)));
        assert_eq!(polygon.ring()[0], polygon.ring()[4]);
    }
}

#[test]
fn spatial_index_reports_directory_without_document() {
    let dir = tempfile::tempdir().expect("创建临时目录失败");
    let naming = build_dataset(dir.path());
    fs::create_dir_all(dir.path().join("Tiles/0/2")).expect("创建目录失败");

    let err = SpatialIndex::build(dir.path(), &naming, &KmlFacade::new()).unwrap_err();
    match err {
        EngineError::TileRead { coord, path, .. } => {
            assert_eq!(coord, TileCoord::new(0, 2));
            assert_eq!(path, naming.tile_document(dir.path(), coord));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn merged_model_lands_in_containing_tile() {
    let dir = tempfile::tempdir().expect("创建临时目录失败");
    let root = dir.path().join("export");
    let naming = build_dataset(&root);
    let models = dir.path().join("models");
    write_model(&models, "station", "Station", 7.2210, 51.5400, 12.0);

    let facade = KmlFacade::new();
    let index = SpatialIndex::build(&root, &naming, &facade).expect("构建索引失败");
    assert_eq!(
        resolve(LonLat::new(7.2210, 51.5400), &index),
        Some(TileCoord::new(0, 0))
    );

    let converter = FakeConverter::default();
    let pipeline = MergePipeline::new(&root, &naming, &index, &facade, &facade, &converter);
    let report = pipeline.merge_all(&models).expect("合并失败");

    assert_eq!(
        report.models,
        vec![ModelOutcome::Merged {
            model: "Station".to_string(),
            coord: TileCoord::new(0, 0),
            outcome: MergeOutcome {
                placemark_added: true,
                folder_added: false,
                lookup_added: true,
            },
        }]
    );
    let calls = converter.calls.borrow();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, models.join("station/mesh.dae"));
    assert_eq!(calls[0].1, root.join("Tiles/0/0/Station/Station.gltf"));

    let lookup = load_lookup_document(&naming.lookup_document(&root)).expect("读取查找文档失败");
    assert_eq!(lookup.len(), 1);
    let entry = lookup.get("Station").expect("应存在查找记录");
    assert_eq!(entry.coord(), TileCoord::new(0, 0));
    assert_eq!(entry.envelope, tile_extent(TileCoord::new(0, 0)).envelope());
}

#[test]
fn point_outside_all_tiles_aborts_or_skips_per_policy() {
    let dir = tempfile::tempdir().expect("创建临时目录失败");
    let root = dir.path().join("export");
    let naming = build_dataset(&root);
    let models = dir.path().join("models");
    write_model(&models, "nowhere", "Nowhere", 0.0, 0.0, 0.0);

    let facade = KmlFacade::new();
    let index = SpatialIndex::build(&root, &naming, &facade).expect("构建索引失败");
    let converter = FakeConverter::default();
    let before = snapshot(&root, &naming);

    let abort = MergePipeline::new(&root, &naming, &index, &facade, &facade, &converter);
    let err = abort.merge_all(&models).unwrap_err();
    assert!(matches!(err, EngineError::GeometryResolutionMiss { ref model, .. } if model == "Nowhere"));

    let skip = MergePipeline::new(&root, &naming, &index, &facade, &facade, &converter)
        .with_options(MergeOptions {
            miss_policy: MissPolicy::Skip,
            ..MergeOptions::default()
        });
    let report = skip.merge_all(&models).expect("跳过策略不应失败");
    assert_eq!(report.skipped(), 1);
    assert!(matches!(
        &report.models[0],
        ModelOutcome::SkippedMiss { point, .. } if *point == LonLat::new(0.0, 0.0)
    ));

    assert!(converter.calls.borrow().is_empty());
    assert_eq!(snapshot(&root, &naming), before);
}

#[test]
fn converter_failure_leaves_documents_untouched() {
    let dir = tempfile::tempdir().expect("创建临时目录失败");
    let root = dir.path().join("export");
    let naming = build_dataset(&root);
    let models = dir.path().join("models");
    write_model(&models, "station", "Station", 7.2210, 51.5400, 12.0);

    let facade = KmlFacade::new();
    let index = SpatialIndex::build(&root, &naming, &facade).expect("构建索引失败");
    let before = snapshot(&root, &naming);

    let pipeline = MergePipeline::new(&root, &naming, &index, &facade, &facade, &FailingConverter);
    let err = pipeline.merge_all(&models).unwrap_err();
    match err {
        EngineError::Conversion {
            model, diagnostics, ..
        } => {
            assert_eq!(model, "Station");
            assert!(diagnostics.contains("status 1"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(snapshot(&root, &naming), before);
}

#[test]
fn merging_twice_is_idempotent() {
    let dir = tempfile::tempdir().expect("创建临时目录失败");
    let root = dir.path().join("export");
    let naming = build_dataset(&root);
    let models = dir.path().join("models");
    write_model(&models, "a_station", "Station", 7.2210, 51.5400, 12.0);
    write_model(&models, "b_depot", "Depot", 7.2211, 51.5421, 0.0);

    let facade = KmlFacade::new();
    let index = SpatialIndex::build(&root, &naming, &facade).expect("构建索引失败");
    let converter = FakeConverter::default();
    let pipeline = MergePipeline::new(&root, &naming, &index, &facade, &facade, &converter);

    pipeline.merge_all(&models).expect("首次合并失败");
    let first = snapshot(&root, &naming);
    let report = pipeline.merge_all(&models).expect("二次合并失败");
    assert_eq!(snapshot(&root, &naming), first);

    for outcome in &report.models {
        match outcome {
            ModelOutcome::Merged { outcome, .. } => assert!(outcome.is_noop()),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}

#[test]
fn duplicate_entity_ids_in_one_run_are_rejected_before_conversion() {
    let dir = tempfile::tempdir().expect("创建临时目录失败");
    let root = dir.path().join("export");
    let naming = build_dataset(&root);
    let models = dir.path().join("models");
    let first = write_model(&models, "a_station", "Station", 7.2210, 51.5400, 12.0);
    let second = write_model(&models, "b_station", "Station", 7.2212, 51.5402, 45.0);

    let facade = KmlFacade::new();
    let index = SpatialIndex::build(&root, &naming, &facade).expect("构建索引失败");
    let converter = FakeConverter::default();
    let before = snapshot(&root, &naming);

    let err = MergePipeline::new(&root, &naming, &index, &facade, &facade, &converter)
        .merge_all(&models)
        .unwrap_err();
    match err {
        EngineError::DuplicateModel {
            entity,
            first: a,
            second: b,
        } => {
            assert_eq!(entity, "Station");
            assert_eq!(a, first);
            assert_eq!(b, second);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(converter.calls.borrow().is_empty());
    assert!(!root.join("Tiles/0/0/Station").exists());
    assert_eq!(snapshot(&root, &naming), before);
}

#[test]
fn reused_entity_id_keeps_existing_mesh_and_documents() {
    let dir = tempfile::tempdir().expect("创建临时目录失败");
    let root = dir.path().join("export");
    let naming = build_dataset(&root);
    let facade = KmlFacade::new();
    let index = SpatialIndex::build(&root, &naming, &facade).expect("构建索引失败");
    let pipeline = MergePipeline::new(&root, &naming, &index, &facade, &facade, &CopyingConverter);

    let first_models = dir.path().join("first");
    let first_dir = write_model(&first_models, "station", "Station", 7.2210, 51.5400, 12.0);
    fs::write(first_dir.join("mesh.dae"), "FIRST").expect("写入网格失败");
    pipeline.merge_all(&first_models).expect("首次合并失败");

    let mesh = root.join("Tiles/0/0/Station/Station.gltf");
    assert_eq!(fs::read_to_string(&mesh).expect("读取网格失败"), "FIRST");
    let before = snapshot(&root, &naming);

    let second_models = dir.path().join("second");
    let second_dir = write_model(&second_models, "station", "Station", 7.2212, 51.5402, 45.0);
    fs::write(second_dir.join("mesh.dae"), "SECOND").expect("写入网格失败");
    let err = pipeline.merge_all(&second_models).unwrap_err();
    match err {
        EngineError::EntityConflict { model, coord, .. } => {
            assert_eq!(model, "Station");
            assert_eq!(coord, TileCoord::new(0, 0));
        }
        other => panic!("unexpected error: {other}"),
    }

    assert_eq!(fs::read_to_string(&mesh).expect("读取网格失败"), "FIRST");
    assert_eq!(snapshot(&root, &naming), before);
}

#[test]
fn extraction_round_trips_merged_georeference() {
    let dir = tempfile::tempdir().expect("创建临时目录失败");
    let root = dir.path().join("export");
    let naming = build_dataset(&root);
    let models = dir.path().join("models");
    let model_dir = write_model(&models, "station", "Station", 7.2210, 51.5400, 12.0);

    let facade = KmlFacade::new();
    let index = SpatialIndex::build(&root, &naming, &facade).expect("构建索引失败");
    let converter = FakeConverter::default();
    MergePipeline::new(&root, &naming, &index, &facade, &facade, &converter)
        .merge_all(&models)
        .expect("合并失败");

    let input = ExternalModel::load(&facade, &model_dir).expect("读取模型失败");
    let extraction = extract(
        &root,
        &naming,
        &facade,
        &mut IdSequence::new(),
        ExtractOptions::default(),
    )
    .expect("提取失败");

    let merged = extraction
        .entities
        .iter()
        .find(|entity| entity.entity_id == "Station")
        .expect("应包含合并的模型");
    assert_eq!(merged.georeference, input.placemark.georeference);
    assert_eq!(merged.tile, TileCoord::new(0, 0));

    let building = extraction
        .buildings
        .iter()
        .find(|record| record.entity.gml_id == "Station")
        .expect("应包含建筑记录");
    assert_eq!(building.entity.orientation.heading, 12.0 + 90.0);
    assert_eq!(building.entity.location.height, 4.5);
    assert!(building.path_to_model.is_absolute());
    assert!(building.path_to_model.ends_with("Tiles/0/0/Station/Station.gltf"));
    assert!(building.path_to_model.exists());
}

#[test]
fn extraction_assigns_ids_in_disk_order_and_is_repeatable() {
    let dir = tempfile::tempdir().expect("创建临时目录失败");
    let naming = build_dataset(dir.path());
    let facade = KmlFacade::new();
    let options = ExtractOptions {
        height_offset: 47.5,
        ..ExtractOptions::default()
    };

    let first = extract(dir.path(), &naming, &facade, &mut IdSequence::new(), options)
        .expect("提取失败");
    let ids: Vec<(u64, &str)> = first
        .buildings
        .iter()
        .map(|record| (record.entity.id, record.entity.gml_id.as_str()))
        .collect();
    assert_eq!(ids, vec![(1, "DENW_A"), (2, "DENW_B")]);
    assert_eq!(first.buildings[0].entity.orientation.heading, -3.4 + 90.0);
    assert_eq!(first.buildings[1].entity.location.height, 2.5 + 47.5);

    assert_eq!(first.index.tiles.len(), 2);
    assert_eq!(first.index.tiles[0].id, "Tile_0_0");
    assert_eq!(first.index.tiles[0].entities.len(), 2);
    assert!(first.index.tiles[1].entities.is_empty());
    assert_eq!(first.index.extent.north, tile_extent(TileCoord::new(0, 1)).north);
    assert_eq!(first.index.extent.south, tile_extent(TileCoord::new(0, 0)).south);

    let second = extract(dir.path(), &naming, &facade, &mut IdSequence::new(), options)
        .expect("提取失败");
    assert_eq!(first, second);
}

#[test]
fn discover_models_lists_only_model_directories_in_order() {
    let dir = tempfile::tempdir().expect("创建临时目录失败");
    write_model(dir.path(), "b", "B", 7.0, 51.0, 0.0);
    write_model(dir.path(), "a", "A", 7.0, 51.0, 0.0);
    fs::create_dir_all(dir.path().join("c_empty")).expect("创建目录失败");
    fs::write(dir.path().join("notes.txt"), "x").expect("写入失败");

    let found = discover_models(dir.path()).expect("枚举失败");
    assert_eq!(found, vec![dir.path().join("a"), dir.path().join("b")]);
}

#[test]
fn publish_uploads_converted_meshes_and_writes_indexes() {
    use citytiles_engine::publish::{DirectoryBlobStore, publish_assets};

    let dir = tempfile::tempdir().expect("创建临时目录失败");
    let root = dir.path().join("export");
    let naming = build_dataset(&root);
    let models = dir.path().join("models");
    write_model(&models, "station", "Station", 7.2210, 51.5400, 12.0);

    let facade = KmlFacade::new();
    let index = SpatialIndex::build(&root, &naming, &facade).expect("构建索引失败");
    MergePipeline::new(&root, &naming, &index, &facade, &facade, &FakeConverter::default())
        .merge_all(&models)
        .expect("合并失败");
    let extraction = extract(
        &root,
        &naming,
        &facade,
        &mut IdSequence::new(),
        ExtractOptions::default(),
    )
    .expect("提取失败");

    let store = DirectoryBlobStore::new(dir.path().join("store"));
    let out = dir.path().join("out");
    let report = publish_assets(&extraction, &store, &out).expect("发布失败");

    // DENW_A 与 DENW_B 没有转换后的网格
    assert_eq!(report.uploaded.len(), 1);
    assert_eq!(report.uploaded[0].key, "Station");
    let mut failed: Vec<&str> = report.failed.iter().map(|f| f.key.as_str()).collect();
    failed.sort_unstable();
    assert_eq!(failed, vec!["DENW_A", "DENW_B"]);
    assert!(store.root().join("Station.gltf").exists());

    let tiles: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(out.join("tiles.json")).expect("读取 tiles.json 失败"),
    )
    .expect("解析 tiles.json 失败");
    assert_eq!(tiles["tiles"][0]["entities"][2]["gmlId"], "Station");
    assert_eq!(tiles["tiles"][0]["entities"][2]["orientation"]["heading"], 102.0);

    let buildings: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(out.join("buildings.json")).expect("读取 buildings.json 失败"),
    )
    .expect("解析 buildings.json 失败");
    assert_eq!(buildings.as_array().map(Vec::len), Some(3));
    assert_eq!(buildings[2]["tile"], serde_json::json!([0, 0]));
}
