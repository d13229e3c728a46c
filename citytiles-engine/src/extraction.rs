use std::path::{Path, PathBuf};

use citytiles_core::geometry::{TileCoord, TileExtent, TilePolygon};
use citytiles_core::model::{HEADING_OFFSET_DEGREES, IdSequence, TileEntity};
use citytiles_io::naming::gltf_href;
use citytiles_io::records::{
    BuildingRecord, EntityRecord, Location, Orientation, TileIndex, TileRecord,
};
use citytiles_io::{
    DocumentLoader, IoError, TileNaming, load_root_document, load_tile_document, write_json,
};
use tracing::{debug, info, warn};

use crate::errors::EngineError;

pub const TILES_JSON: &str = "tiles.json";
pub const BUILDINGS_JSON: &str = "buildings.json";

/// 提取时施加到客户端记录上的固定偏移。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtractOptions {
    pub heading_offset: f64,
    /// 垂直基准偏移（如大地水准面差距），叠加到每个高度上。
    pub height_offset: f64,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            heading_offset: HEADING_OFFSET_DEGREES,
            height_offset: 0.0,
        }
    }
}

/// 一次提取的全部结果。三者来自同一次遍历，顺序一致。
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub index: TileIndex,
    pub buildings: Vec<BuildingRecord>,
    pub entities: Vec<TileEntity>,
}

/// 按根文档中的文件夹顺序遍历瓦片，瓦片内按地标的磁盘顺序分配数字 ID。
/// 只读磁盘，不做任何修改；给定相同的磁盘状态与新的 `IdSequence`，结果完全一致。
pub fn extract(
    root: &Path,
    naming: &TileNaming,
    loader: &dyn DocumentLoader,
    ids: &mut IdSequence,
    options: ExtractOptions,
) -> Result<Extraction, EngineError> {
    let base = std::path::absolute(root).map_err(|source| IoError::ReadError {
        path: root.to_path_buf(),
        source,
    })?;
    let root_doc = load_root_document(loader, &naming.root_document(&base))?;

    let mut extent = TileExtent::empty();
    let mut tiles = Vec::new();
    let mut buildings = Vec::new();
    let mut entities = Vec::new();

    for folder in root_doc.folders()? {
        let Some(coord) = folder.coord else {
            warn!(folder = %folder.name, "文件夹名无法识别瓦片坐标，已跳过");
            continue;
        };
        let href = folder
            .href
            .clone()
            .unwrap_or_else(|| naming.tile_href(coord));
        let tile_path = base.join(&href);
        let tile_read = |source: IoError| EngineError::TileRead {
            coord,
            path: tile_path.clone(),
            source,
        };
        let tile_doc = load_tile_document(loader, &tile_path).map_err(tile_read)?;

        let tile_extent = match folder.extent {
            Some(extent) => extent,
            None => {
                let corners = tile_doc.border_coordinates().map_err(tile_read)?;
                TilePolygon::from_corners(&corners)
                    .map(|polygon| polygon.extent())
                    .ok_or_else(|| {
                        tile_read(IoError::InvalidDocument(
                            "tile has neither a folder region nor a valid border".to_string(),
                        ))
                    })?
            }
        };
        extent.include_extent(&tile_extent);

        let mut records = Vec::new();
        for model in tile_doc.model_placemarks().map_err(tile_read)? {
            let numeric_id = ids.next_id();
            let geo = model.georeference;
            let record = EntityRecord {
                id: numeric_id,
                gml_id: model.name.clone(),
                location: Location {
                    lon: geo.longitude,
                    lat: geo.latitude,
                    height: geo.altitude + options.height_offset,
                },
                orientation: Orientation {
                    heading: geo.client_heading(options.heading_offset),
                },
            };
            buildings.push(BuildingRecord {
                entity: record.clone(),
                path_to_model: mesh_path(&base, naming, coord, &model.href),
                tile: [coord.x, coord.y],
            });
            entities.push(TileEntity {
                entity_id: model.name,
                numeric_id,
                georeference: geo,
                tile: coord,
            });
            records.push(record);
        }
        debug!(x = coord.x, y = coord.y, entities = records.len(), "瓦片提取完成");

        tiles.push(TileRecord {
            id: folder.name,
            x: coord.x,
            y: coord.y,
            extent: tile_extent,
            entities: records,
        });
    }

    info!(tiles = tiles.len(), entities = entities.len(), "提取完成");
    Ok(Extraction {
        index: TileIndex { extent, tiles },
        buildings,
        entities,
    })
}

/// 模型网格的绝对路径：瓦片目录 + 模型相对链接，`.dae` 改写为 `.gltf`。
fn mesh_path(base: &Path, naming: &TileNaming, coord: TileCoord, href: &str) -> PathBuf {
    naming.tile_dir(base, coord).join(gltf_href(href))
}

/// 写出 `tiles.json` 与 `buildings.json`，返回两者路径。
pub fn write_outputs(
    extraction: &Extraction,
    out_dir: &Path,
) -> Result<(PathBuf, PathBuf), EngineError> {
    let tiles_path = out_dir.join(TILES_JSON);
    let buildings_path = out_dir.join(BUILDINGS_JSON);
    write_json(&extraction.index, &tiles_path)?;
    write_json(&extraction.buildings, &buildings_path)?;
    info!(out = %out_dir.display(), "索引文档已写出");
    Ok((tiles_path, buildings_path))
}
