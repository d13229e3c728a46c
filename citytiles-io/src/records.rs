use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use citytiles_core::geometry::TileExtent;

/// 面向客户端的位置，高度已叠加垂直基准偏移。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lon: f64,
    pub lat: f64,
    pub height: f64,
}

/// 面向客户端的朝向，已叠加朝向偏移。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Orientation {
    pub heading: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRecord {
    pub id: u64,
    pub gml_id: String,
    pub location: Location,
    pub orientation: Orientation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileRecord {
    pub id: String,
    pub x: u32,
    pub y: u32,
    pub extent: TileExtent,
    pub entities: Vec<EntityRecord>,
}

/// 交付给只读客户端的瓦片索引。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileIndex {
    pub extent: TileExtent,
    pub tiles: Vec<TileRecord>,
}

/// 交给资产入库环节的完整建筑记录。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildingRecord {
    #[serde(flatten)]
    pub entity: EntityRecord,
    pub path_to_model: PathBuf,
    pub tile: [u32; 2],
}
