use std::path::{Path, PathBuf};

use citytiles_core::geometry::TileCoord;

pub const TILES_DIR: &str = "Tiles";

/// 导出数据集的命名约定，全部以数据集名 `N` 为前缀：
/// 根文档 `N_collada.kml`，查找文档 `N_collada_MasterJSON.json`，
/// 瓦片文档 `Tiles/<x>/<y>/N_Tile_<x>_<y>_collada.kml`。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileNaming {
    dataset: String,
}

impl TileNaming {
    pub fn new(dataset: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
        }
    }

    #[inline]
    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    pub fn root_document(&self, root: &Path) -> PathBuf {
        root.join(format!("{}_collada.kml", self.dataset))
    }

    pub fn lookup_document(&self, root: &Path) -> PathBuf {
        root.join(format!("{}_collada_MasterJSON.json", self.dataset))
    }

    pub fn tile_dir(&self, root: &Path, coord: TileCoord) -> PathBuf {
        root.join(TILES_DIR)
            .join(coord.x.to_string())
            .join(coord.y.to_string())
    }

    pub fn tile_file_name(&self, coord: TileCoord) -> String {
        format!("{}_Tile_{}_{}_collada.kml", self.dataset, coord.x, coord.y)
    }

    pub fn tile_document(&self, root: &Path, coord: TileCoord) -> PathBuf {
        self.tile_dir(root, coord).join(self.tile_file_name(coord))
    }

    pub fn folder_name(&self, coord: TileCoord) -> String {
        format!("Tile_{}_{}", coord.x, coord.y)
    }

    /// 根文档中 NetworkLink 的相对链接，始终使用 `/` 分隔。
    pub fn tile_href(&self, coord: TileCoord) -> String {
        format!(
            "{TILES_DIR}/{}/{}/{}",
            coord.x,
            coord.y,
            self.tile_file_name(coord)
        )
    }

    /// 瓦片文档中模型的相对链接（保持导出工具的 `.dae` 约定）。
    pub fn model_href(&self, entity_id: &str) -> String {
        format!("{entity_id}/{entity_id}.dae")
    }

    /// 转换后网格的落盘位置。
    pub fn converted_mesh(&self, root: &Path, coord: TileCoord, entity_id: &str) -> PathBuf {
        self.tile_dir(root, coord)
            .join(entity_id)
            .join(format!("{entity_id}.gltf"))
    }
}

/// 将模型链接的 `.dae` 扩展名改写为 `.gltf`；其他扩展名保持不变。
pub fn gltf_href(href: &str) -> String {
    match href.strip_suffix(".dae") {
        Some(stem) => format!("{stem}.gltf"),
        None => href.to_string(),
    }
}
