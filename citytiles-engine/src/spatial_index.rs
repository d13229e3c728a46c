use std::collections::BTreeMap;
use std::path::Path;

use citytiles_core::geometry::{TileCoord, TilePolygon};
use citytiles_io::{DocumentLoader, IoError, TileNaming, load_tile_document, naming::TILES_DIR};
use tracing::{debug, info};

use crate::errors::EngineError;

/// 瓦片坐标 → 边界多边形的内存索引。每次运行构建一次，之后只读。
#[derive(Debug, Clone, Default)]
pub struct SpatialIndex {
    polygons: BTreeMap<TileCoord, TilePolygon>,
}

impl SpatialIndex {
    /// 遍历 `Tiles/<x>/<y>/`：x 从 0 递增直到 `Tiles/<x>` 不存在，
    /// 每个 x 下 y 同理。目录结构本身即索引的定义域。
    pub fn build(
        root: &Path,
        naming: &TileNaming,
        loader: &dyn DocumentLoader,
    ) -> Result<Self, EngineError> {
        let tiles_dir = root.join(TILES_DIR);
        let mut polygons = BTreeMap::new();

        let mut x = 0u32;
        while tiles_dir.join(x.to_string()).is_dir() {
            let mut y = 0u32;
            loop {
                let coord = TileCoord::new(x, y);
                if !naming.tile_dir(root, coord).is_dir() {
                    break;
                }
                let polygon = read_tile_polygon(root, naming, loader, coord)?;
                debug!(x, y, "已读取瓦片边界");
                polygons.insert(coord, polygon);
                y += 1;
            }
            x += 1;
        }

        info!(root = %root.display(), tiles = polygons.len(), "空间索引构建完成");
        Ok(Self { polygons })
    }

    /// 直接由多边形集合构造，便于测试与内存数据源。
    pub fn from_polygons(polygons: impl IntoIterator<Item = (TileCoord, TilePolygon)>) -> Self {
        Self {
            polygons: polygons.into_iter().collect(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.polygons.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.polygons.is_empty()
    }

    pub fn polygon(&self, coord: TileCoord) -> Option<&TilePolygon> {
        self.polygons.get(&coord)
    }

    /// 按先 x 后 y 的顺序遍历。
    pub fn iter(&self) -> impl Iterator<Item = (TileCoord, &TilePolygon)> {
        self.polygons.iter().map(|(coord, polygon)| (*coord, polygon))
    }
}

fn read_tile_polygon(
    root: &Path,
    naming: &TileNaming,
    loader: &dyn DocumentLoader,
    coord: TileCoord,
) -> Result<TilePolygon, EngineError> {
    let path = naming.tile_document(root, coord);
    let tile_read = |source: IoError| EngineError::TileRead {
        coord,
        path: path.clone(),
        source,
    };
    let document = load_tile_document(loader, &path).map_err(tile_read)?;
    let corners = document.border_coordinates().map_err(tile_read)?;
    TilePolygon::from_corners(&corners).ok_or_else(|| {
        tile_read(IoError::InvalidDocument(format!(
            "border placemark has {} points, expected 4 distinct corners",
            corners.len()
        )))
    })
}
