use citytiles_core::geometry::{LonLat, TileCoord};
use tracing::trace;

use crate::spatial_index::SpatialIndex;

/// 查找包含该点的瓦片。按先 x 后 y 的顺序返回第一个命中；
/// 瓦片理应互不重叠，若数据重叠则结果取决于该遍历顺序。
/// 点落在所有瓦片之外时返回 `None`，是否致命由调用方决定。
pub fn resolve(point: LonLat, index: &SpatialIndex) -> Option<TileCoord> {
    let found = index
        .iter()
        .find(|(_, polygon)| polygon.contains(point))
        .map(|(coord, _)| coord);
    trace!(lon = point.lon(), lat = point.lat(), ?found, "containment resolved");
    found
}
