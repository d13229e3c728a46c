pub mod geometry {
    use glam::DVec2;
    use serde::{Deserialize, Serialize};

    /// 经纬度点（度），内部以 `glam::DVec2` 表示，x = 经度，y = 纬度。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct LonLat(pub DVec2);

    impl LonLat {
        #[inline]
        pub fn new(lon: f64, lat: f64) -> Self {
            Self(DVec2::new(lon, lat))
        }

        #[inline]
        pub fn lon(self) -> f64 {
            self.0.x
        }

        #[inline]
        pub fn lat(self) -> f64 {
            self.0.y
        }

        #[inline]
        pub fn as_vec2(self) -> DVec2 {
            self.0
        }
    }

    impl From<DVec2> for LonLat {
        fn from(value: DVec2) -> Self {
            Self(value)
        }
    }

    impl std::fmt::Display for LonLat {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "({}, {})", self.lon(), self.lat())
        }
    }

    /// 瓦片坐标 (x, y)。排序按先 x 后 y，与目录遍历顺序一致。
    #[derive(
        Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
    )]
    pub struct TileCoord {
        pub x: u32,
        pub y: u32,
    }

    impl TileCoord {
        #[inline]
        pub fn new(x: u32, y: u32) -> Self {
            Self { x, y }
        }
    }

    impl std::fmt::Display for TileCoord {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}_{}", self.x, self.y)
        }
    }

    /// 瓦片声明的经纬度范围（北/南/东/西，单位：度）。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct TileExtent {
        pub north: f64,
        pub south: f64,
        pub east: f64,
        pub west: f64,
    }

    impl TileExtent {
        #[inline]
        pub fn new(north: f64, south: f64, east: f64, west: f64) -> Self {
            Self {
                north,
                south,
                east,
                west,
            }
        }

        pub fn empty() -> Self {
            Self {
                north: f64::NEG_INFINITY,
                south: f64::INFINITY,
                east: f64::NEG_INFINITY,
                west: f64::INFINITY,
            }
        }

        #[inline]
        pub fn is_empty(&self) -> bool {
            self.south > self.north || self.west > self.east
        }

        pub fn include_point(&mut self, point: LonLat) {
            self.north = self.north.max(point.lat());
            self.south = self.south.min(point.lat());
            self.east = self.east.max(point.lon());
            self.west = self.west.min(point.lon());
        }

        pub fn include_extent(&mut self, other: &TileExtent) {
            if other.is_empty() {
                return;
            }
            self.include_point(LonLat::new(other.west, other.south));
            self.include_point(LonLat::new(other.east, other.north));
        }

        /// 信封格式 `[west, south, east, north]`。
        #[inline]
        pub fn envelope(&self) -> [f64; 4] {
            [self.west, self.south, self.east, self.north]
        }

        #[inline]
        pub fn from_envelope(envelope: [f64; 4]) -> Self {
            let [west, south, east, north] = envelope;
            Self::new(north, south, east, west)
        }
    }

    /// 瓦片边界多边形：闭合的 5 点环（首点重复为末点）。
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct TilePolygon {
        ring: [LonLat; 5],
    }

    impl TilePolygon {
        /// 由范围构造，角点顺序为 西南 → 东南 → 东北 → 西北 → 西南。
        pub fn from_extent(extent: &TileExtent) -> Self {
            let sw = LonLat::new(extent.west, extent.south);
            Self {
                ring: [
                    sw,
                    LonLat::new(extent.east, extent.south),
                    LonLat::new(extent.east, extent.north),
                    LonLat::new(extent.west, extent.north),
                    sw,
                ],
            }
        }

        /// 由边界地标的坐标序列构造。允许输入已闭合（首尾相同）；
        /// 去掉闭合点后必须恰好是 4 个互不相同的角点，否则返回 `None`。
        pub fn from_corners(points: &[LonLat]) -> Option<Self> {
            let mut corners: Vec<LonLat> = points.to_vec();
            if corners.len() > 1 && corners.first() == corners.last() {
                corners.pop();
            }
            if corners.len() != 4 {
                return None;
            }
            for (i, a) in corners.iter().enumerate() {
                if corners[i + 1..].iter().any(|b| a == b) {
                    return None;
                }
            }
            Some(Self {
                ring: [corners[0], corners[1], corners[2], corners[3], corners[0]],
            })
        }

        #[inline]
        pub fn ring(&self) -> &[LonLat; 5] {
            &self.ring
        }

        pub fn extent(&self) -> TileExtent {
            let mut extent = TileExtent::empty();
            for point in &self.ring {
                extent.include_point(*point);
            }
            extent
        }

        /// 射线法点在多边形内判定。边界点的归属遵循半开区间约定，
        /// 相邻瓦片的公共边只会被其中一侧命中。
        pub fn contains(&self, point: LonLat) -> bool {
            let (px, py) = (point.lon(), point.lat());
            let mut inside = false;
            let mut j = self.ring.len() - 2;
            for i in 0..self.ring.len() - 1 {
                let (xi, yi) = (self.ring[i].lon(), self.ring[i].lat());
                let (xj, yj) = (self.ring[j].lon(), self.ring[j].lat());
                if (yi > py) != (yj > py) {
                    let cross_x = (xj - xi) * (py - yi) / (yj - yi) + xi;
                    if px < cross_x {
                        inside = !inside;
                    }
                }
                j = i;
            }
            inside
        }
    }

}

pub mod model {
    use serde::{Deserialize, Serialize};

    use crate::geometry::{LonLat, TileCoord};

    /// 导出工具与渲染端朝向约定之间的固定偏移（度）。
    pub const HEADING_OFFSET_DEGREES: f64 = 90.0;

    /// 模型的地理参考：位置 + 朝向。`heading` 保存源数据中的原始约定。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct GeoReference {
        pub longitude: f64,
        pub latitude: f64,
        pub altitude: f64,
        pub heading: f64,
    }

    impl GeoReference {
        #[inline]
        pub fn new(longitude: f64, latitude: f64, altitude: f64, heading: f64) -> Self {
            Self {
                longitude,
                latitude,
                altitude,
                heading,
            }
        }

        #[inline]
        pub fn position(&self) -> LonLat {
            LonLat::new(self.longitude, self.latitude)
        }

        /// 面向客户端记录的朝向：原始值加上固定偏移，不做取模。
        #[inline]
        pub fn client_heading(&self, offset: f64) -> f64 {
            self.heading + offset
        }
    }

    /// 瓦片内的一个三维实体。
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct TileEntity {
        pub entity_id: String,
        pub numeric_id: u64,
        pub georeference: GeoReference,
        pub tile: TileCoord,
    }

    /// 单次提取过程内单调递增的数字 ID 生成器，从 1 开始。
    /// 每次提取新建一个实例，保证 ID 只取决于遍历顺序。
    #[derive(Debug, Clone)]
    pub struct IdSequence {
        next: u64,
    }

    impl IdSequence {
        pub fn new() -> Self {
            Self { next: 1 }
        }

        #[inline]
        pub fn next_id(&mut self) -> u64 {
            let id = self.next;
            self.next += 1;
            id
        }

        /// 已分配的 ID 数量。
        #[inline]
        pub fn issued(&self) -> u64 {
            self.next - 1
        }
    }

    impl Default for IdSequence {
        fn default() -> Self {
            Self::new()
        }
    }

}
