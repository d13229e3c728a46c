use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use citytiles_core::geometry::{TileCoord, TileExtent};

use crate::IoError;

/// 查找文档中的单条记录：`{"envelope": [w, s, e, n], "tile": [x, y]}`。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LookupEntry {
    pub envelope: [f64; 4],
    pub tile: [u32; 2],
}

impl LookupEntry {
    pub fn new(extent: &TileExtent, coord: TileCoord) -> Self {
        Self {
            envelope: extent.envelope(),
            tile: [coord.x, coord.y],
        }
    }

    #[inline]
    pub fn coord(&self) -> TileCoord {
        TileCoord::new(self.tile[0], self.tile[1])
    }
}

/// 根查找文档（模型名 → 信封 + 瓦片坐标）。仅用于合并时的存在性检查。
/// 保留键顺序与无法识别的字段。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LookupDocument {
    entries: Map<String, Value>,
}

impl LookupDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(source: &str) -> Result<Self, serde_json::Error> {
        let entries: Map<String, Value> = serde_json::from_str(source)?;
        Ok(Self { entries })
    }

    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        let mut out = serde_json::to_string_pretty(&self.entries)?;
        out.push('\n');
        Ok(out)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_model(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<LookupEntry> {
        self.entries
            .get(name)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    /// 是否已有任意记录指向该瓦片。无法解析的记录被忽略。
    pub fn contains_tile(&self, coord: TileCoord) -> bool {
        self.entries.values().any(|value| {
            serde_json::from_value::<LookupEntry>(value.clone())
                .map(|entry| entry.coord() == coord)
                .unwrap_or(false)
        })
    }

    /// 插入记录；已存在同名记录时不覆盖，返回是否写入。
    pub fn insert(&mut self, name: &str, entry: LookupEntry) -> Result<bool, IoError> {
        if self.entries.contains_key(name) {
            return Ok(false);
        }
        let value = serde_json::to_value(entry)
            .map_err(|err| IoError::InvalidDocument(format!("lookup entry {name}: {err}")))?;
        self.entries.insert(name.to_string(), value);
        Ok(true)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}
