use std::path::{Path, PathBuf};

use citytiles_core::geometry::{TileCoord, TilePolygon};
use citytiles_core::model::GeoReference;
use citytiles_io::kml::DEFAULT_ALTITUDE_MODE;
use citytiles_io::{
    DocumentLoader, DocumentSaver, IoError, LookupDocument, LookupEntry, ModelPlacemark,
    RootDocument, TileDocument, TileFolder, TileNaming, load_lookup_document, load_root_document,
    load_tile_document, save_lookup_document,
};
use tracing::{debug, info};

use crate::errors::EngineError;

/// 查找文档的去重规则。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LookupGuard {
    /// 同名记录已存在时跳过。
    #[default]
    Entity,
    /// 任意记录已指向目标瓦片时跳过。
    Tile,
}

/// 待并入瓦片的新实体。
#[derive(Debug, Clone, PartialEq)]
pub struct NewEntity {
    pub id: String,
    pub georeference: GeoReference,
}

impl NewEntity {
    pub fn new(id: impl Into<String>, georeference: GeoReference) -> Self {
        Self {
            id: id.into(),
            georeference,
        }
    }
}

/// 一次合并对三份文档各自是否产生了写入。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MergeOutcome {
    pub placemark_added: bool,
    pub folder_added: bool,
    pub lookup_added: bool,
}

impl MergeOutcome {
    #[inline]
    pub fn is_noop(&self) -> bool {
        !(self.placemark_added || self.folder_added || self.lookup_added)
    }
}

/// 已在内存中完成修改、尚未落盘的三份文档。`None` 表示该文档无需变更。
#[derive(Debug, Clone)]
pub struct StagedMerge {
    pub entity_id: String,
    pub coord: TileCoord,
    tile: Option<(PathBuf, TileDocument)>,
    root: Option<(PathBuf, RootDocument)>,
    lookup: Option<(PathBuf, LookupDocument)>,
}

impl StagedMerge {
    pub fn outcome(&self) -> MergeOutcome {
        MergeOutcome {
            placemark_added: self.tile.is_some(),
            folder_added: self.root.is_some(),
            lookup_added: self.lookup.is_some(),
        }
    }
}

/// 维护瓦片文档、根文件夹文档与查找文档三者一致性的合成器。
///
/// 先在内存中整体暂存三项更新，再按 瓦片 → 根文件夹 → 查找 的固定顺序提交。
/// 每份文档单独原子替换，但三份之间没有事务：提交中途失败时已写入的文档不会回滚。
/// 恢复方式是重新执行同一合并，已生效的部分会因幂等检查被跳过。
pub struct DocumentSynthesizer<'a> {
    root: &'a Path,
    naming: &'a TileNaming,
    loader: &'a dyn DocumentLoader,
    saver: &'a dyn DocumentSaver,
    guard: LookupGuard,
}

impl<'a> DocumentSynthesizer<'a> {
    pub fn new(
        root: &'a Path,
        naming: &'a TileNaming,
        loader: &'a dyn DocumentLoader,
        saver: &'a dyn DocumentSaver,
    ) -> Self {
        Self {
            root,
            naming,
            loader,
            saver,
            guard: LookupGuard::default(),
        }
    }

    pub fn with_lookup_guard(mut self, guard: LookupGuard) -> Self {
        self.guard = guard;
        self
    }

    /// 检查同一 ID 是否已被其他实体占用。只有已有地标与新实体完全一致时
    /// （视为重复执行）才放行；否则返回 `EntityConflict`，调用方不得继续转换网格。
    pub fn verify_existing(&self, coord: TileCoord, entity: &NewEntity) -> Result<(), EngineError> {
        let conflict = |detail: String| EngineError::EntityConflict {
            model: entity.id.clone(),
            coord,
            detail,
        };

        let tile_path = self.naming.tile_document(self.root, coord);
        let tile_read = |source: IoError| EngineError::TileRead {
            coord,
            path: tile_path.clone(),
            source,
        };
        let tile_doc = load_tile_document(self.loader, &tile_path).map_err(tile_read)?;
        if tile_doc.contains_placemark(&entity.id) {
            let existing = tile_doc
                .model_placemarks()
                .map_err(tile_read)?
                .into_iter()
                .find(|placemark| placemark.name == entity.id);
            match existing {
                Some(placemark)
                    if placemark.georeference == entity.georeference
                        && placemark.href == self.naming.model_href(&entity.id) => {}
                Some(placemark) => {
                    let geo = placemark.georeference;
                    return Err(conflict(format!(
                        "tile already holds it at ({}, {}, {}) heading {} linked to {}",
                        geo.longitude, geo.latitude, geo.altitude, geo.heading, placemark.href
                    )));
                }
                None => {
                    return Err(conflict(
                        "the name is taken by a non-model placemark".to_string(),
                    ));
                }
            }
        }

        let lookup = load_lookup_document(&self.naming.lookup_document(self.root))?;
        if let Some(entry) = lookup.get(&entity.id) {
            if entry.coord() != coord {
                return Err(conflict(format!(
                    "lookup document places it in tile {}",
                    entry.coord()
                )));
            }
        }
        Ok(())
    }

    /// 读取三份文档并计算所需的追加内容，不写盘。
    pub fn stage(
        &self,
        coord: TileCoord,
        polygon: &TilePolygon,
        entity: &NewEntity,
    ) -> Result<StagedMerge, EngineError> {
        let tile_path = self.naming.tile_document(self.root, coord);
        let mut tile_doc =
            load_tile_document(self.loader, &tile_path).map_err(|source| EngineError::TileRead {
                coord,
                path: tile_path.clone(),
                source,
            })?;
        let tile = if tile_doc.contains_placemark(&entity.id) {
            debug!(model = %entity.id, x = coord.x, y = coord.y, "瓦片中已存在该地标，跳过");
            None
        } else {
            tile_doc.append_placemark(&ModelPlacemark {
                name: entity.id.clone(),
                altitude_mode: DEFAULT_ALTITUDE_MODE.to_string(),
                georeference: entity.georeference,
                href: self.naming.model_href(&entity.id),
            });
            Some((tile_path, tile_doc))
        };

        let root_path = self.naming.root_document(self.root);
        let mut root_doc = load_root_document(self.loader, &root_path)?;
        let root = if root_doc.has_folder_for(coord) {
            None
        } else {
            root_doc.append_folder(&TileFolder {
                name: self.naming.folder_name(coord),
                coord: Some(coord),
                extent: Some(polygon.extent()),
                href: Some(self.naming.tile_href(coord)),
            });
            Some((root_path, root_doc))
        };

        let lookup_path = self.naming.lookup_document(self.root);
        let mut lookup_doc = load_lookup_document(&lookup_path)?;
        let skip_lookup = match self.guard {
            LookupGuard::Entity => lookup_doc.contains_model(&entity.id),
            LookupGuard::Tile => lookup_doc.contains_tile(coord),
        };
        let lookup = if skip_lookup {
            None
        } else {
            let entry = LookupEntry::new(&polygon.extent(), coord);
            lookup_doc
                .insert(&entity.id, entry)?
                .then_some((lookup_path, lookup_doc))
        };

        Ok(StagedMerge {
            entity_id: entity.id.clone(),
            coord,
            tile,
            root,
            lookup,
        })
    }

    /// 按固定顺序写出暂存的文档。任一写入失败立即返回，后续文档保持原状。
    pub fn commit(&self, staged: StagedMerge) -> Result<MergeOutcome, EngineError> {
        let outcome = staged.outcome();
        let StagedMerge {
            entity_id,
            coord,
            tile,
            root,
            lookup,
        } = staged;
        let write_error = |path: &Path, source: IoError| EngineError::DocumentWrite {
            model: entity_id.clone(),
            coord,
            path: path.to_path_buf(),
            source,
        };

        if let Some((path, document)) = tile {
            self.saver
                .save(document.xml(), &path)
                .map_err(|source| write_error(&path, source))?;
        }
        if let Some((path, document)) = root {
            self.saver
                .save(document.xml(), &path)
                .map_err(|source| write_error(&path, source))?;
        }
        if let Some((path, document)) = lookup {
            save_lookup_document(&document, &path).map_err(|source| write_error(&path, source))?;
        }

        info!(
            model = %entity_id,
            x = coord.x,
            y = coord.y,
            placemark = outcome.placemark_added,
            folder = outcome.folder_added,
            lookup = outcome.lookup_added,
            "瓦片合并已提交"
        );
        Ok(outcome)
    }

    pub fn apply(
        &self,
        coord: TileCoord,
        polygon: &TilePolygon,
        entity: &NewEntity,
    ) -> Result<MergeOutcome, EngineError> {
        let staged = self.stage(coord, polygon, entity)?;
        self.commit(staged)
    }
}
