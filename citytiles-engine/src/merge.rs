use std::collections::HashMap;
use std::path::{Path, PathBuf};

use citytiles_core::geometry::{LonLat, TileCoord};
use citytiles_io::kml::read_external_model;
use citytiles_io::{DocumentLoader, DocumentSaver, IoError, ModelPlacemark, TileNaming};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::converter::MeshConverter;
use crate::errors::EngineError;
use crate::resolver::resolve;
use crate::spatial_index::SpatialIndex;
use crate::synthesizer::{DocumentSynthesizer, LookupGuard, MergeOutcome, NewEntity};

/// 外部模型目录中的地理参考文档名。
pub const MODEL_DOCUMENT: &str = "doc.kml";

/// 模型落在所有瓦片之外时的处理方式。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissPolicy {
    #[default]
    Abort,
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MergeOptions {
    pub miss_policy: MissPolicy,
    pub lookup_guard: LookupGuard,
}

/// 一个外部建模工具导出的单模型目录。
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalModel {
    pub name: String,
    pub directory: PathBuf,
    pub placemark: ModelPlacemark,
}

impl ExternalModel {
    /// 读取 `<dir>/doc.kml`。地标无名称时以目录名作为模型名。
    pub fn load(loader: &dyn DocumentLoader, directory: &Path) -> Result<Self, EngineError> {
        let dir_name = directory
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let path = directory.join(MODEL_DOCUMENT);
        let model_read = |source: IoError| EngineError::ModelRead {
            model: dir_name.clone(),
            path: path.clone(),
            source,
        };
        let document = loader.load(&path).map_err(model_read)?;
        let placemark = read_external_model(&document).map_err(model_read)?;
        let name = if placemark.name.is_empty() {
            dir_name.clone()
        } else {
            placemark.name.clone()
        };
        Ok(Self {
            name,
            directory: directory.to_path_buf(),
            placemark,
        })
    }

    /// 可直接用作地标名与目录名的实体 ID。
    pub fn entity_id(&self) -> String {
        sanitize_id(&self.name)
    }

    #[inline]
    pub fn point(&self) -> LonLat {
        self.placemark.georeference.position()
    }

    pub fn mesh_source(&self) -> PathBuf {
        self.directory.join(&self.placemark.href)
    }
}

fn sanitize_id(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// 列出模型根目录下含 `doc.kml` 的直接子目录，按名称排序。
pub fn discover_models(models_dir: &Path) -> Result<Vec<PathBuf>, EngineError> {
    let mut dirs = Vec::new();
    for entry in WalkDir::new(models_dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|err| IoError::ReadError {
            path: err
                .path()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| models_dir.to_path_buf()),
            source: err.into(),
        })?;
        if entry.file_type().is_dir() && entry.path().join(MODEL_DOCUMENT).is_file() {
            dirs.push(entry.into_path());
        }
    }
    Ok(dirs)
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModelOutcome {
    Merged {
        model: String,
        coord: TileCoord,
        outcome: MergeOutcome,
    },
    SkippedMiss {
        model: String,
        point: LonLat,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeReport {
    pub models: Vec<ModelOutcome>,
}

impl MergeReport {
    pub fn merged(&self) -> usize {
        self.models
            .iter()
            .filter(|outcome| matches!(outcome, ModelOutcome::Merged { .. }))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.models.len() - self.merged()
    }
}

/// 外部模型合并流程：定位瓦片 → 转换网格 → 暂存并提交三份文档。
/// 模型按顺序逐个处理，不支持并发合并。
pub struct MergePipeline<'a> {
    root: &'a Path,
    naming: &'a TileNaming,
    index: &'a SpatialIndex,
    loader: &'a dyn DocumentLoader,
    saver: &'a dyn DocumentSaver,
    converter: &'a dyn MeshConverter,
    options: MergeOptions,
}

impl<'a> MergePipeline<'a> {
    pub fn new(
        root: &'a Path,
        naming: &'a TileNaming,
        index: &'a SpatialIndex,
        loader: &'a dyn DocumentLoader,
        saver: &'a dyn DocumentSaver,
        converter: &'a dyn MeshConverter,
    ) -> Self {
        Self {
            root,
            naming,
            index,
            loader,
            saver,
            converter,
            options: MergeOptions::default(),
        }
    }

    pub fn with_options(mut self, options: MergeOptions) -> Self {
        self.options = options;
        self
    }

    /// 合并单个模型。同 ID 的已有实体与本模型不一致时在转换前报错；
    /// 网格转换成功之前不会触碰任何文档。
    pub fn merge_model(&self, model: &ExternalModel) -> Result<ModelOutcome, EngineError> {
        let point = model.point();
        let Some(coord) = resolve(point, self.index) else {
            return match self.options.miss_policy {
                MissPolicy::Abort => Err(EngineError::GeometryResolutionMiss {
                    model: model.name.clone(),
                    point,
                }),
                MissPolicy::Skip => {
                    warn!(model = %model.name, lon = point.lon(), lat = point.lat(), "模型不在任何瓦片内，已跳过");
                    Ok(ModelOutcome::SkippedMiss {
                        model: model.name.clone(),
                        point,
                    })
                }
            };
        };
        let Some(polygon) = self.index.polygon(coord) else {
            return Err(EngineError::GeometryResolutionMiss {
                model: model.name.clone(),
                point,
            });
        };

        let entity_id = model.entity_id();
        let synthesizer = DocumentSynthesizer::new(self.root, self.naming, self.loader, self.saver)
            .with_lookup_guard(self.options.lookup_guard);
        let entity = NewEntity::new(entity_id.clone(), model.placemark.georeference);
        synthesizer.verify_existing(coord, &entity)?;

        let input = model.mesh_source();
        let output = self.naming.converted_mesh(self.root, coord, &entity_id);
        self.converter
            .convert(&input, &output)
            .map_err(|failure| EngineError::Conversion {
                model: model.name.clone(),
                input: input.clone(),
                output: output.clone(),
                diagnostics: failure.diagnostics,
            })?;

        let outcome = synthesizer.apply(coord, polygon, &entity)?;
        Ok(ModelOutcome::Merged {
            model: model.name.clone(),
            coord,
            outcome,
        })
    }

    /// 处理目录下的全部模型；首个错误即中止整个运行。
    /// 所有模型先读取并检查实体 ID 是否重复，之后才开始转换与写入。
    pub fn merge_all(&self, models_dir: &Path) -> Result<MergeReport, EngineError> {
        let mut models = Vec::new();
        let mut seen: HashMap<String, PathBuf> = HashMap::new();
        for directory in discover_models(models_dir)? {
            let model = ExternalModel::load(self.loader, &directory)?;
            let entity = model.entity_id();
            if let Some(first) = seen.get(&entity) {
                return Err(EngineError::DuplicateModel {
                    entity,
                    first: first.clone(),
                    second: directory,
                });
            }
            seen.insert(entity, directory);
            models.push(model);
        }

        let mut report = MergeReport::default();
        for model in &models {
            report.models.push(self.merge_model(model)?);
        }
        info!(
            merged = report.merged(),
            skipped = report.skipped(),
            "模型合并完成"
        );
        Ok(report)
    }
}
