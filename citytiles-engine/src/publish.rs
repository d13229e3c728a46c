use std::fs;
use std::path::{Path, PathBuf};

use citytiles_io::records::{BuildingRecord, EntityRecord};
use citytiles_io::{IoError, write_json};
use rayon::prelude::*;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::errors::EngineError;
use crate::extraction::{Extraction, write_outputs};

/// 与网格一同入库的元数据。
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobMetadata {
    #[serde(flatten)]
    pub entity: EntityRecord,
    pub tile: [u32; 2],
}

impl From<&BuildingRecord> for BlobMetadata {
    fn from(record: &BuildingRecord) -> Self {
        Self {
            entity: record.entity.clone(),
            tile: record.tile,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlobReceipt {
    pub key: String,
    pub location: PathBuf,
    pub sha256: String,
    pub bytes: u64,
}

/// 网格资产存储。每次 `put` 独立成败，实现需可跨线程共享。
pub trait BlobStore: Send + Sync {
    fn put(
        &self,
        key: &str,
        source: &Path,
        metadata: &BlobMetadata,
    ) -> Result<BlobReceipt, IoError>;
}

/// 以目录为后端的存储：`<key>.gltf` 加 `<key>.meta.json` 旁注文件。
#[derive(Debug, Clone)]
pub struct DirectoryBlobStore {
    root: PathBuf,
}

impl DirectoryBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[derive(Serialize)]
struct Sidecar<'a> {
    key: &'a str,
    sha256: &'a str,
    bytes: u64,
    metadata: &'a BlobMetadata,
}

impl BlobStore for DirectoryBlobStore {
    fn put(
        &self,
        key: &str,
        source: &Path,
        metadata: &BlobMetadata,
    ) -> Result<BlobReceipt, IoError> {
        let payload = fs::read(source).map_err(|source_err| IoError::ReadError {
            path: source.to_path_buf(),
            source: source_err,
        })?;
        let sha256 = hex::encode(Sha256::digest(&payload));
        let location = self.root.join(format!("{key}.gltf"));
        let write_error = |err: std::io::Error| IoError::WriteError {
            path: location.clone(),
            source: err,
        };
        fs::create_dir_all(&self.root).map_err(write_error)?;
        fs::write(&location, &payload).map_err(write_error)?;

        let bytes = payload.len() as u64;
        write_json(
            &Sidecar {
                key,
                sha256: &sha256,
                bytes,
                metadata,
            },
            &self.root.join(format!("{key}.meta.json")),
        )?;
        debug!(key, bytes, "资产已写入");
        Ok(BlobReceipt {
            key: key.to_string(),
            location,
            sha256,
            bytes,
        })
    }
}

#[derive(Debug)]
pub struct PublishFailure {
    pub key: String,
    pub error: IoError,
}

#[derive(Debug, Default)]
pub struct PublishReport {
    pub uploaded: Vec<BlobReceipt>,
    pub failed: Vec<PublishFailure>,
    pub index_documents: Vec<PathBuf>,
}

/// 并行上传全部网格，然后写出索引文档。上传之间无顺序保证，
/// 失败逐项记录，已完成的上传不会回滚。
pub fn publish_assets(
    extraction: &Extraction,
    store: &dyn BlobStore,
    out_dir: &Path,
) -> Result<PublishReport, EngineError> {
    let results: Vec<Result<BlobReceipt, PublishFailure>> = extraction
        .buildings
        .par_iter()
        .map(|record| {
            let key = record.entity.gml_id.as_str();
            store
                .put(key, &record.path_to_model, &BlobMetadata::from(record))
                .map_err(|error| PublishFailure {
                    key: key.to_string(),
                    error,
                })
        })
        .collect();

    let mut report = PublishReport::default();
    for result in results {
        match result {
            Ok(receipt) => report.uploaded.push(receipt),
            Err(failure) => {
                warn!(key = %failure.key, error = %failure.error, "资产上传失败");
                report.failed.push(failure);
            }
        }
    }

    let (tiles, buildings) = write_outputs(extraction, out_dir)?;
    report.index_documents = vec![tiles, buildings];
    info!(
        uploaded = report.uploaded.len(),
        failed = report.failed.len(),
        "资产发布完成"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use citytiles_io::records::{Location, Orientation};

    fn metadata() -> BlobMetadata {
        BlobMetadata {
            entity: EntityRecord {
                id: 1,
                gml_id: "DENW_1".to_string(),
                location: Location {
                    lon: 7.221,
                    lat: 51.54,
                    height: 3.0,
                },
                orientation: Orientation { heading: 90.0 },
            },
            tile: [0, 0],
        }
    }

    #[test]
    fn directory_store_writes_payload_and_sidecar() {
        let dir = tempfile::tempdir().expect("创建临时目录失败");
        let source = dir.path().join("mesh.gltf");
        fs::write(&source, b"abc").expect("写入网格失败");
        let store = DirectoryBlobStore::new(dir.path().join("store"));

        let receipt = store
            .put("DENW_1", &source, &metadata())
            .expect("写入存储失败");
        assert_eq!(receipt.bytes, 3);
        assert_eq!(
            receipt.sha256,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(fs::read(&receipt.location).expect("读取失败"), b"abc");

        let sidecar: serde_json::Value = serde_json::from_str(
            &fs::read_to_string(store.root().join("DENW_1.meta.json")).expect("读取旁注失败"),
        )
        .expect("解析旁注失败");
        assert_eq!(sidecar["sha256"], receipt.sha256.as_str());
        assert_eq!(sidecar["metadata"]["gmlId"], "DENW_1");
        assert_eq!(sidecar["metadata"]["tile"], serde_json::json!([0, 0]));
    }

    #[test]
    fn missing_source_is_a_read_error() {
        let dir = tempfile::tempdir().expect("创建临时目录失败");
        let store = DirectoryBlobStore::new(dir.path());
        let err = store
            .put("X", &dir.path().join("absent.gltf"), &metadata())
            .unwrap_err();
        assert!(matches!(err, IoError::ReadError { .. }));
    }
}
