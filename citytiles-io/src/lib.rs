pub mod kml;
pub mod lookup;
pub mod naming;
pub mod records;
pub mod xml;

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::trace;

pub use kml::{ModelPlacemark, RootDocument, TileDocument, TileFolder};
pub use lookup::{LookupDocument, LookupEntry};
pub use naming::TileNaming;
pub use xml::{Element, XmlDocument, XmlError};

#[derive(Debug, Error)]
pub enum IoError {
    #[error("failed to read file {path:?}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write file {path:?}: {source}")]
    WriteError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid XML in {path:?}: {source}")]
    Xml {
        path: PathBuf,
        #[source]
        source: XmlError,
    },
    #[error("invalid JSON in {path:?}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid document structure: {0}")]
    InvalidDocument(String),
}

impl IoError {
    /// 出错文件路径（若有）。
    pub fn path(&self) -> Option<&Path> {
        match self {
            IoError::ReadError { path, .. }
            | IoError::WriteError { path, .. }
            | IoError::Xml { path, .. }
            | IoError::Json { path, .. } => Some(path),
            IoError::InvalidDocument(_) => None,
        }
    }
}

pub trait DocumentLoader {
    fn load(&self, path: &Path) -> Result<XmlDocument, IoError>;
}

pub trait DocumentSaver {
    fn save(&self, document: &XmlDocument, path: &Path) -> Result<(), IoError>;
}

/// 基于文件系统的 KML 读写。
pub struct KmlFacade;

impl KmlFacade {
    pub fn new() -> Self {
        Self
    }
}

impl Default for KmlFacade {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentLoader for KmlFacade {
    fn load(&self, path: &Path) -> Result<XmlDocument, IoError> {
        let data = read_text(path)?;
        XmlDocument::parse(&data).map_err(|source| IoError::Xml {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl DocumentSaver for KmlFacade {
    fn save(&self, document: &XmlDocument, path: &Path) -> Result<(), IoError> {
        let data = document.to_xml_string().map_err(|source| IoError::Xml {
            path: path.to_path_buf(),
            source,
        })?;
        write_text(path, &data)
    }
}

pub fn load_tile_document(
    loader: &dyn DocumentLoader,
    path: &Path,
) -> Result<TileDocument, IoError> {
    loader.load(path).map(TileDocument::new)
}

pub fn load_root_document(
    loader: &dyn DocumentLoader,
    path: &Path,
) -> Result<RootDocument, IoError> {
    loader.load(path).map(RootDocument::new)
}

/// 读取查找文档；文件不存在时视为空文档。
pub fn load_lookup_document(path: &Path) -> Result<LookupDocument, IoError> {
    if !path.exists() {
        trace!(path = %path.display(), "lookup document missing, starting empty");
        return Ok(LookupDocument::new());
    }
    let data = read_text(path)?;
    LookupDocument::parse(&data).map_err(|source| IoError::Json {
        path: path.to_path_buf(),
        source,
    })
}

pub fn save_lookup_document(document: &LookupDocument, path: &Path) -> Result<(), IoError> {
    let data = document.to_json_string().map_err(|source| IoError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    write_text(path, &data)
}

pub fn write_json<T: Serialize + ?Sized>(value: &T, path: &Path) -> Result<(), IoError> {
    let data = serde_json::to_string_pretty(value).map_err(|source| IoError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    write_text(path, &data)
}

fn read_text(path: &Path) -> Result<String, IoError> {
    fs::read_to_string(path).map_err(|source| IoError::ReadError {
        path: path.to_path_buf(),
        source,
    })
}

/// 先写入同目录临时文件再重命名，避免单个文档被写成半截。
fn write_text(path: &Path, data: &str) -> Result<(), IoError> {
    let write_error = |source: std::io::Error| IoError::WriteError {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(write_error)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, data).map_err(write_error)?;
    fs::rename(&tmp, path).map_err(write_error)?;
    trace!(path = %path.display(), bytes = data.len(), "document written");
    Ok(())
}
