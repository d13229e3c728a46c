pub mod converter;
pub mod extraction;
pub mod merge;
pub mod publish;
pub mod resolver;
pub mod spatial_index;
pub mod synthesizer;

pub mod errors {
    use std::path::PathBuf;

    use citytiles_core::geometry::{LonLat, TileCoord};
    use citytiles_io::IoError;
    use thiserror::Error;

    #[derive(Debug, Error)]
    pub enum EngineError {
        #[error("tile {coord}: cannot read tile document {path:?}: {source}")]
        TileRead {
            coord: TileCoord,
            path: PathBuf,
            #[source]
            source: IoError,
        },
        #[error("model {model}: point {point} lies outside every tile")]
        GeometryResolutionMiss { model: String, point: LonLat },
        #[error("model {model}: mesh conversion {input:?} -> {output:?} failed: {diagnostics}")]
        Conversion {
            model: String,
            input: PathBuf,
            output: PathBuf,
            diagnostics: String,
        },
        #[error("model {model}, tile {coord}: conflicts with existing entity: {detail}")]
        EntityConflict {
            model: String,
            coord: TileCoord,
            detail: String,
        },
        #[error("entity id {entity} is produced by both {first:?} and {second:?}")]
        DuplicateModel {
            entity: String,
            first: PathBuf,
            second: PathBuf,
        },
        #[error("model {model}, tile {coord}: failed to write {path:?}: {source}")]
        DocumentWrite {
            model: String,
            coord: TileCoord,
            path: PathBuf,
            #[source]
            source: IoError,
        },
        #[error("model {model}: cannot read {path:?}: {source}")]
        ModelRead {
            model: String,
            path: PathBuf,
            #[source]
            source: IoError,
        },
        #[error(transparent)]
        Io(#[from] IoError),
    }
}
