use std::path::PathBuf;

use prism_render::RenderError;

/// Errors from loading assets and scene manifests.
#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("glTF error: {0}")]
    Gltf(#[from] gltf::Error),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("unsupported model format: {0}")]
    UnsupportedFormat(PathBuf),
    #[error("unsupported image format: {0}")]
    UnsupportedImageFormat(String),
    #[error("manifest entity references unknown model `{0}`")]
    UnknownModel(String),
    #[error(transparent)]
    Render(#[from] RenderError),
}

impl AssetError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
