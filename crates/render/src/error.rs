use crate::backend::Dimensions;

/// Errors from render core operations.
///
/// Construction-time failures (model assembly, shader compilation, renderer
/// init) surface here. Missing uniforms and missing optional textures are not
/// errors and never reach this type.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("failed to create {resource}: {reason}")]
    ResourceCreation {
        resource: &'static str,
        reason: String,
    },
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),
    #[error("invalid texture data: {0}")]
    InvalidTexture(String),
    #[error("model `{0}` has no shader")]
    MissingShader(String),
    #[error("unknown model handle")]
    UnknownModel,
    #[error("model is still referenced by {0} entities")]
    ModelInUse(usize),
    #[error("framebuffer size {0} is not renderable")]
    InvalidDimensions(Dimensions),
    #[error("surface error: {0}")]
    Surface(String),
}

impl RenderError {
    pub fn creation(resource: &'static str, reason: impl Into<String>) -> Self {
        Self::ResourceCreation {
            resource,
            reason: reason.into(),
        }
    }
}
