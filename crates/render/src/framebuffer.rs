use crate::backend::{Backend, Dimensions, FramebufferId, SamplerSource};
use crate::error::RenderError;

/// Offscreen multisampled HDR target the scene is drawn into.
///
/// The color attachment is `Rgba16Float`, depth is `Depth32Float`. A size
/// change always creates a new target.
#[derive(Debug)]
pub struct Framebuffer {
    id: FramebufferId,
    dimensions: Dimensions,
    samples: u32,
}

impl Framebuffer {
    pub fn new<B: Backend>(
        backend: &mut B,
        dimensions: Dimensions,
        samples: u32,
    ) -> Result<Self, RenderError> {
        let id = backend.create_framebuffer(dimensions, samples)?;
        tracing::debug!(%dimensions, samples, "framebuffer created");
        Ok(Self {
            id,
            dimensions,
            samples,
        })
    }

    pub fn id(&self) -> FramebufferId {
        self.id
    }

    pub fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    pub fn samples(&self) -> u32 {
        self.samples
    }

    /// Sampler source for the resolved color attachment.
    pub fn color(&self) -> SamplerSource {
        SamplerSource::FramebufferColor(self.id)
    }

    /// Replace the target when `dimensions` differs. Returns whether a new
    /// target was created. On failure the old target is kept.
    pub fn resize<B: Backend>(
        &mut self,
        backend: &mut B,
        dimensions: Dimensions,
    ) -> Result<bool, RenderError> {
        if dimensions == self.dimensions {
            return Ok(false);
        }
        let replacement = Self::new(backend, dimensions, self.samples)?;
        let old = std::mem::replace(self, replacement);
        old.release(backend);
        Ok(true)
    }

    /// Redirect drawing into this target until the guard drops.
    pub fn bind<'a, B: Backend>(&self, backend: &'a mut B) -> FramebufferBinding<'a, B> {
        backend.bind_framebuffer(Some(self.id));
        FramebufferBinding { backend }
    }

    pub fn release<B: Backend>(self, backend: &mut B) {
        tracing::debug!(dimensions = %self.dimensions, "framebuffer released");
        backend.destroy_framebuffer(self.id);
    }
}

/// Scoped framebuffer binding. Rebinds the default target on drop.
pub struct FramebufferBinding<'a, B: Backend> {
    backend: &'a mut B,
}

impl<B: Backend> FramebufferBinding<'_, B> {
    pub fn backend(&mut self) -> &mut B {
        self.backend
    }
}

impl<B: Backend> Drop for FramebufferBinding<'_, B> {
    fn drop(&mut self) {
        self.backend.bind_framebuffer(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Call, RecordingBackend};

    #[test]
    fn resize_to_same_size_is_a_no_op() {
        let mut backend = RecordingBackend::new();
        let mut fb = Framebuffer::new(&mut backend, Dimensions::new(64, 32), 4).unwrap();
        assert!(!fb.resize(&mut backend, Dimensions::new(64, 32)).unwrap());
        assert_eq!(backend.counters().framebuffers_created, 1);

        assert!(fb.resize(&mut backend, Dimensions::new(32, 32)).unwrap());
        assert_eq!(backend.counters().framebuffers_created, 2);
        assert_eq!(backend.counters().framebuffers_destroyed, 1);
        assert_eq!(
            backend.framebuffer_size(fb.id()),
            Some(Dimensions::new(32, 32))
        );
        assert_eq!(backend.live_resources(), 1);
    }

    #[test]
    fn failed_resize_keeps_old_target() {
        let mut backend = RecordingBackend::new();
        let mut fb = Framebuffer::new(&mut backend, Dimensions::new(8, 8), 1).unwrap();
        assert!(fb.resize(&mut backend, Dimensions::new(0, 8)).is_err());
        assert_eq!(fb.dimensions(), Dimensions::new(8, 8));
        assert_eq!(backend.live_resources(), 1);
    }

    #[test]
    fn binding_restores_default_target() {
        let mut backend = RecordingBackend::new();
        let fb = Framebuffer::new(&mut backend, Dimensions::new(8, 8), 1).unwrap();
        backend.reset();
        {
            let mut bound = fb.bind(&mut backend);
            bound.backend().clear([0.0; 4]);
        }
        assert_eq!(
            backend.calls(),
            &[
                Call::BindFramebuffer(Some(fb.id())),
                Call::Clear([0.0; 4]),
                Call::BindFramebuffer(None),
            ]
        );
    }
}
