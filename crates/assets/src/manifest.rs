//! YAML scene manifests.
//!
//! ```yaml
//! renderer: { fov: 60.0, samples: 4 }
//! camera: { position: [0.0, 0.0, 20.0], target: [0.0, 0.0, 0.0] }
//! lights:
//!   - { kind: directional, direction: [-1.0, -1.0, -1.0] }
//! models:
//!   - name: helmet
//!     geometry: { kind: file, path: models/helmet.glb }
//!     rotation: [90.0, 0.0, 0.0]
//! entities:
//!   - { model: helmet, translation: [0.0, 0.0, -10.0] }
//! ```

use std::path::Path;

use glam::Vec3;
use prism_render::{Backend, Camera, Entity, Environment, Light, Renderer, RendererConfig, Scene};
use serde::{Deserialize, Serialize};

use crate::error::AssetError;
use crate::model::{Geometry, ModelParams, load_model};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraParams {
    pub position: Vec3,
    #[serde(default)]
    pub target: Option<Vec3>,
}

impl CameraParams {
    pub fn camera(&self) -> Camera {
        let mut camera = Camera::new();
        camera.move_at(self.position.x, self.position.y, self.position.z);
        if let Some(target) = self.target {
            camera.look_at(target.x, target.y, target.z);
        }
        camera
    }
}

/// One placed instance of a manifest model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityParams {
    pub model: String,
    #[serde(default)]
    pub translation: Vec3,
    /// Degrees, applied X then Y then Z.
    #[serde(default)]
    pub rotation: Vec3,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneManifest {
    pub renderer: RendererConfig,
    pub environment: Environment,
    pub camera: Option<CameraParams>,
    pub lights: Vec<Light>,
    pub models: Vec<ModelParams>,
    pub entities: Vec<EntityParams>,
}

impl SceneManifest {
    /// Read a manifest file. Relative paths inside resolve against its directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, AssetError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| AssetError::io(path, e))?;
        let base = path.parent().unwrap_or(Path::new("."));
        let manifest = Self::from_yaml(&text, base)?;
        tracing::info!(
            path = %path.display(),
            models = manifest.models.len(),
            entities = manifest.entities.len(),
            lights = manifest.lights.len(),
            "manifest loaded"
        );
        Ok(manifest)
    }

    pub fn from_yaml(text: &str, base: &Path) -> Result<Self, AssetError> {
        let mut manifest: Self = serde_yaml::from_str(text)?;
        for model in &mut manifest.models {
            model.resolve_paths(base);
        }
        Ok(manifest)
    }

    pub fn to_yaml(&self) -> Result<String, AssetError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// A lit cube ten units in front of a camera at `(0, 0, 20)`.
    pub fn demo() -> Self {
        Self {
            camera: Some(CameraParams {
                position: Vec3::new(0.0, 0.0, 20.0),
                target: Some(Vec3::new(0.0, 0.0, -10.0)),
            }),
            lights: vec![
                Light::directional(Vec3::new(-1.0, -1.0, -1.0)).with_color(Vec3::ONE, 3.0),
                Light::point(Vec3::new(4.0, 4.0, 0.0), 30.0)
                    .with_color(Vec3::new(1.0, 0.8, 0.6), 40.0),
            ],
            models: vec![ModelParams::new("cube", Geometry::Cube { size: 4.0 })],
            entities: vec![EntityParams {
                model: "cube".into(),
                translation: Vec3::new(0.0, 0.0, -10.0),
                rotation: Vec3::new(30.0, 45.0, 0.0),
            }],
            ..Self::default()
        }
    }

    /// Load every model and place every entity. On failure the models
    /// loaded so far are released.
    pub fn build_scene<B: Backend>(&self, backend: &mut B) -> Result<Scene, AssetError> {
        let mut scene = Scene::new();
        match self.populate(backend, &mut scene) {
            Ok(()) => Ok(scene),
            Err(err) => {
                scene.release(backend);
                Err(err)
            }
        }
    }

    /// Push the manifest's environment to `renderer`.
    pub fn configure<B: Backend>(&self, renderer: &mut Renderer<B>) {
        *renderer.environment_mut() = self.environment;
    }

    fn populate<B: Backend>(&self, backend: &mut B, scene: &mut Scene) -> Result<(), AssetError> {
        for params in &self.models {
            let model = load_model(backend, params)?;
            scene.add_model(model);
        }

        for params in &self.entities {
            let id = scene
                .find_model(&params.model)
                .ok_or_else(|| AssetError::UnknownModel(params.model.clone()))?;
            let model = scene
                .model(id)
                .ok_or(prism_render::RenderError::UnknownModel)?;
            let mut entity = Entity::new(id, model);
            let t = params.translation;
            entity.translate(t.x, t.y, t.z);
            let r = params.rotation;
            entity.rotate(r.x.to_radians(), r.y.to_radians(), r.z.to_radians());
            scene.add_entity(entity)?;
        }

        if let Some(camera) = &self.camera {
            scene.add_camera(camera.camera());
        }
        for light in &self.lights {
            scene.add_light(*light);
        }
        Ok(())
    }
}
