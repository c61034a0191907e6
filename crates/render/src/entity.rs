use glam::{Mat4, Vec3};

use crate::model::Model;
use crate::scene::ModelId;

/// A placed instance of a model.
///
/// Moves are relative to the entity's own frame: both [`translate`] and
/// [`rotate`] post-multiply onto the live transform.
///
/// [`translate`]: Entity::translate
/// [`rotate`]: Entity::rotate
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    model: ModelId,
    initial: Mat4,
    transform: Mat4,
    translation: Vec3,
    rotation: Vec3,
}

impl Entity {
    /// An instance of `model` starting at the model's initial transform.
    pub fn new(id: ModelId, model: &Model) -> Self {
        Self::with_transform(id, model.initial_transform())
    }

    pub fn with_transform(model: ModelId, initial: Mat4) -> Self {
        Self {
            model,
            initial,
            transform: initial,
            translation: Vec3::ZERO,
            rotation: Vec3::ZERO,
        }
    }

    pub fn model(&self) -> ModelId {
        self.model
    }

    pub fn transform(&self) -> &Mat4 {
        &self.transform
    }

    /// Sum of every translation applied since creation or the last reset.
    pub fn translation(&self) -> Vec3 {
        self.translation
    }

    /// Sum of every rotation applied, in radians per axis.
    pub fn rotation(&self) -> Vec3 {
        self.rotation
    }

    pub fn translate(&mut self, dx: f32, dy: f32, dz: f32) {
        let delta = Vec3::new(dx, dy, dz);
        self.transform *= Mat4::from_translation(delta);
        self.translation += delta;
    }

    /// Rotate about the local axes, X first, then Y, then Z.
    pub fn rotate(&mut self, rx: f32, ry: f32, rz: f32) {
        let rotation =
            Mat4::from_rotation_z(rz) * Mat4::from_rotation_y(ry) * Mat4::from_rotation_x(rx);
        self.transform *= rotation;
        self.rotation += Vec3::new(rx, ry, rz);
    }

    pub fn reset(&mut self) {
        self.transform = self.initial;
        self.translation = Vec3::ZERO;
        self.rotation = Vec3::ZERO;
    }
}
