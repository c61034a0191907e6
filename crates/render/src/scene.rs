//! Scene assembly: model and entity arenas, lights and the active camera.
//!
//! Entities are grouped by the model they instance, in the order models
//! were added. The renderer walks the groups so each model's GPU state is
//! bound once per frame.

use slotmap::SlotMap;

use crate::backend::Backend;
use crate::camera::Camera;
use crate::entity::Entity;
use crate::error::RenderError;
use crate::light::{Light, MAX_LIGHTS};
use crate::model::Model;

slotmap::new_key_type! {
    pub struct ModelId;
    pub struct EntityId;
    pub struct LightId;
}

/// Entities sharing one model.
#[derive(Debug, Clone)]
pub struct Group {
    pub model: ModelId,
    pub entities: Vec<EntityId>,
}

#[derive(Debug, Default)]
pub struct Scene {
    models: SlotMap<ModelId, Model>,
    model_order: Vec<ModelId>,
    entities: SlotMap<EntityId, Entity>,
    groups: Vec<Group>,
    lights: SlotMap<LightId, Light>,
    light_order: Vec<LightId>,
    camera: Option<Camera>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_model(&mut self, model: Model) -> ModelId {
        tracing::debug!(model = %model.name(), "model added to scene");
        let id = self.models.insert(model);
        self.model_order.push(id);
        id
    }

    pub fn model(&self, id: ModelId) -> Option<&Model> {
        self.models.get(id)
    }

    pub fn find_model(&self, name: &str) -> Option<ModelId> {
        self.model_order
            .iter()
            .copied()
            .find(|id| self.models[*id].name() == name)
    }

    pub fn models(&self) -> impl Iterator<Item = (ModelId, &Model)> {
        self.model_order.iter().map(|id| (*id, &self.models[*id]))
    }

    /// Take a model out of the scene. Refused while entities instance it.
    pub fn remove_model(&mut self, id: ModelId) -> Result<Model, RenderError> {
        if !self.models.contains_key(id) {
            return Err(RenderError::UnknownModel);
        }
        let users = self
            .groups
            .iter()
            .find(|g| g.model == id)
            .map_or(0, |g| g.entities.len());
        if users > 0 {
            return Err(RenderError::ModelInUse(users));
        }
        self.model_order.retain(|m| *m != id);
        self.models.remove(id).ok_or(RenderError::UnknownModel)
    }

    /// Insert an entity into the group of its model.
    pub fn add_entity(&mut self, entity: Entity) -> Result<EntityId, RenderError> {
        let model = entity.model();
        if !self.models.contains_key(model) {
            return Err(RenderError::UnknownModel);
        }
        let id = self.entities.insert(entity);
        match self.groups.iter_mut().find(|g| g.model == model) {
            Some(group) => group.entities.push(id),
            None => {
                self.groups.push(Group {
                    model,
                    entities: vec![id],
                });
                self.sort_groups();
            }
        }
        Ok(id)
    }

    /// Add an entity at the model's initial transform.
    pub fn spawn(&mut self, model: ModelId) -> Result<EntityId, RenderError> {
        let entity = Entity::new(model, self.model(model).ok_or(RenderError::UnknownModel)?);
        self.add_entity(entity)
    }

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(id)
    }

    pub fn entity_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(id)
    }

    pub fn entities(&self) -> impl Iterator<Item = (EntityId, &Entity)> {
        self.entities.iter()
    }

    pub fn entities_mut(&mut self) -> impl Iterator<Item = (EntityId, &mut Entity)> {
        self.entities.iter_mut()
    }

    pub fn remove_entity(&mut self, id: EntityId) -> Option<Entity> {
        let entity = self.entities.remove(id)?;
        if let Some(group) = self.groups.iter_mut().find(|g| g.model == entity.model()) {
            group.entities.retain(|e| *e != id);
        }
        self.groups.retain(|g| !g.entities.is_empty());
        Some(entity)
    }

    /// Groups in model insertion order.
    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    /// Set the active camera. A scene has at most one; a second call
    /// replaces the first.
    pub fn add_camera(&mut self, camera: Camera) {
        if self.camera.is_some() {
            tracing::warn!("scene already has a camera, replacing it");
        }
        self.camera = Some(camera);
    }

    pub fn camera(&self) -> Option<&Camera> {
        self.camera.as_ref()
    }

    pub fn camera_mut(&mut self) -> Option<&mut Camera> {
        self.camera.as_mut()
    }

    pub fn add_light(&mut self, light: Light) -> LightId {
        let id = self.lights.insert(light);
        self.light_order.push(id);
        if self.light_order.len() > MAX_LIGHTS {
            tracing::warn!(
                lights = self.light_order.len(),
                max = MAX_LIGHTS,
                "scene has more lights than shaders receive, extra lights are ignored"
            );
        }
        id
    }

    pub fn light_mut(&mut self, id: LightId) -> Option<&mut Light> {
        self.lights.get_mut(id)
    }

    pub fn remove_light(&mut self, id: LightId) -> Option<Light> {
        self.light_order.retain(|l| *l != id);
        self.lights.remove(id)
    }

    /// Lights in insertion order.
    pub fn lights(&self) -> impl ExactSizeIterator<Item = &Light> + Clone + '_ {
        self.light_order.iter().map(|id| &self.lights[*id])
    }

    /// Drop every entity and release every model's GPU resources.
    pub fn release<B: Backend>(mut self, backend: &mut B) {
        self.groups.clear();
        self.entities.clear();
        for id in std::mem::take(&mut self.model_order) {
            if let Some(model) = self.models.remove(id) {
                model.release(backend);
            }
        }
    }

    fn sort_groups(&mut self) {
        let order = &self.model_order;
        self.groups
            .sort_by_key(|g| order.iter().position(|m| *m == g.model));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BuiltinShader, RecordingBackend};

    fn model(backend: &mut RecordingBackend, name: &str) -> Model {
        let shader = backend.builtin_shader(BuiltinShader::Forward);
        Model::builder(name).shader(shader).build(backend).unwrap()
    }

    #[test]
    fn groups_follow_model_order() {
        let mut backend = RecordingBackend::new();
        let mut scene = Scene::new();
        let a = scene.add_model(model(&mut backend, "a"));
        let b = scene.add_model(model(&mut backend, "b"));

        let b1 = scene.spawn(b).unwrap();
        let a1 = scene.spawn(a).unwrap();
        let b2 = scene.spawn(b).unwrap();

        let groups = scene.groups();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].model, a);
        assert_eq!(groups[0].entities, vec![a1]);
        assert_eq!(groups[1].entities, vec![b1, b2]);
    }

    #[test]
    fn removing_entities_keeps_order_and_drops_empty_groups() {
        let mut backend = RecordingBackend::new();
        let mut scene = Scene::new();
        let a = scene.add_model(model(&mut backend, "a"));
        let e1 = scene.spawn(a).unwrap();
        let e2 = scene.spawn(a).unwrap();
        let e3 = scene.spawn(a).unwrap();

        scene.remove_entity(e2).unwrap();
        assert_eq!(scene.groups()[0].entities, vec![e1, e3]);
        assert!(scene.entity(e2).is_none());

        scene.remove_entity(e1);
        scene.remove_entity(e3);
        assert!(scene.groups().is_empty());
    }

    #[test]
    fn models_in_use_cannot_be_removed() {
        let mut backend = RecordingBackend::new();
        let mut scene = Scene::new();
        let a = scene.add_model(model(&mut backend, "a"));
        let e = scene.spawn(a).unwrap();
        assert!(matches!(
            scene.remove_model(a),
            Err(RenderError::ModelInUse(1))
        ));

        scene.remove_entity(e);
        let removed = scene.remove_model(a).unwrap();
        removed.release(&mut backend);
        assert!(matches!(scene.spawn(a), Err(RenderError::UnknownModel)));
        assert_eq!(backend.live_resources(), 0);
    }

    #[test]
    fn second_camera_replaces_first() {
        let mut scene = Scene::new();
        let mut first = Camera::new();
        first.move_at(1.0, 0.0, 0.0);
        let mut second = Camera::new();
        second.move_at(2.0, 0.0, 0.0);
        scene.add_camera(first);
        scene.add_camera(second);
        assert_eq!(scene.camera(), Some(&second));
    }

    #[test]
    fn lights_keep_insertion_order_and_are_mutable() {
        let mut scene = Scene::new();
        let first = scene.add_light(Light::default());
        scene.add_light(Light::point(glam::Vec3::Y, 5.0));
        scene.light_mut(first).unwrap().intensity = 3.0;
        let lights: Vec<&Light> = scene.lights().collect();
        assert_eq!(lights.len(), 2);
        assert_eq!(lights[0].intensity, 3.0);
        assert_eq!(lights[1].range, 5.0);
    }

    #[test]
    fn release_frees_all_models() {
        let mut backend = RecordingBackend::new();
        let mut scene = Scene::new();
        let a = scene.add_model(model(&mut backend, "a"));
        scene.spawn(a).unwrap();
        scene.add_model(model(&mut backend, "b"));
        let b = scene.find_model("b").and_then(|id| scene.model(id));
        assert_eq!(b.map(|m| m.name()), Some("b"));
        scene.release(&mut backend);
        assert_eq!(backend.live_resources(), 0);
    }
}
