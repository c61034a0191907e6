use glam::Vec3;
use prism_render::Camera;

const PITCH_LIMIT: f32 = 89.0 * std::f32::consts::PI / 180.0;

/// Yaw/pitch fly controls steering a [`Camera`].
///
/// Only ever drives the camera through `move_at` and `look_at`, the same
/// operations a scene script has.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlyController {
    pub yaw: f32,
    pub pitch: f32,
    pub speed: f32,
    pub sensitivity: f32,
}

impl Default for FlyController {
    fn default() -> Self {
        Self {
            yaw: -90.0_f32.to_radians(),
            pitch: 0.0,
            speed: 10.0,
            sensitivity: 0.003,
        }
    }
}

impl FlyController {
    /// Controller whose heading matches the camera's current forward vector.
    pub fn from_camera(camera: &Camera) -> Self {
        let forward = camera.forward();
        let pitch = forward.y.clamp(-1.0, 1.0).asin();
        Self {
            yaw: forward.z.atan2(forward.x),
            pitch: pitch.clamp(-PITCH_LIMIT, PITCH_LIMIT),
            ..Self::default()
        }
    }

    pub fn forward(&self) -> Vec3 {
        Vec3::new(
            self.yaw.cos() * self.pitch.cos(),
            self.pitch.sin(),
            self.yaw.sin() * self.pitch.cos(),
        )
        .normalize()
    }

    pub fn right(&self) -> Vec3 {
        self.forward().cross(Vec3::Y).normalize()
    }

    /// Move along `(right, up, forward)` in controller space for `dt` seconds.
    pub fn fly(&self, camera: &mut Camera, local: Vec3, dt: f32) {
        if local == Vec3::ZERO {
            return;
        }
        let offset = (self.right() * local.x + Vec3::Y * local.y + self.forward() * local.z)
            * self.speed
            * dt;
        let p = camera.position() + offset;
        camera.move_at(p.x, p.y, p.z);
        self.aim(camera);
    }

    /// Turn by a mouse delta in pixels.
    pub fn rotate(&mut self, camera: &mut Camera, dx: f32, dy: f32) {
        self.yaw += dx * self.sensitivity;
        self.pitch = (self.pitch - dy * self.sensitivity).clamp(-PITCH_LIMIT, PITCH_LIMIT);
        self.aim(camera);
    }

    fn aim(&self, camera: &mut Camera) {
        let target = camera.position() + self.forward();
        camera.look_at(target.x, target.y, target.z);
    }
}
