use glam::{Mat4, Quat, Vec3};

/// Viewpoint feeding the shaders' view matrix.
///
/// Right-handed, +Y up. The camera looks down its local -Z axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    position: Vec3,
    orientation: Quat,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            orientation: Quat::IDENTITY,
        }
    }
}

impl Camera {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place the camera at an absolute position. Orientation is unchanged.
    pub fn move_at(&mut self, x: f32, y: f32, z: f32) {
        self.position = Vec3::new(x, y, z);
    }

    /// Turn the camera towards a world-space target.
    pub fn look_at(&mut self, x: f32, y: f32, z: f32) {
        let direction = Vec3::new(x, y, z) - self.position;
        if direction.length_squared() <= f32::EPSILON {
            tracing::warn!(
                position = ?self.position,
                "look_at target equals camera position, orientation unchanged"
            );
            return;
        }
        let direction = direction.normalize();
        // Looking straight along the up axis makes +Y degenerate.
        let up = if direction.cross(Vec3::Y).length_squared() < 1e-6 {
            Vec3::Z
        } else {
            Vec3::Y
        };
        let view = Mat4::look_to_rh(self.position, direction, up);
        self.orientation = Quat::from_mat4(&view).inverse().normalize();
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn orientation(&self) -> Quat {
        self.orientation
    }

    pub fn forward(&self) -> Vec3 {
        self.orientation * Vec3::NEG_Z
    }

    pub fn up(&self) -> Vec3 {
        self.orientation * Vec3::Y
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::from_rotation_translation(self.orientation, self.position).inverse()
    }
}
