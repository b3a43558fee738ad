// First-person camera
//
// Rotation is stored in degrees. The projection flips Y for Vulkan's
// downward-pointing NDC so the scene table poses carry over unchanged.

use glam::{Mat4, Vec3};

pub struct Camera {
    pub position: Vec3,
    /// Pitch, yaw, roll in degrees
    pub rotation: Vec3,
    pub fov_y_degrees: f32,
    pub near: f32,
    pub far: f32,
    pub movement_speed: f32,
    pub rotation_speed: f32,

    pub view: Mat4,
    pub perspective: Mat4,

    pub moving_forward: bool,
    pub moving_back: bool,
    pub moving_left: bool,
    pub moving_right: bool,
}

impl Camera {
    pub fn new(position: [f32; 3], rotation: [f32; 3], near: f32, far: f32) -> Self {
        let mut camera = Self {
            position: Vec3::from(position),
            rotation: Vec3::from(rotation),
            fov_y_degrees: 60.0,
            near,
            far,
            movement_speed: 5.0,
            rotation_speed: 0.25,
            view: Mat4::IDENTITY,
            perspective: Mat4::IDENTITY,
            moving_forward: false,
            moving_back: false,
            moving_left: false,
            moving_right: false,
        };
        camera.update_view();
        camera
    }

    pub fn set_perspective(&mut self, aspect: f32) {
        let mut perspective =
            Mat4::perspective_rh(self.fov_y_degrees.to_radians(), aspect, self.near, self.far);
        // Vulkan clip space has Y pointing down
        perspective.y_axis.y *= -1.0;
        self.perspective = perspective;
    }

    pub fn rotate(&mut self, delta_x: f32, delta_y: f32) {
        self.rotation.x += delta_y * self.rotation_speed;
        self.rotation.y += delta_x * self.rotation_speed;
        self.rotation.x = self.rotation.x.clamp(-89.0, 89.0);
        self.update_view();
    }

    /// Advance the camera by the held movement keys
    pub fn update(&mut self, delta_time: f32) {
        if !self.is_moving() {
            return;
        }

        let front = self.front();
        let step = self.movement_speed * delta_time;

        if self.moving_forward {
            self.position += front * step;
        }
        if self.moving_back {
            self.position -= front * step;
        }
        if self.moving_left {
            self.position -= front.cross(Vec3::Y).normalize() * step;
        }
        if self.moving_right {
            self.position += front.cross(Vec3::Y).normalize() * step;
        }

        self.update_view();
    }

    pub fn is_moving(&self) -> bool {
        self.moving_forward || self.moving_back || self.moving_left || self.moving_right
    }

    fn front(&self) -> Vec3 {
        let pitch = self.rotation.x.to_radians();
        let yaw = self.rotation.y.to_radians();
        Vec3::new(
            -pitch.cos() * yaw.sin(),
            pitch.sin(),
            pitch.cos() * yaw.cos(),
        )
        .normalize()
    }

    fn update_view(&mut self) {
        let rotation = Mat4::from_rotation_x(self.rotation.x.to_radians())
            * Mat4::from_rotation_y(self.rotation.y.to_radians())
            * Mat4::from_rotation_z(self.rotation.z.to_radians());
        let translation = Mat4::from_translation(-self.position);
        self.view = rotation * translation;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perspective_flips_y() {
        let mut camera = Camera::new([0.0; 3], [0.0; 3], 0.1, 64.0);
        camera.set_perspective(16.0 / 9.0);
        // Standard right-handed projection has positive [1][1]; flipped is negative
        assert!(camera.perspective.y_axis.y < 0.0);
    }

    #[test]
    fn perspective_maps_configured_planes() {
        let mut camera = Camera::new([0.0; 3], [0.0; 3], 0.1, 64.0);
        camera.set_perspective(16.0 / 9.0);
        // Points on the near and far planes land at NDC depth 0 and 1
        let near = camera.perspective * glam::Vec4::new(0.0, 0.0, -0.1, 1.0);
        let far = camera.perspective * glam::Vec4::new(0.0, 0.0, -64.0, 1.0);
        assert!((near.z / near.w).abs() < 1e-5);
        assert!((far.z / far.w - 1.0).abs() < 1e-5);
    }

    #[test]
    fn pitch_is_clamped() {
        let mut camera = Camera::new([0.0; 3], [0.0; 3], 0.1, 64.0);
        camera.rotate(0.0, 100000.0);
        assert!(camera.rotation.x <= 89.0);
    }

    #[test]
    fn view_follows_position() {
        let mut camera = Camera::new([1.0, 2.0, 3.0], [0.0; 3], 0.1, 64.0);
        camera.moving_forward = true;
        let before = camera.position;
        camera.update(0.5);
        assert_ne!(before, camera.position);
        // With no rotation, forward moves along +Z
        assert!(camera.position.z > before.z);
        assert_eq!(camera.position.x, before.x);
    }
}
