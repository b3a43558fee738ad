// Uniform buffer layouts
//
// These mirror the std140 blocks in the shaders. Field order matters, as do
// the trailing pads: Mat4 members are 16-byte aligned, so without explicit
// padding the structs would contain implicit padding and could not be Pod.

use bytemuck::{Pod, Zeroable};
use glam::Mat4;

pub const NEAR_PLANE: f32 = 0.1;
pub const FAR_PLANE: f32 = 64.0;

/// Per-frame camera and model transforms for the G-buffer pass
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct SceneParams {
    pub projection: Mat4,
    pub model: Mat4,
    pub view: Mat4,
    pub near_plane: f32,
    pub far_plane: f32,
    pub _pad: [f32; 2],
}

impl Default for SceneParams {
    fn default() -> Self {
        Self {
            projection: Mat4::IDENTITY,
            model: Mat4::IDENTITY,
            view: Mat4::IDENTITY,
            near_plane: NEAR_PLANE,
            far_plane: FAR_PLANE,
            _pad: [0.0; 2],
        }
    }
}

/// SSAO generation and composition controls. The booleans are i32 because
/// GLSL bools in std140 blocks occupy four bytes.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct SsaoParams {
    pub inv_projection: Mat4,
    pub ssao: i32,
    pub ssao_only: i32,
    pub ssao_blur: i32,
    pub _pad: i32,
}

impl Default for SsaoParams {
    fn default() -> Self {
        Self {
            inv_projection: Mat4::IDENTITY,
            ssao: 1,
            ssao_only: 0,
            ssao_blur: 1,
            _pad: 0,
        }
    }
}

/// Controls for the depth-aware Gaussian blur passes
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct BlurParams {
    pub depth_check: i32,
    pub depth_range: f32,
    pub near_plane: f32,
    pub far_plane: f32,
    pub use_lerp_trick: i32,
}

impl Default for BlurParams {
    fn default() -> Self {
        Self {
            depth_check: 0,
            depth_range: 0.001,
            near_plane: NEAR_PLANE,
            far_plane: FAR_PLANE,
            use_lerp_trick: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::{align_of, size_of};

    // Sizes are part of the shader interface; a mismatch silently corrupts
    // every field after the first misaligned one.

    #[test]
    fn scene_params_layout() {
        assert_eq!(size_of::<SceneParams>(), 208);
        assert_eq!(align_of::<SceneParams>(), 16);
    }

    #[test]
    fn ssao_params_layout() {
        assert_eq!(size_of::<SsaoParams>(), 80);
        assert_eq!(align_of::<SsaoParams>(), 16);
    }

    #[test]
    fn blur_params_layout() {
        assert_eq!(size_of::<BlurParams>(), 20);
        assert_eq!(align_of::<BlurParams>(), 4);
    }

    #[test]
    fn byte_views_preserve_fields() {
        let mut scene = SceneParams::default();
        scene.projection = Mat4::from_translation(glam::Vec3::new(1.0, 2.0, 3.0));
        scene.near_plane = 0.5;
        let scene_back: SceneParams = *bytemuck::from_bytes(bytemuck::bytes_of(&scene));
        assert_eq!(scene_back.projection, scene.projection);
        assert_eq!(scene_back.near_plane, scene.near_plane);
        assert_eq!(scene_back.far_plane, scene.far_plane);

        let mut ssao = SsaoParams::default();
        ssao.ssao_only = 1;
        let ssao_back: SsaoParams = *bytemuck::from_bytes(bytemuck::bytes_of(&ssao));
        assert_eq!(ssao_back.inv_projection, ssao.inv_projection);
        assert_eq!(ssao_back.ssao, ssao.ssao);
        assert_eq!(ssao_back.ssao_only, ssao.ssao_only);
        assert_eq!(ssao_back.ssao_blur, ssao.ssao_blur);

        let mut blur = BlurParams::default();
        blur.depth_check = 1;
        blur.depth_range = 0.002;
        let blur_back: BlurParams = *bytemuck::from_bytes(bytemuck::bytes_of(&blur));
        assert_eq!(blur_back.depth_check, blur.depth_check);
        assert_eq!(blur_back.depth_range, blur.depth_range);
        assert_eq!(blur_back.near_plane, blur.near_plane);
        assert_eq!(blur_back.far_plane, blur.far_plane);
        assert_eq!(blur_back.use_lerp_trick, blur.use_lerp_trick);
    }

    #[test]
    fn defaults_match_shader_expectations() {
        let ssao = SsaoParams::default();
        assert_eq!((ssao.ssao, ssao.ssao_only, ssao.ssao_blur), (1, 0, 1));

        let blur = BlurParams::default();
        assert_eq!(blur.depth_check, 0);
        assert!((blur.depth_range - 0.001).abs() < f32::EPSILON);
        assert_eq!(blur.use_lerp_trick, 1);
    }
}
