// Application harness
//
// Owns the window, device, swapchain and the final-pass framebuffers, and
// drives the frame loop. The demo behind the `Demo` trait owns everything
// else: offscreen passes, pipelines and the submission chain for a frame.
//
// Command buffers are pre-recorded once per swapchain (and re-recorded on
// resize), so only uniform updates happen per frame and a single frame is
// in flight at a time.

use crate::backend::{pipeline, Attachment, FrameSync, Swapchain, VulkanDevice};
use crate::camera::Camera;
use crate::config::Config;
use crate::ubo::{FAR_PLANE, NEAR_PLANE};
use anyhow::{Context, Result};
use ash::vk;
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::{ElementState, MouseButton, WindowEvent},
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Fullscreen, Window, WindowAttributes},
};

/// Render settings flipped at runtime from the keyboard
pub struct Toggles {
    pub ssao: bool,
    pub ssao_blur: bool,
    pub ssao_only: bool,
    pub depth_check: bool,
    pub use_lerp_trick: bool,
}

impl Default for Toggles {
    fn default() -> Self {
        Self {
            ssao: true,
            ssao_blur: true,
            ssao_only: false,
            depth_check: false,
            use_lerp_trick: true,
        }
    }
}

/// Shared window-sized resources every demo renders against
pub struct Base {
    pub device: Arc<VulkanDevice>,
    pub surface: vk::SurfaceKHR,
    pub surface_loader: ash::extensions::khr::Surface,
    pub swapchain: Swapchain,
    pub depth_format: vk::Format,
    pub depth: Attachment,
    /// Final pass rendering into the swapchain images
    pub render_pass: vk::RenderPass,
    pub framebuffers: Vec<vk::Framebuffer>,
    pub command_pool: vk::CommandPool,
    /// One pre-recorded buffer per swapchain image
    pub draw_commands: Vec<vk::CommandBuffer>,
    /// Compiled SPIR-V directory for this demo
    pub shader_dir: PathBuf,
    pub clear_color: [f32; 4],
}

impl Base {
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent
    }
}

pub trait Demo {
    /// Shader subdirectory name, e.g. "ao_compute"
    const NAME: &'static str;

    fn new(base: &Base, config: &Config) -> Result<Self>
    where
        Self: Sized;

    /// Push camera matrices and toggles into the uniform buffers
    fn update_uniforms(&mut self, camera: &Camera, toggles: &Toggles);

    /// Record all command buffers. Called at startup and after every resize.
    fn record_commands(&self, base: &Base) -> Result<()>;

    /// Submit the frame's work. The last submission must wait on
    /// `sync.image_available` somewhere in the chain, signal
    /// `sync.render_finished` and fence `sync.in_flight_fence`.
    fn submit(&self, base: &Base, sync: &FrameSync, image_index: u32) -> Result<()>;

    /// Recreate window-sized resources after the swapchain changed
    fn resized(&mut self, base: &Base) -> Result<()>;

    fn destroy(&mut self, device: &ash::Device);
}

pub fn run<D: Demo>(config: Config) -> Result<()> {
    let model = config.selected_model()?.clone();
    let camera = Camera::new(model.position, model.rotation, NEAR_PLANE, FAR_PLANE);

    let event_loop = EventLoop::new()?;
    let mut app = App::<D> {
        config,
        camera,
        toggles: Toggles::default(),
        window: None,
        base: None,
        demo: None,
        sync: None,
        needs_resize: false,
        is_minimized: false,
        rotating: false,
        last_cursor: None,
        last_frame: Instant::now(),
        frame_count: 0,
        last_fps_update: Instant::now(),
    };
    event_loop.run_app(&mut app)?;
    Ok(())
}

struct App<D: Demo> {
    config: Config,
    camera: Camera,
    toggles: Toggles,
    window: Option<Arc<Window>>,
    base: Option<Base>,
    demo: Option<D>,
    sync: Option<FrameSync>,
    needs_resize: bool,
    is_minimized: bool,
    rotating: bool,
    last_cursor: Option<(f64, f64)>,
    last_frame: Instant,
    frame_count: u32,
    last_fps_update: Instant,
}

impl<D: Demo> App<D> {
    fn init_vulkan(&mut self, window: Arc<Window>) -> Result<()> {
        log::info!("Initializing Vulkan...");

        let enable_validation = self.config.debug.validation_layers;
        let device = VulkanDevice::new(
            &self.config.window.title,
            window.raw_display_handle(),
            enable_validation,
        )?;

        let surface_loader =
            ash::extensions::khr::Surface::new(&device.entry, &device.instance);
        let surface = unsafe {
            ash_window::create_surface(
                &device.entry,
                &device.instance,
                window.raw_display_handle(),
                window.raw_window_handle(),
                None,
            )
            .context("Failed to create window surface")?
        };

        let surface_support = unsafe {
            surface_loader.get_physical_device_surface_support(
                device.physical_device,
                device.graphics_queue_family,
                surface,
            )?
        };
        anyhow::ensure!(surface_support, "GPU cannot present to this surface");

        let size = window.inner_size();
        let swapchain = Swapchain::new(
            device.clone(),
            surface,
            &surface_loader,
            size.width,
            size.height,
            self.config.present_mode(),
        )?;

        let depth_format = device.find_depth_format()?;
        let depth = Attachment::new(
            &device,
            depth_format,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            swapchain.extent,
        )?;

        let render_pass =
            pipeline::create_swapchain_render_pass(&device, swapchain.format, depth_format)?;
        let framebuffers = create_swapchain_framebuffers(&device, &swapchain, &depth, render_pass)?;

        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(device.graphics_queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool = unsafe { device.device.create_command_pool(&pool_info, None)? };

        let draw_commands =
            allocate_commands(&device, command_pool, swapchain.images.len() as u32)?;

        let shader_dir = PathBuf::from(&self.config.scene.shader_path).join(D::NAME);

        let base = Base {
            device: device.clone(),
            surface,
            surface_loader,
            swapchain,
            depth_format,
            depth,
            render_pass,
            framebuffers,
            command_pool,
            draw_commands,
            shader_dir,
            clear_color: self.config.graphics.clear_color,
        };

        self.camera.set_perspective(aspect(base.extent()));

        let demo = D::new(&base, &self.config)?;
        demo.record_commands(&base)?;

        self.sync = Some(FrameSync::new(&device)?);
        self.base = Some(base);
        self.demo = Some(demo);

        log::info!("Vulkan initialized");
        Ok(())
    }

    fn recreate_swapchain(&mut self) -> Result<()> {
        let window = match &self.window {
            Some(window) => window.clone(),
            None => return Ok(()),
        };
        let size = window.inner_size();
        if size.width == 0 || size.height == 0 {
            self.is_minimized = true;
            return Ok(());
        }
        self.is_minimized = false;

        let (base, demo) = match (&mut self.base, &mut self.demo) {
            (Some(base), Some(demo)) => (base, demo),
            _ => return Ok(()),
        };

        base.device.wait_idle()?;
        log::info!("Recreating swapchain: {}x{}", size.width, size.height);

        let device = base.device.clone();
        unsafe {
            for &framebuffer in &base.framebuffers {
                device.device.destroy_framebuffer(framebuffer, None);
            }
        }
        base.depth.destroy(&device.device);

        // The surface can only back one swapchain at a time
        base.swapchain = Swapchain::new(
            device.clone(),
            base.surface,
            &base.surface_loader,
            size.width,
            size.height,
            self.config.present_mode(),
        )?;

        base.depth = Attachment::new(
            &device,
            base.depth_format,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            base.swapchain.extent,
        )?;
        base.framebuffers =
            create_swapchain_framebuffers(&device, &base.swapchain, &base.depth, base.render_pass)?;

        unsafe {
            device
                .device
                .free_command_buffers(base.command_pool, &base.draw_commands);
        }
        base.draw_commands = allocate_commands(
            &device,
            base.command_pool,
            base.swapchain.images.len() as u32,
        )?;

        self.camera.set_perspective(aspect(base.extent()));

        demo.resized(base)?;
        demo.record_commands(base)?;

        self.needs_resize = false;
        Ok(())
    }

    fn render_frame(&mut self) -> Result<bool> {
        if self.is_minimized {
            return Ok(false);
        }
        if self.needs_resize {
            self.recreate_swapchain()?;
            if self.is_minimized {
                return Ok(false);
            }
        }

        let delta = self.last_frame.elapsed().as_secs_f32();
        self.last_frame = Instant::now();
        self.camera.update(delta);

        let (base, demo, sync) = match (&self.base, &mut self.demo, &self.sync) {
            (Some(base), Some(demo), Some(sync)) => (base, demo, sync),
            _ => return Ok(false),
        };
        let device = &base.device;

        // The fence wait must come before the acquire: once the previous
        // frame's fenced submit has retired, every earlier submit on the
        // queue has started, so image_available carries no pending wait
        // and may be handed to vkAcquireNextImageKHR again.
        unsafe {
            device
                .device
                .wait_for_fences(&[sync.in_flight_fence], true, u64::MAX)?;
        }

        let image_index = match base
            .swapchain
            .acquire_next_image(u64::MAX, sync.image_available)
        {
            Ok((index, suboptimal)) => {
                if suboptimal {
                    self.needs_resize = true;
                }
                index
            }
            Err(e) if is_out_of_date(&e) => {
                self.needs_resize = true;
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        unsafe {
            device.device.reset_fences(&[sync.in_flight_fence])?;
        }

        demo.update_uniforms(&self.camera, &self.toggles);
        demo.submit(base, sync, image_index)?;

        // Out-of-date comes back as Ok(true) from present; anything else
        // (device loss, surface loss) is fatal and propagates.
        if base
            .swapchain
            .present(device.graphics_queue, image_index, &[sync.render_finished])?
        {
            self.needs_resize = true;
        }

        Ok(true)
    }

    fn handle_key(&mut self, key: KeyCode, pressed: bool, event_loop: &ActiveEventLoop) {
        match key {
            KeyCode::KeyW => self.camera.moving_forward = pressed,
            KeyCode::KeyS => self.camera.moving_back = pressed,
            KeyCode::KeyA => self.camera.moving_left = pressed,
            KeyCode::KeyD => self.camera.moving_right = pressed,
            _ if !pressed => {}
            KeyCode::Escape => {
                if let Some(base) = &self.base {
                    let _ = base.device.wait_idle();
                }
                event_loop.exit();
            }
            KeyCode::F11 => self.toggle_fullscreen(),
            KeyCode::Digit1 => {
                self.toggles.ssao = !self.toggles.ssao;
                log::info!("SSAO: {}", self.toggles.ssao);
            }
            KeyCode::Digit2 => {
                self.toggles.ssao_blur = !self.toggles.ssao_blur;
                log::info!("SSAO blur: {}", self.toggles.ssao_blur);
            }
            KeyCode::Digit3 => {
                self.toggles.ssao_only = !self.toggles.ssao_only;
                log::info!("SSAO only: {}", self.toggles.ssao_only);
            }
            KeyCode::Digit4 => {
                self.toggles.depth_check = !self.toggles.depth_check;
                log::info!("Blur depth check: {}", self.toggles.depth_check);
            }
            KeyCode::Digit5 => {
                self.toggles.use_lerp_trick = !self.toggles.use_lerp_trick;
                log::info!("Blur lerp trick: {}", self.toggles.use_lerp_trick);
            }
            _ => {}
        }
    }

    fn toggle_fullscreen(&mut self) {
        if let Some(window) = &self.window {
            if window.fullscreen().is_some() {
                window.set_fullscreen(None);
            } else {
                window.set_fullscreen(Some(Fullscreen::Borderless(None)));
            }
            self.needs_resize = true;
        }
    }

    fn update_fps(&mut self) {
        if !self.config.debug.show_fps {
            return;
        }
        self.frame_count += 1;
        let elapsed = self.last_fps_update.elapsed().as_secs_f32();
        if elapsed >= 1.0 {
            if let Some(window) = &self.window {
                let fps = self.frame_count as f32 / elapsed;
                window.set_title(&format!("{} - {:.0} FPS", self.config.window.title, fps));
            }
            self.frame_count = 0;
            self.last_fps_update = Instant::now();
        }
    }
}

impl<D: Demo> ApplicationHandler for App<D> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let mut attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));
        if self.config.window.fullscreen {
            attributes = attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let window = match event_loop.create_window(attributes) {
            Ok(window) => Arc::new(window),
            Err(e) => {
                log::error!("Failed to create window: {e:?}");
                event_loop.exit();
                return;
            }
        };

        if let Err(e) = self.init_vulkan(window.clone()) {
            log::error!("Failed to initialize Vulkan: {e:?}");
            event_loop.exit();
            return;
        }

        self.window = Some(window);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                if let Some(base) = &self.base {
                    let _ = base.device.wait_idle();
                }
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if size.width == 0 || size.height == 0 {
                    self.is_minimized = true;
                } else {
                    self.is_minimized = false;
                    self.needs_resize = true;
                }
            }
            WindowEvent::RedrawRequested => match self.render_frame() {
                Ok(rendered) => {
                    if rendered {
                        self.update_fps();
                    }
                }
                Err(e) => {
                    log::error!("Render error: {e:?}");
                    if let Some(base) = &self.base {
                        let _ = base.device.wait_idle();
                    }
                    event_loop.exit();
                }
            },
            WindowEvent::KeyboardInput { event, .. } => {
                if let PhysicalKey::Code(key) = event.physical_key {
                    self.handle_key(key, event.state.is_pressed(), event_loop);
                }
            }
            WindowEvent::MouseInput { state, button, .. } => {
                if button == MouseButton::Left {
                    self.rotating = state == ElementState::Pressed;
                    if !self.rotating {
                        self.last_cursor = None;
                    }
                }
            }
            WindowEvent::CursorMoved { position, .. } => {
                if self.rotating {
                    if let Some((last_x, last_y)) = self.last_cursor {
                        let dx = (position.x - last_x) as f32;
                        let dy = (position.y - last_y) as f32;
                        self.camera.rotate(dx, dy);
                    }
                    self.last_cursor = Some((position.x, position.y));
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }
}

impl<D: Demo> Drop for App<D> {
    fn drop(&mut self) {
        if let Some(base) = self.base.take() {
            let _ = base.device.wait_idle();
            let device = base.device.clone();

            if let Some(mut demo) = self.demo.take() {
                demo.destroy(&device.device);
            }
            if let Some(sync) = self.sync.take() {
                sync.destroy(&device.device);
            }

            unsafe {
                for &framebuffer in &base.framebuffers {
                    device.device.destroy_framebuffer(framebuffer, None);
                }
                device.device.destroy_render_pass(base.render_pass, None);
                base.depth.destroy(&device.device);
                device.device.destroy_command_pool(base.command_pool, None);
            }

            // The swapchain must go before the surface it presents to
            drop(base.swapchain);
            unsafe {
                base.surface_loader.destroy_surface(base.surface, None);
            }
        }
    }
}

fn aspect(extent: vk::Extent2D) -> f32 {
    extent.width as f32 / extent.height.max(1) as f32
}

/// An out-of-date surface is recovered by recreating the swapchain; every
/// other acquire failure (device loss, surface loss) is fatal.
fn is_out_of_date(error: &anyhow::Error) -> bool {
    error.downcast_ref::<vk::Result>() == Some(&vk::Result::ERROR_OUT_OF_DATE_KHR)
}

fn create_swapchain_framebuffers(
    device: &VulkanDevice,
    swapchain: &Swapchain,
    depth: &Attachment,
    render_pass: vk::RenderPass,
) -> Result<Vec<vk::Framebuffer>> {
    swapchain
        .image_views
        .iter()
        .map(|&view| {
            pipeline::create_framebuffer(device, render_pass, &[view, depth.view], swapchain.extent)
        })
        .collect()
}

fn allocate_commands(
    device: &VulkanDevice,
    pool: vk::CommandPool,
    count: u32,
) -> Result<Vec<vk::CommandBuffer>> {
    let alloc_info = vk::CommandBufferAllocateInfo::builder()
        .command_pool(pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(count);
    unsafe {
        device
            .device
            .allocate_command_buffers(&alloc_info)
            .context("Failed to allocate command buffers")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_date_surface_is_recoverable() {
        let error = anyhow::Error::from(vk::Result::ERROR_OUT_OF_DATE_KHR);
        assert!(is_out_of_date(&error));
    }

    #[test]
    fn device_and_surface_loss_are_fatal() {
        for result in [
            vk::Result::ERROR_DEVICE_LOST,
            vk::Result::ERROR_SURFACE_LOST_KHR,
        ] {
            assert!(!is_out_of_date(&anyhow::Error::from(result)));
        }
    }
}
