// Two Vulkan SSAO demos sharing one harness
//
// `ao_compute` runs SSAO and its blur as compute dispatches on a dedicated
// compute queue, chained to the graphics work with semaphores. `ao_gaussian_blur`
// keeps everything on the graphics queue and orders the passes with subpass
// dependencies instead.

pub mod ao_compute;
pub mod ao_gaussian_blur;
pub mod app;
pub mod backend;
pub mod camera;
pub mod config;
pub mod gbuffer;
pub mod scene;
pub mod ubo;

use config::Config;

/// Shared entry point for both demo binaries
pub fn init_logging() {
    use env_logger::Builder;
    use log::LevelFilter;

    let mut builder = Builder::from_default_env();
    builder.filter_level(LevelFilter::Info);
    builder.init();
}

pub fn load_config() -> Config {
    Config::load()
}
