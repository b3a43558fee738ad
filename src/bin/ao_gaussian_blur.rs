use anyhow::Result;
use ssao_demos::ao_gaussian_blur::AoGaussianBlurDemo;
use ssao_demos::{app, init_logging, load_config};

fn main() -> Result<()> {
    init_logging();

    let config = load_config();
    log::info!("Starting SSAO demo (graphics queue, Gaussian blur)");
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.fullscreen {
            "fullscreen"
        } else {
            "windowed"
        }
    );

    app::run::<AoGaussianBlurDemo>(config)
}
