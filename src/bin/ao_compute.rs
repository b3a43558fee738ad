use anyhow::Result;
use ssao_demos::ao_compute::AoComputeDemo;
use ssao_demos::{app, init_logging, load_config};

fn main() -> Result<()> {
    init_logging();

    let config = load_config();
    log::info!("Starting SSAO demo (compute queue)");
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

    app::run::<AoComputeDemo>(config)
}
