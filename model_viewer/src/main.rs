//! Model viewer
//!
//! Spins a textured model in a resizable window. An optional first argument
//! names a `.toml` or `.ron` config file; without it defaults are used.

use std::time::Instant;

use render_core::foundation::logging;
use render_core::prelude::*;

/// Anything that stops the viewer
#[derive(thiserror::Error, Debug)]
enum ViewerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Window error: {0}")]
    Window(#[from] WindowError),

    #[error("Renderer error: {0}")]
    Renderer(#[from] VulkanError),
}

fn load_config() -> Result<ViewerConfig, ConfigError> {
    let config = match std::env::args().nth(1) {
        Some(path) => ViewerConfig::load_from_file(&path)?,
        None => ViewerConfig::default(),
    };
    config.validate()?;
    config.assets.validate()?;
    Ok(config)
}

fn run(config: &ViewerConfig) -> Result<(), ViewerError> {
    let mut window = Window::new(&config.window.title, config.window.width, config.window.height)?;
    let mut renderer = VulkanRenderer::new(&mut window, &config.renderer, &config.assets)?;

    let start_time = Instant::now();

    while !window.should_close() {
        window.process_events();
        if window.take_resize_request() {
            renderer.request_resize();
        }

        let elapsed = start_time.elapsed().as_secs_f32();
        renderer.update_uniforms(UniformBufferObject::spinning(elapsed, renderer.aspect_ratio()));

        if let FrameOutcome::Recreated(cause) = renderer.draw_frame(&mut window)? {
            log::info!("Swapchain recreated ({:?})", cause);
        }
    }

    let frames = renderer.frames_presented();
    let seconds = start_time.elapsed().as_secs_f64();
    if seconds > 0.0 {
        log::info!("Rendered {} frames, {:.1} fps average", frames, frames as f64 / seconds);
    }
    Ok(())
}

fn main() {
    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            logging::init("info");
            log::error!("{}", ViewerError::from(e));
            std::process::exit(1);
        }
    };
    logging::init(&config.log_level);
    log::info!("Starting {}", config.window.title);

    if let Err(e) = run(&config) {
        log::error!("{}", e);
        std::process::exit(1);
    }
    log::info!("Viewer closed");
}
