//! # Render Core
//!
//! Vulkan presentation engine: swapchain lifecycle, frame synchronization and
//! the per-frame presentation loop, plus the thin set of collaborators needed
//! to put a textured, mip-mapped model on screen.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use render_core::prelude::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ViewerConfig::default();
//!     render_core::foundation::logging::init(&config.log_level);
//!
//!     let mut window = Window::new(&config.window.title, config.window.width, config.window.height)?;
//!     let mut renderer = VulkanRenderer::new(&mut window, &config.renderer, &config.assets)?;
//!
//!     while !window.should_close() {
//!         window.process_events();
//!         if window.take_resize_request() {
//!             renderer.request_resize();
//!         }
//!         renderer.draw_frame(&mut window)?;
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod config;
pub mod core;
pub mod foundation;
pub mod render;

/// Common imports for engine users
pub mod prelude {
    pub use crate::{
        core::config::{AssetConfig, PresentModePreference, RendererConfig, ViewerConfig, WindowConfig},
        config::{Config, ConfigError},
        render::{
            uniforms::UniformBufferObject,
            vulkan::{
                renderer::{FrameOutcome, VulkanRenderer},
                VulkanError, VulkanResult, Window, WindowError,
            },
        },
    };
}
