//! Rendering: geometry and per-frame data fed to the Vulkan backend

pub mod mesh;
pub mod uniforms;
pub mod vulkan;

pub use mesh::{Mesh, Vertex};
pub use uniforms::UniformBufferObject;

use thiserror::Error;

/// Errors raised while loading assets from disk
#[derive(Error, Debug)]
pub enum AssetError {
    /// File could not be read
    #[error("Failed to read {path}: {source}")]
    Io {
        /// Path that failed
        path: String,
        /// Underlying IO error
        source: std::io::Error,
    },

    /// OBJ model could not be parsed
    #[error("Failed to load model {path}: {source}")]
    Model {
        /// Path that failed
        path: String,
        /// Parser error
        source: tobj::LoadError,
    },

    /// Image could not be decoded
    #[error("Failed to load texture {path}: {source}")]
    Image {
        /// Path that failed
        path: String,
        /// Decoder error
        source: image::ImageError,
    },

    /// File parsed but holds nothing drawable
    #[error("Asset {path} is unusable: {reason}")]
    Unusable {
        /// Path that failed
        path: String,
        /// What is wrong with it
        reason: String,
    },
}
