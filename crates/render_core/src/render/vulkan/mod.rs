//! Vulkan rendering backend
//!
//! Low-level RAII wrappers over `ash` plus the presentation engine in
//! [`renderer`]. Every wrapper owns exactly one Vulkan handle (or one tightly
//! coupled group) and releases it on drop.

pub mod buffer;
pub mod commands;
pub mod context;
pub mod descriptor;
pub mod framebuffer;
pub mod render_pass;
pub mod renderer;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod texture;
pub mod window;

pub use buffer::Buffer;
pub use commands::{ActiveRenderPass, CommandEncoder, CommandPool};
pub use context::{LogicalDevice, PhysicalDeviceInfo, SurfaceHandle, VulkanContext, VulkanError, VulkanInstance, VulkanResult};
pub use descriptor::FrameDescriptors;
pub use framebuffer::{DepthBuffer, Framebuffer};
pub use render_pass::RenderPass;
pub use shader::{GraphicsPipeline, ShaderModule};
pub use swapchain::{Swapchain, SurfaceSupport, SwapchainPlan};
pub use sync::{Fence, Semaphore};
pub use texture::Texture;
pub use window::{FramebufferSource, Window, WindowError};
