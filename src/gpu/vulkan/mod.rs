//! Vulkan device backend via the `ash` crate.
//!
//! Only available with the `gpu-vulkan` feature.

mod device;

pub use device::{enumerate_queue_families, VulkanDevice};
