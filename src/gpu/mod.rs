//! GPU device backends.
//!
//! The dispatcher depends on the [`GpuDevice`] trait, never on a concrete
//! backend, so this module compiles without any graphics API present.
//!
//! ## Backends
//! - `null`: deterministic in-process device, always available (tests, CI)
//! - `vulkan`: via the `ash` crate (enable the `gpu-vulkan` feature)

pub mod null;
pub mod primitives;
pub mod traits;

pub use null::NullDevice;
pub use primitives::{Fence, FenceFactory, Semaphore, SemaphoreFactory};
pub use traits::{GpuDevice, GpuError};

#[cfg(feature = "gpu-vulkan")]
pub mod vulkan;
