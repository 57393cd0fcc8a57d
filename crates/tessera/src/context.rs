//! ## Context
//!
//! When working with Vulkan the [Device](ash::Device) is entry point for most of the operations.
//! It therefore is needed in most structures and functions calls that somehow transform state related to Vulkan.
//! The device is created from an [Instance](ash::Instance) which represents a runtime instance of Vulkan.
//!
//! Creating a device is a fixed sequence:
//!
//! 1. The [Instance] is built, usually with the extensions a window needs ([InstanceBuilder::for_surface]).
//! 2. A [DeviceSelector] scores every physical device ([AdapterCandidate]) and picks the best one.
//! 3. The queue families of that device are tagged with their capabilities ([QueueFamilies]). Graphics and present
//!    support are mandatory.
//! 4. The logical [Device] is created with one queue per unique family.
//!
//! ```ignore
//! let instance = Instance::linked()?.for_surface(&window)?.build()?;
//! let surface = Arc::new(Surface::new(&instance, &window)?);
//! let device = Device::initialize(&instance, &surface, &DeviceSelector::default())?;
//! ```

mod capability;
pub use capability::{CapabilityQuery, PORTABILITY_ENUMERATION, PORTABILITY_SUBSET};

mod debugger;
pub use debugger::{Debugger, vulkan_debug_callback};

mod instance;
pub use instance::{Instance, InstanceBuilder, VALIDATION_LAYER};

mod device;
pub use device::Device;
#[cfg(test)]
pub(crate) use device::headless_test_device;

mod queue;
pub use queue::{Queue, QueueBuilder, QueueCapabilities, QueueCapability, QueueFamilies};

mod physical_device;
pub use physical_device::{
    AdapterCandidate, DeviceSelector, REQUIRED_DEVICE_EXTENSIONS, Scorer, default_score,
    headless_score,
};
