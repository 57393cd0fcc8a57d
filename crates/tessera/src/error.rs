use std::ffi::CString;

use ash::{LoadingError, vk};

use thiserror::Error;

///A failed native call. Carries the name of the Vulkan entry point that failed together with the
/// returned result code. The display implementation of [vk::Result] decodes the code into a readable message.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("{operation} failed: {result}")]
pub struct VkCallError {
    pub operation: &'static str,
    #[source]
    pub result: vk::Result,
}

///Attaches the called operation's name to a raw [vk::Result] error.
///
///```ignore
/// let pool = unsafe { device.inner.create_command_pool(&info, None) }.during("vkCreateCommandPool")?;
///```
pub trait CallSite<T> {
    fn during(self, operation: &'static str) -> Result<T, VkCallError>;
}

impl<T> CallSite<T> for Result<T, vk::Result> {
    fn during(self, operation: &'static str) -> Result<T, VkCallError> {
        self.map_err(|result| VkCallError { operation, result })
    }
}

///Programming errors. Those are detected eagerly at the call that violates the precondition, before any native call is issued.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MisuseError {
    #[error("Render attachment index must be positive, was {0}")]
    NegativeAttachmentIndex(i32),
    #[error("Clear is only valid as a load operation")]
    ClearAsStoreOp,
    #[error("Store is only valid as a store operation")]
    StoreAsLoadOp,
    #[error("Load is only valid as a load operation")]
    LoadAsStoreOp,
    #[error("Render pass needs at least one attachment")]
    NoAttachments,
    #[error("Attachment at position {position} was created with index {index}")]
    AttachmentIndexMismatch { index: u32, position: usize },
    #[error("Render pass takes one color attachment, optionally followed by one depth attachment")]
    UnsupportedAttachmentLayout,
    #[error("Render pass has no framebuffer for swapchain image {0}")]
    UnknownImageIndex(u32),
    #[error("Extent can't be 0 on either axis, was {width}x{height}")]
    ZeroExtent { width: u32, height: u32 },
    #[error("Uniform block size can't be 0")]
    ZeroSizedUniformBlock,
    #[error("Descriptor binding {0} is used twice")]
    DuplicateBinding(u32),
    #[error("Input descriptor is limited to {capacity} items")]
    InputCapacityExceeded { capacity: usize },
    #[error("Upload of {requested} bytes exceeds the buffer's allocation of {allocated} bytes")]
    UploadExceedsAllocation { requested: u64, allocated: u64 },
    #[error("Texture expects {expected} bytes of pixel data, got {got}")]
    PixelSizeMismatch { expected: u64, got: u64 },
    #[error("Textures need 4 channels per pixel, got {0}")]
    UnsupportedChannelCount(u32),
    #[error("Command buffer can't go from {from} to {to}")]
    InvalidFrameTransition {
        from: &'static str,
        to: &'static str,
    },
    #[error("Pipeline needs a vertex and a fragment shader")]
    IncompleteShaderSet,
    #[error("Buffer was never uploaded")]
    BufferNotUploaded,
    #[error("Buffer was not created as index buffer")]
    NotAnIndexBuffer,
}

#[derive(Error, Debug)]
pub enum InstanceError {
    #[error(transparent)]
    VkError(#[from] VkCallError),
    #[error("Failed to load Vulkan entry point: {0}")]
    EntryLoading(#[from] LoadingError),
    #[error("Instance layer {0:?} is not available")]
    MissingLayer(CString),
    #[error("Instance extension {0:?} is not available")]
    MissingExtension(CString),
    #[error("Window handle is not available: {0}")]
    WindowHandle(#[from] raw_window_handle::HandleError),
}

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error(transparent)]
    VkError(#[from] VkCallError),
    #[error("Extension {0} is not supported by device")]
    UnsupportedExtension(String),
    #[error("Format {format:?} does not support {usage}")]
    UnsupportedFormat {
        format: vk::Format,
        usage: &'static str,
    },
    #[error("No physical device found. Is a Vulkan capable GPU and driver installed?")]
    NoPhysicalDevice,
    #[error("None of the {candidates} physical devices is suitable")]
    NoSuitableDevice { candidates: usize },
    #[error("No queue family with {0} capability")]
    MissingQueueFamily(&'static str),
    #[error("No memory type matches filter {filter:#b} with {flags:?}")]
    NoMemoryType {
        filter: u32,
        flags: vk::MemoryPropertyFlags,
    },
}

#[derive(Error, Debug)]
pub enum SwapchainError {
    #[error(transparent)]
    VkError(#[from] VkCallError),
    #[error("Surface reports no formats")]
    NoSurfaceFormat,
    #[error("Swapchain can't have a extent of 0 on either axis, was: {0:?}")]
    InvalidExtent(vk::Extent2D),
    #[error("Swapchain is out of date")]
    OutOfDate,
    #[error("Device was created without a surface")]
    NoSurface,
}

#[derive(Error, Debug)]
pub enum ShaderError {
    #[error(transparent)]
    VkError(#[from] VkCallError),
    #[error("Filesystem error: {0}")]
    FileError(#[from] std::io::Error),
    #[error("Shader entry point {0:?} contains a nul byte")]
    InvalidEntryPoint(String),
    #[error("Compiling {name} failed:\n{diagnostic}")]
    Compilation { name: String, diagnostic: String },
    #[error("No shader compiler available, enable the `shader_compiler` feature")]
    CompilerUnavailable,
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    VkError(#[from] VkCallError),
    #[error("Failed to allocate pipeline")]
    Allocation,
    #[error("Failed to allocate descriptor set")]
    DescriptorAllocation,
    #[error(transparent)]
    Misuse(#[from] MisuseError),
    #[error(transparent)]
    Resource(#[from] ResourceError),
}

#[derive(Error, Debug)]
pub enum ResourceError {
    #[error(transparent)]
    VkError(#[from] VkCallError),
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Misuse(#[from] MisuseError),
    #[error("Memory is not host visible and can't be mapped")]
    NotMappable,
    #[cfg(feature = "image_loading")]
    #[error("Failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
}

#[derive(Error, Debug)]
pub enum CommandBufferError {
    #[error(transparent)]
    VkError(#[from] VkCallError),
    #[error("Failed to allocate command buffer. Requested {count}, got {allocated}")]
    FailedToAllocate { allocated: usize, count: usize },
    #[error(transparent)]
    Misuse(#[from] MisuseError),
    #[error(transparent)]
    Swapchain(#[from] SwapchainError),
}

#[derive(Error, Debug)]
pub enum TesseraError {
    #[error("CommandBuffer error: {0}")]
    CommandBufferError(#[from] CommandBufferError),
    #[error("Device error: {0}")]
    DeviceError(#[from] DeviceError),
    #[error("Instance error: {0}")]
    InstanceError(#[from] InstanceError),
    #[error("Pipeline error: {0}")]
    PipelineError(#[from] PipelineError),
    #[error("Resource error: {0}")]
    ResourceError(#[from] ResourceError),
    #[error("Shader/ShaderModule error: {0}")]
    ShaderError(#[from] ShaderError),
    #[error("Swapchain error: {0}")]
    SwapchainError(#[from] SwapchainError),
    #[error("Misuse: {0}")]
    Misuse(#[from] MisuseError),
}

#[cfg(test)]
mod test {
    use ash::vk;
    use static_assertions::assert_impl_all;

    use crate::{
        TesseraError,
        error::{
            CallSite, CommandBufferError, DeviceError, InstanceError, MisuseError, PipelineError,
            ResourceError, ShaderError, SwapchainError, VkCallError,
        },
    };

    #[test]
    fn assure_send_sync() {
        assert_impl_all!(VkCallError: Send, Sync);
        assert_impl_all!(MisuseError: Send, Sync);
        assert_impl_all!(DeviceError: Send, Sync);
        assert_impl_all!(ShaderError: Send, Sync);
        assert_impl_all!(CommandBufferError: Send, Sync);
        assert_impl_all!(InstanceError: Send, Sync);
        assert_impl_all!(PipelineError: Send, Sync);
        assert_impl_all!(ResourceError: Send, Sync);
        assert_impl_all!(SwapchainError: Send, Sync);
        assert_impl_all!(TesseraError: Send, Sync);
    }

    #[test]
    fn call_site_names_operation() {
        let res: Result<(), vk::Result> = Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        let err = res.during("vkAllocateMemory").unwrap_err();
        assert_eq!(err.operation, "vkAllocateMemory");
        assert_eq!(err.result, vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);

        let msg = err.to_string();
        assert!(msg.starts_with("vkAllocateMemory failed"));
        assert!(msg.len() > "vkAllocateMemory failed: ".len());
    }

    #[test]
    fn misuse_propagates_through_area_errors() {
        let err: PipelineError = MisuseError::IncompleteShaderSet.into();
        let top: TesseraError = err.into();
        assert!(matches!(
            top,
            TesseraError::PipelineError(PipelineError::Misuse(MisuseError::IncompleteShaderSet))
        ));
    }
}
