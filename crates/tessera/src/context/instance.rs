use std::{
    ffi::{CStr, CString},
    sync::Arc,
};

use ash::vk;
use raw_window_handle::HasDisplayHandle;

use super::{CapabilityQuery, Debugger, capability::PORTABILITY_ENUMERATION};
use crate::error::{CallSite, InstanceError};

pub const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

///Layers, extensions and the application name of the instance that is about to be created. Start with
/// [Instance::load] or [Instance::linked], finish with [build](InstanceBuilder::build).
pub struct InstanceBuilder {
    pub entry: ash::Entry,
    pub application_name: CString,
    pub validation: bool,
    pub enabled_layers: Vec<CString>,
    pub enabled_extensions: Vec<CString>,
    available: CapabilityQuery,
}

impl InstanceBuilder {
    fn new(entry: ash::Entry) -> Result<Self, InstanceError> {
        let available = CapabilityQuery::instance(&entry)?;
        Ok(InstanceBuilder {
            entry,
            application_name: c"tessera".to_owned(),
            validation: false,
            enabled_layers: Vec::new(),
            enabled_extensions: Vec::new(),
            available,
        })
    }

    ///Creates the instance. Validation adds its layer, `VK_EXT_debug_utils` and a messenger. Portability loaders get
    /// portability enumeration enabled.
    pub fn build(mut self) -> Result<Arc<Instance>, InstanceError> {
        if self.validation {
            self = self.with_layer(VALIDATION_LAYER)?;
            self = self.with_extension(ash::ext::debug_utils::NAME)?;
        }

        let mut flags = vk::InstanceCreateFlags::empty();
        if self.available.requires_portability() {
            self = self.with_extension(PORTABILITY_ENUMERATION)?;
            flags |= vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
        }

        let InstanceBuilder {
            entry,
            application_name,
            validation,
            enabled_layers,
            enabled_extensions,
            available,
        } = self;

        let app_desc = vk::ApplicationInfo::default()
            .application_name(&application_name)
            .engine_name(c"tessera")
            .api_version(vk::make_api_version(
                0,
                Instance::API_VERSION_MAJOR,
                Instance::API_VERSION_MINOR,
                Instance::API_VERSION_PATCH,
            ));

        #[cfg(feature = "logging")]
        log::info!(
            "Creating Vulkan {}.{} instance for {:?}, layers: {:?}, extensions: {:?}",
            Instance::API_VERSION_MAJOR,
            Instance::API_VERSION_MINOR,
            application_name,
            enabled_layers,
            enabled_extensions
        );

        let extension_ptrs = enabled_extensions
            .iter()
            .map(|ext| ext.as_ptr())
            .collect::<Vec<_>>();
        let layer_ptrs = enabled_layers
            .iter()
            .map(|l| l.as_ptr())
            .collect::<Vec<_>>();

        let create_info = vk::InstanceCreateInfo::default()
            .flags(flags)
            .application_info(&app_desc)
            .enabled_extension_names(&extension_ptrs)
            .enabled_layer_names(&layer_ptrs);

        let inner =
            unsafe { entry.create_instance(&create_info, None) }.during("vkCreateInstance")?;

        let debugger = if validation {
            match Debugger::new(&entry, &inner) {
                Ok(d) => Some(d),
                Err(e) => {
                    unsafe { inner.destroy_instance(None) };
                    return Err(e.into());
                }
            }
        } else {
            None
        };

        Ok(Arc::new(Instance {
            entry,
            inner,
            debugger,
            enabled_extensions,
            available,
        }))
    }

    pub fn is_layer_available(&self, name: &CStr) -> bool {
        self.available.has_layer(name)
    }

    ///True if the loader offers the instance extension `name`.
    pub fn is_extension_available(&self, name: &CStr) -> bool {
        self.available.has_extension(name)
    }

    ///Enables `name`. Fails if the loader does not offer it, enabling it twice is a no-op.
    pub fn with_extension(mut self, name: &CStr) -> Result<Self, InstanceError> {
        if !self.is_extension_available(name) {
            return Err(InstanceError::MissingExtension(name.to_owned()));
        }

        if self.enabled_extensions.iter().any(|e| e.as_c_str() == name) {
            return Ok(self);
        }

        #[cfg(feature = "logging")]
        log::trace!("instance extension {:?}", name);
        self.enabled_extensions.push(name.to_owned());

        Ok(self)
    }

    ///Enables the instance layer `name`. Fails if the loader does not offer it.
    pub fn with_layer(mut self, name: &CStr) -> Result<Self, InstanceError> {
        if !self.is_layer_available(name) {
            return Err(InstanceError::MissingLayer(name.to_owned()));
        }

        if self.enabled_layers.iter().any(|l| l.as_c_str() == name) {
            #[cfg(feature = "logging")]
            log::warn!("Layer {:?} is already enabled", name);
            return Ok(self);
        }

        self.enabled_layers.push(name.to_owned());
        Ok(self)
    }

    ///Enables the surface extensions the display behind `handle` requires.
    pub fn for_surface(mut self, handle: &dyn HasDisplayHandle) -> Result<Self, InstanceError> {
        let required_extensions =
            ash_window::enumerate_required_extensions(handle.display_handle()?.as_raw())
                .during("vkEnumerateInstanceExtensionProperties")?;
        for r in required_extensions {
            let name = unsafe { CStr::from_ptr(*r) };
            self = self.with_extension(name)?;
        }

        Ok(self)
    }

    ///Requests `VK_LAYER_KHRONOS_validation`. Driver messages end up in `log`, or on stderr without the `logging` feature.
    pub fn enable_validation(mut self) -> Self {
        self.validation = true;
        self
    }

    pub fn with_application_name(mut self, name: &CStr) -> Self {
        self.application_name = name.to_owned();
        self
    }

    ///Edits the builder in place, for settings without a dedicated method.
    pub fn with(mut self, mapping: impl FnOnce(&mut Self)) -> Self {
        mapping(&mut self);
        self
    }
}

///Loaded entry point and the Vulkan instance created from it. Shared through an [Arc] by surfaces and devices.
///
/// Dropping it destroys the debug messenger (if any) and then the instance.
pub struct Instance {
    pub entry: ash::Entry,
    pub inner: ash::Instance,
    debugger: Option<Debugger>,
    enabled_extensions: Vec<CString>,
    available: CapabilityQuery,
}

impl Instance {
    ///Requested API version, 1.2.0.
    pub const API_VERSION_MAJOR: u32 = 1;
    pub const API_VERSION_MINOR: u32 = 2;
    pub const API_VERSION_PATCH: u32 = 0;

    ///Loads the Vulkan library at runtime.
    pub fn load() -> Result<InstanceBuilder, InstanceError> {
        let entry = unsafe { ash::Entry::load()? };
        InstanceBuilder::new(entry)
    }

    ///Uses the statically linked Vulkan loader.
    pub fn linked() -> Result<InstanceBuilder, InstanceError> {
        InstanceBuilder::new(ash::Entry::linked())
    }

    pub fn validation_enabled(&self) -> bool {
        self.debugger.is_some()
    }

    pub fn extension_enabled(&self, name: &CStr) -> bool {
        self.enabled_extensions.iter().any(|e| e.as_c_str() == name)
    }

    ///Layers and extensions the loader offered when this instance was created.
    pub fn capabilities(&self) -> &CapabilityQuery {
        &self.available
    }

    pub fn enumerate_physical_devices(&self) -> Result<Vec<vk::PhysicalDevice>, InstanceError> {
        Ok(unsafe { self.inner.enumerate_physical_devices() }
            .during("vkEnumeratePhysicalDevices")?)
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        //messenger must go before the instance
        self.debugger.take();
        unsafe {
            self.inner.destroy_instance(None);
        }
    }
}
