use std::ffi::{CStr, CString};

use ahash::AHashSet;
use ash::vk;

use crate::error::{CallSite, VkCallError};

///Loader extension that is exposed by portability implementations like MoltenVK.
pub const PORTABILITY_ENUMERATION: &CStr = ash::khr::portability_enumeration::NAME;
///Device extension a portability implementation requires to be enabled whenever it is listed.
pub const PORTABILITY_SUBSET: &CStr = ash::khr::portability_subset::NAME;

///Read-only snapshot of available layers and extensions. Can either be queried for the loader (instance level)
/// or for a single physical device.
#[derive(Clone, Debug, Default)]
pub struct CapabilityQuery {
    layers: AHashSet<CString>,
    extensions: AHashSet<CString>,
}

///Parses the nul terminated name array Vulkan uses for layer and extension names.
pub(crate) fn parse_name(raw: &[std::ffi::c_char]) -> Option<CString> {
    match CStr::from_bytes_until_nul(bytemuck::cast_slice(raw)) {
        Ok(name) => Some(name.to_owned()),
        Err(_e) => {
            #[cfg(feature = "logging")]
            log::error!(
                "Could not parse name: {}",
                String::from_utf8_lossy(bytemuck::cast_slice(raw))
            );
            None
        }
    }
}

impl CapabilityQuery {
    ///Creates a query from known names. Mostly useful for testing scorers and filters.
    pub fn from_names<'a>(
        layers: impl IntoIterator<Item = &'a CStr>,
        extensions: impl IntoIterator<Item = &'a CStr>,
    ) -> Self {
        CapabilityQuery {
            layers: layers.into_iter().map(|l| l.to_owned()).collect(),
            extensions: extensions.into_iter().map(|e| e.to_owned()).collect(),
        }
    }

    pub fn from_properties(
        layers: &[vk::LayerProperties],
        extensions: &[vk::ExtensionProperties],
    ) -> Self {
        CapabilityQuery {
            layers: layers
                .iter()
                .filter_map(|l| parse_name(l.layer_name.as_slice()))
                .collect(),
            extensions: extensions
                .iter()
                .filter_map(|e| parse_name(e.extension_name.as_slice()))
                .collect(),
        }
    }

    ///Enumerates loader layers and instance extensions.
    pub fn instance(entry: &ash::Entry) -> Result<Self, VkCallError> {
        let layers = unsafe { entry.enumerate_instance_layer_properties() }
            .during("vkEnumerateInstanceLayerProperties")?;
        let extensions = unsafe { entry.enumerate_instance_extension_properties(None) }
            .during("vkEnumerateInstanceExtensionProperties")?;
        Ok(Self::from_properties(&layers, &extensions))
    }

    ///Enumerates the device extensions of `physical_device`. Device layers are deprecated, therefore the layer set stays empty.
    pub fn device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self, VkCallError> {
        let extensions = unsafe { instance.enumerate_device_extension_properties(physical_device) }
            .during("vkEnumerateDeviceExtensionProperties")?;
        Ok(Self::from_properties(&[], &extensions))
    }

    pub fn has_layer(&self, name: &CStr) -> bool {
        self.layers.contains(name)
    }

    pub fn has_extension(&self, name: &CStr) -> bool {
        self.extensions.contains(name)
    }

    ///Returns the first name of `required` that is not available, if there is any.
    pub fn first_missing_extension<'a>(&self, required: &[&'a CStr]) -> Option<&'a CStr> {
        required.iter().find(|r| !self.has_extension(r)).copied()
    }

    ///True if the loader is a portability implementation (for instance MoltenVK) that hides its devices unless
    /// portability enumeration is requested.
    pub fn requires_portability(&self) -> bool {
        self.has_extension(PORTABILITY_ENUMERATION)
    }

    pub fn layers(&self) -> impl Iterator<Item = &CStr> {
        self.layers.iter().map(|l| l.as_c_str())
    }

    pub fn extensions(&self) -> impl Iterator<Item = &CStr> {
        self.extensions.iter().map(|e| e.as_c_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ext_props(name: &CStr) -> vk::ExtensionProperties {
        let mut props = vk::ExtensionProperties::default();
        for (dst, src) in props
            .extension_name
            .iter_mut()
            .zip(name.to_bytes().iter())
        {
            *dst = *src as std::ffi::c_char;
        }
        props
    }

    #[test]
    fn parses_native_properties() {
        let props = [
            ext_props(ash::khr::swapchain::NAME),
            ext_props(ash::ext::debug_utils::NAME),
        ];
        let query = CapabilityQuery::from_properties(&[], &props);
        assert!(query.has_extension(ash::khr::swapchain::NAME));
        assert!(query.has_extension(ash::ext::debug_utils::NAME));
        assert!(!query.has_extension(ash::khr::ray_tracing_pipeline::NAME));
        assert_eq!(query.extensions().count(), 2);
    }

    #[test]
    fn reports_missing_extension() {
        let query = CapabilityQuery::from_names([], [ash::khr::swapchain::NAME]);
        assert_eq!(
            query.first_missing_extension(&[ash::khr::swapchain::NAME]),
            None
        );
        assert_eq!(
            query.first_missing_extension(&[
                ash::khr::swapchain::NAME,
                ash::khr::ray_tracing_pipeline::NAME
            ]),
            Some(ash::khr::ray_tracing_pipeline::NAME)
        );
    }

    #[test]
    fn detects_portability_loader() {
        let plain = CapabilityQuery::from_names([c"VK_LAYER_KHRONOS_validation"], []);
        assert!(plain.has_layer(c"VK_LAYER_KHRONOS_validation"));
        assert!(!plain.requires_portability());

        let molten = CapabilityQuery::from_names([], [PORTABILITY_ENUMERATION]);
        assert!(molten.requires_portability());
    }
}
