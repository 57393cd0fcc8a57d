use std::ffi::CStr;

use ash::vk;

use crate::error::{CallSite, VkCallError};

///The external callback print function for debugging. Routes validation messages into the `log` crate,
/// or prints them if the `logging` feature is disabled.
pub unsafe extern "system" fn vulkan_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    #[allow(unused)] message_types: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _p_user_data: *mut core::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() {
        #[cfg(feature = "logging")]
        log::error!("TesseraDebugMsg: Got Msg, but no data!");
        return vk::FALSE;
    }

    let data = unsafe { &*p_callback_data };
    let id_name = if data.p_message_id_name.is_null() {
        c"unknown id"
    } else {
        unsafe { CStr::from_ptr(data.p_message_id_name) }
    };
    let msg = if data.p_message.is_null() {
        c"no message"
    } else {
        unsafe { CStr::from_ptr(data.p_message) }
    };
    let id = data.message_id_number;

    #[cfg(feature = "logging")]
    {
        if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
            log::error!("[{}: {:?}]: {:?}", id, id_name, msg);
        } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
            log::warn!("[{}: {:?}]: {:?}", id, id_name, msg);
        } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
            log::info!("[{}: {:?}]: {:?}", id, id_name, msg);
        } else {
            log::trace!("[{}: {:?}]: {:?}", id, id_name, msg);
        }
    }

    #[cfg(not(feature = "logging"))]
    eprintln!(
        "TesseraDebugMsg: Level: {:?}, Type: {:?}\nId[{}: {:?}]\nMsg: {:?}",
        message_severity, message_types, id, id_name, msg
    );

    //Never abort the call that triggered the message
    vk::FALSE
}

///Owns the debug-utils messenger that gets installed when validation is enabled.
/// Must be dropped before the instance it was created for.
pub struct Debugger {
    pub debug_instance: ash::ext::debug_utils::Instance,
    pub debug_messenger: vk::DebugUtilsMessengerEXT,
}

impl Debugger {
    pub fn new(entry: &ash::Entry, instance: &ash::Instance) -> Result<Self, VkCallError> {
        let debug_instance = ash::ext::debug_utils::Instance::new(entry, instance);
        let info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(vulkan_debug_callback));

        let debug_messenger = unsafe { debug_instance.create_debug_utils_messenger(&info, None) }
            .during("vkCreateDebugUtilsMessengerEXT")?;

        Ok(Debugger {
            debug_instance,
            debug_messenger,
        })
    }
}

impl Drop for Debugger {
    fn drop(&mut self) {
        if self.debug_messenger != vk::DebugUtilsMessengerEXT::null() {
            unsafe {
                self.debug_instance
                    .destroy_debug_utils_messenger(self.debug_messenger, None)
            };
        }
    }
}
