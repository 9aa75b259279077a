//! Validation layer output routed into `log`.

use std::ffi::{CStr, c_char, c_void};

use ash::vk;

use crate::error::GraphicsError;

use super::conversion::vk_error;

const LOG_TARGET: &str = "sprig_graphics::vulkan";

pub fn create_debug_messenger(
    debug_utils: &ash::ext::debug_utils::Instance,
) -> Result<vk::DebugUtilsMessengerEXT, GraphicsError> {
    // INFO is mostly loader chatter; it still reaches `log` at trace level.
    let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE
                | vk::DebugUtilsMessageTypeFlagsEXT::GENERAL,
        )
        .pfn_user_callback(Some(on_message));

    unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
        .map_err(vk_error("create debug messenger"))
}

fn level(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> log::Level {
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::Level::Error
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        log::Level::Warn
    } else {
        log::Level::Trace
    }
}

fn source(kind: vk::DebugUtilsMessageTypeFlagsEXT) -> &'static str {
    if kind.contains(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION) {
        "validation"
    } else if kind.contains(vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE) {
        "performance"
    } else {
        "driver"
    }
}

/// # Safety
///
/// `text` is null or a nul-terminated string that outlives the call.
unsafe fn lossy(text: *const c_char) -> Option<String> {
    (!text.is_null()).then(|| unsafe { CStr::from_ptr(text) }.to_string_lossy().into_owned())
}

unsafe extern "system" fn on_message(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    kind: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    // SAFETY: the loader passes callback data valid for the duration of the call.
    let Some(data) = (unsafe { data.as_ref() }) else {
        return vk::FALSE;
    };
    let id = unsafe { lossy(data.p_message_id_name) }.unwrap_or_default();
    let message = unsafe { lossy(data.p_message) }.unwrap_or_default();

    log::log!(
        target: LOG_TARGET,
        level(severity),
        "Vulkan {} {id}: {message}",
        source(kind)
    );
    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_errors_and_warnings_are_loud() {
        type Severity = vk::DebugUtilsMessageSeverityFlagsEXT;
        assert_eq!(level(Severity::ERROR), log::Level::Error);
        assert_eq!(level(Severity::WARNING), log::Level::Warn);
        assert_eq!(level(Severity::INFO), log::Level::Trace);
        assert_eq!(level(Severity::VERBOSE), log::Level::Trace);
    }

    #[test]
    fn test_message_source() {
        type Kind = vk::DebugUtilsMessageTypeFlagsEXT;
        assert_eq!(source(Kind::VALIDATION | Kind::PERFORMANCE), "validation");
        assert_eq!(source(Kind::PERFORMANCE), "performance");
        assert_eq!(source(Kind::GENERAL), "driver");
    }

    #[test]
    fn test_null_text_is_none() {
        assert_eq!(unsafe { lossy(std::ptr::null()) }, None);
        assert_eq!(unsafe { lossy(c"VUID-x".as_ptr()) }.as_deref(), Some("VUID-x"));
    }
}
