pub mod domain;
pub mod error;
pub mod protocol;

/// Shown in place of an interpretation when the upstream service fails.
pub const DEFAULT_FALLBACK_MESSAGE: &str = "حدث خطأ في الخادم.";

/// Shown when the relay itself cannot be reached or answers garbage.
pub const DEFAULT_DELIVERY_FAILURE_MESSAGE: &str = "حدث خطأ في إرسال الرسالة";
