use serde::Deserialize;

/// Default name of the capture thread.
pub const DEFAULT_THREAD_NAME: &str = "uvc-capture";

/// Tunables applied to every capture session.
///
/// All fields have defaults, so embedders can deserialize a partial table
/// from their own configuration files.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Name given to the capture thread.
    pub thread_name: String,
    /// Brightness applied after the driver is opened.
    pub brightness: i32,
    /// Contrast applied after the driver is opened.
    pub contrast: i32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            thread_name: DEFAULT_THREAD_NAME.to_string(),
            brightness: 100,
            contrast: 70,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CaptureConfig::default();
        assert_eq!(config.thread_name, "uvc-capture");
        assert_eq!(config.brightness, 100);
        assert_eq!(config.contrast, 70);
    }

    #[test]
    fn test_partial_table_keeps_defaults() {
        let config: CaptureConfig = serde_json::from_str(r#"{ "contrast": 40 }"#).unwrap();
        assert_eq!(config.contrast, 40);
        assert_eq!(config.brightness, 100);
        assert_eq!(config.thread_name, DEFAULT_THREAD_NAME);
    }

    #[test]
    fn test_rejects_wrong_types() {
        let result: Result<CaptureConfig, _> = serde_json::from_str(r#"{ "brightness": "high" }"#);
        assert!(result.is_err());
    }
}
