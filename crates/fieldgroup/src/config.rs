#![forbid(unsafe_code)]

//! Group-level flags pushed onto every bound field.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Buffering, enabled and read-only state of a binding group.
///
/// Missing keys fall back to the defaults when deserialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct GroupConfig {
    /// Keep edits inside an open transaction until commit or discard.
    /// Default: true.
    pub buffered: bool,

    /// Default: true.
    pub enabled: bool,

    /// Applied to every field whose slot is writable; read-only slots always
    /// make their field read-only. Default: false.
    pub read_only: bool,
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            buffered: true,
            enabled: true,
            read_only: false,
        }
    }
}

impl GroupConfig {
    /// Unbuffered: edits reach listeners immediately and nothing is held
    /// back for discard.
    #[must_use]
    pub fn unbuffered() -> Self {
        Self {
            buffered: false,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_buffered_enabled_writable() {
        let config = GroupConfig::default();
        assert!(config.buffered);
        assert!(config.enabled);
        assert!(!config.read_only);
    }

    #[test]
    fn builders_compose() {
        let config = GroupConfig::unbuffered()
            .with_enabled(false)
            .with_read_only(true);
        assert_eq!(
            config,
            GroupConfig {
                buffered: false,
                enabled: false,
                read_only: true
            }
        );
    }

    #[cfg(feature = "serde")]
    #[test]
    fn partial_json_uses_defaults() {
        let config: GroupConfig =
            serde_json::from_str(r#"{"read_only": true}"#).expect("valid config");
        assert_eq!(config, GroupConfig::default().with_read_only(true));
    }
}
