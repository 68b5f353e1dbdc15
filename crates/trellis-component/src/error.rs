//! Error types for update handling and registries

use std::rc::Rc;

use trellis_inject::InjectionError;

/// Result type for component operations
pub type ComponentResult<T> = Result<T, ComponentError>;

/// Errors delivered to update waiters
///
/// Cloned to every waiter of a failed update cycle.
#[derive(Debug, Clone, thiserror::Error)]
pub enum UpdateError {
    /// An update listener failed
    #[error("Update listener failed: {0}")]
    Listener(Rc<anyhow::Error>),

    /// The update cycle kept rescheduling itself
    #[error(
        "Update loop detected: more than {limit} consecutive update cycles. Chain: {}",
        .chain.join(" -> ")
    )]
    LoopDetected {
        /// Configured cycle limit
        limit: usize,
        /// Change reasons of the cycles, oldest first
        chain: Vec<String>,
    },
}

impl UpdateError {
    /// Check if this error stems from loop detection
    pub fn is_loop_detected(&self) -> bool {
        matches!(self, UpdateError::LoopDetected { .. })
    }
}

/// Component and module registry errors
#[derive(Debug, thiserror::Error)]
pub enum ComponentError {
    /// A manipulator result element reuses a claimed template or values layer
    #[error("Can't add same template or value handler for multiple elements")]
    DuplicateManipulatorTarget,

    /// Selector is not a valid custom element name
    #[error("Invalid component selector \"{selector}\": {reason}")]
    InvalidSelector {
        /// Offending selector
        selector: String,
        /// What is wrong with it
        reason: &'static str,
    },

    /// Selector is already defined
    #[error("Component selector \"{0}\" is already defined")]
    DuplicateSelector(String),

    /// Selector was never defined
    #[error("Component selector \"{0}\" is not defined")]
    UnknownSelector(String),

    /// A module is used inside a manipulator scope it is forbidden in
    #[error("Module for attribute \"{attribute}\" is not allowed inside manipulator scopes")]
    ForbiddenInManipulatorScope {
        /// Attribute that selected the module
        attribute: String,
    },

    /// No expression module is registered
    #[error("No expression module is registered")]
    MissingExpressionModule,

    /// Building an object failed
    #[error(transparent)]
    Injection(#[from] InjectionError),

    /// Configuration could not be parsed
    #[error("Failed to parse update configuration: {0}")]
    Config(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loop_detected_message() {
        let error = UpdateError::LoopDetected {
            limit: 2,
            chain: vec!["Manual".to_string(), "PropertySet \"a\"".to_string(), "Manual".to_string()],
        };

        assert!(error.is_loop_detected());
        assert_eq!(
            error.to_string(),
            "Update loop detected: more than 2 consecutive update cycles. Chain: Manual -> PropertySet \"a\" -> Manual"
        );
    }

    #[test]
    fn test_listener_error_message() {
        let error = UpdateError::Listener(Rc::new(anyhow::anyhow!("render failed")));
        assert!(!error.is_loop_detected());
        assert_eq!(error.to_string(), "Update listener failed: render failed");
    }

    #[test]
    fn test_injection_error_is_transparent() {
        let error: ComponentError = InjectionError::construction("Widget", "refused").into();
        assert_eq!(error.to_string(), InjectionError::construction("Widget", "refused").to_string());
    }
}
