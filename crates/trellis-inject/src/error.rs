//! Error types for the injection register

use std::fmt;

/// Result type for injection operations
pub type InjectionResult<T> = Result<T, InjectionError>;

/// Which side of a registration lookup failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstructorRole {
    /// Constructor passed to `create_object`
    Constructor,
    /// Original side of a replacement
    Original,
    /// Replacement side of a replacement
    Replacement,
}

impl fmt::Display for ConstructorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstructorRole::Constructor => write!(f, "Constructor"),
            ConstructorRole::Original => write!(f, "Original constructor"),
            ConstructorRole::Replacement => write!(f, "Replacement constructor"),
        }
    }
}

/// Injection error types
#[derive(Debug, Clone, thiserror::Error)]
pub enum InjectionError {
    /// Constructor (or one side of a replacement) has no registration
    #[error("{role} \"{constructor}\" is not registered for injection")]
    NotRegistered {
        /// Which lookup failed
        role: ConstructorRole,
        /// Name of the offending constructor
        constructor: String,
    },

    /// A constructor parameter could not be resolved
    #[error("Parameter \"{parameter}\" of {constructor} is not injectable.\n{source}")]
    ParameterNotInjectable {
        /// Declared parameter type name
        parameter: String,
        /// Constructor that declared the parameter
        constructor: String,
        /// Failure of the parameter resolution
        source: Box<InjectionError>,
    },

    /// Constructor graph refers back to a constructor that is still being built
    #[error("Circular dependency detected: {}", chain.join(" -> "))]
    CircularDependency {
        /// Constructor names from the outermost request to the repeated one
        chain: Vec<String>,
    },

    /// Constructor asked for more arguments than were declared
    #[error("Constructor {constructor} requested argument {index} but only {available} were resolved")]
    MissingArgument {
        /// Constructor name
        constructor: String,
        /// Zero based argument index
        index: usize,
        /// Number of resolved arguments
        available: usize,
    },

    /// Resolved argument has a different type than the constructor expects
    #[error("Argument {index} of {constructor} is not of type {expected}")]
    ArgumentMismatch {
        /// Constructor name
        constructor: String,
        /// Zero based argument index
        index: usize,
        /// Expected type name
        expected: String,
    },

    /// Typed resolution produced an object of another type (e.g. after a replacement)
    #[error("Constructor {constructor} did not produce an object of type {expected}")]
    TypeMismatch {
        /// Constructor that produced the object
        constructor: String,
        /// Requested type name
        expected: String,
    },

    /// User constructor refused to build
    #[error("Construction of {constructor} failed: {message}")]
    Construction {
        /// Constructor name
        constructor: String,
        /// Failure description
        message: String,
    },
}

impl InjectionError {
    /// Create a construction failure for a constructor
    pub fn construction(constructor: impl Into<String>, message: impl Into<String>) -> Self {
        InjectionError::Construction {
            constructor: constructor.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_registered_names_side() {
        let error = InjectionError::NotRegistered {
            role: ConstructorRole::Replacement,
            constructor: "Logger".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Replacement constructor \"Logger\" is not registered for injection"
        );
    }

    #[test]
    fn test_parameter_error_keeps_child_message() {
        let child = InjectionError::NotRegistered {
            role: ConstructorRole::Constructor,
            constructor: "Database".to_string(),
        };
        let error = InjectionError::ParameterNotInjectable {
            parameter: "Database".to_string(),
            constructor: "Repository".to_string(),
            source: Box::new(child),
        };

        let message = error.to_string();
        assert!(message.starts_with("Parameter \"Database\" of Repository is not injectable."));
        assert!(message.ends_with("Constructor \"Database\" is not registered for injection"));
    }
}
