//! Registry error types

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// A session with this ID is already registered
    DuplicateSession(u64),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::DuplicateSession(id) => {
                write!(f, "Session already registered: {}", id)
            }
        }
    }
}

impl std::error::Error for RegistryError {}
