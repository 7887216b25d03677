//! Catalog error types

/// Error type for catalog construction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    /// Two cameras share a name
    DuplicateName(String),
    /// Two cameras share an endpoint path
    DuplicateEndpoint(String),
    /// Endpoint collides with a built-in route
    ReservedEndpoint(String),
    /// Endpoint is not an absolute path
    InvalidEndpoint(String),
}

impl std::fmt::Display for CatalogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CatalogError::DuplicateName(name) => write!(f, "Duplicate camera name: {}", name),
            CatalogError::DuplicateEndpoint(path) => {
                write!(f, "Duplicate camera endpoint: {}", path)
            }
            CatalogError::ReservedEndpoint(path) => {
                write!(f, "Endpoint is reserved: {}", path)
            }
            CatalogError::InvalidEndpoint(path) => {
                write!(f, "Endpoint must start with '/': {}", path)
            }
        }
    }
}

impl std::error::Error for CatalogError {}
