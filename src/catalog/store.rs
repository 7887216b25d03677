//! Camera catalog implementation

use std::collections::HashMap;
use std::sync::Arc;

use super::camera::CameraSpec;
use super::error::CatalogError;

/// Paths served by the front door itself; cameras may not claim them
pub const RESERVED_ENDPOINTS: &[&str] = &["/", "/status", "/capture-now", "/log-now"];

/// Read-only set of cameras, indexed by endpoint
#[derive(Debug, Clone, Default)]
pub struct CameraCatalog {
    /// Cameras in configuration order
    cameras: Vec<Arc<CameraSpec>>,
    /// Endpoint path to index in `cameras`
    by_endpoint: HashMap<String, usize>,
}

impl CameraCatalog {
    /// Build a catalog, rejecting duplicate names/endpoints and reserved paths
    pub fn new(cameras: Vec<CameraSpec>) -> Result<Self, CatalogError> {
        let mut catalog = Self::default();

        for camera in cameras {
            if !camera.endpoint.starts_with('/') {
                return Err(CatalogError::InvalidEndpoint(camera.endpoint));
            }
            if RESERVED_ENDPOINTS.contains(&camera.endpoint.as_str()) {
                return Err(CatalogError::ReservedEndpoint(camera.endpoint));
            }
            if catalog.by_name(&camera.name).is_some() {
                return Err(CatalogError::DuplicateName(camera.name));
            }
            if catalog.by_endpoint.contains_key(&camera.endpoint) {
                return Err(CatalogError::DuplicateEndpoint(camera.endpoint));
            }

            catalog
                .by_endpoint
                .insert(camera.endpoint.clone(), catalog.cameras.len());
            catalog.cameras.push(Arc::new(camera));
        }

        Ok(catalog)
    }

    /// Resolve a request path to a camera
    pub fn lookup(&self, path: &str) -> Option<&Arc<CameraSpec>> {
        self.by_endpoint.get(path).map(|&idx| &self.cameras[idx])
    }

    /// Find a camera by name
    pub fn by_name(&self, name: &str) -> Option<&Arc<CameraSpec>> {
        self.cameras.iter().find(|c| c.name == name)
    }

    /// Iterate cameras in configuration order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<CameraSpec>> {
        self.cameras.iter()
    }

    /// Number of cameras
    pub fn len(&self) -> usize {
        self.cameras.len()
    }

    /// Whether the catalog is empty
    pub fn is_empty(&self) -> bool {
        self.cameras.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cameras() -> Vec<CameraSpec> {
        vec![
            CameraSpec::new("Camera_Zone_1", "/camera1", "rtsp://10.0.0.1/stream1"),
            CameraSpec::new("Camera_Zone_2", "/camera2", "rtsp://10.0.0.2/11"),
        ]
    }

    #[test]
    fn test_lookup() {
        let catalog = CameraCatalog::new(cameras()).unwrap();

        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.lookup("/camera2").unwrap().name, "Camera_Zone_2");
        assert!(catalog.lookup("/camera3").is_none());
        assert!(catalog.lookup("camera1").is_none());
    }

    #[test]
    fn test_iteration_order() {
        let catalog = CameraCatalog::new(cameras()).unwrap();
        let names: Vec<_> = catalog.iter().map(|c| c.name.as_str()).collect();

        assert_eq!(names, ["Camera_Zone_1", "Camera_Zone_2"]);
    }

    #[test]
    fn test_duplicate_name() {
        let mut list = cameras();
        list.push(CameraSpec::new("Camera_Zone_1", "/camera9", "rtsp://x"));

        assert_eq!(
            CameraCatalog::new(list).unwrap_err(),
            CatalogError::DuplicateName("Camera_Zone_1".into())
        );
    }

    #[test]
    fn test_duplicate_endpoint() {
        let mut list = cameras();
        list.push(CameraSpec::new("Other", "/camera1", "rtsp://x"));

        assert_eq!(
            CameraCatalog::new(list).unwrap_err(),
            CatalogError::DuplicateEndpoint("/camera1".into())
        );
    }

    #[test]
    fn test_reserved_and_invalid_endpoints() {
        let reserved = vec![CameraSpec::new("cam", "/status", "rtsp://x")];
        assert!(matches!(
            CameraCatalog::new(reserved),
            Err(CatalogError::ReservedEndpoint(_))
        ));

        let relative = vec![CameraSpec::new("cam", "camera1", "rtsp://x")];
        assert!(matches!(
            CameraCatalog::new(relative),
            Err(CatalogError::InvalidEndpoint(_))
        ));
    }
}
