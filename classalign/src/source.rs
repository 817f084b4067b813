//! Image identities and the storage collaborator that resolves them.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::image::Image;

/// An image entry of a reference or experimental list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRef {
    /// Storage identity, e.g. `000003@refs.stk`.
    pub id: String,
    /// Orientation angles of a reference projection; copied onto records.
    #[serde(default)]
    pub rot: f64,
    #[serde(default)]
    pub tilt: f64,
}

impl ImageRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            rot: 0.0,
            tilt: 0.0,
        }
    }

    pub fn with_angles(mut self, rot: f64, tilt: f64) -> Self {
        self.rot = rot;
        self.tilt = tilt;
        self
    }
}

/// Reads image content by identity.
pub trait ImageSource {
    fn read(&self, image: &ImageRef) -> Result<Image>;
}

/// Images held in memory, keyed by identity.
#[derive(Debug, Default, Clone)]
pub struct MemoryImageSource {
    images: HashMap<String, Image>,
}

impl MemoryImageSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, image: Image) {
        self.images.insert(id.into(), image);
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

impl ImageSource for MemoryImageSource {
    fn read(&self, image: &ImageRef) -> Result<Image> {
        self.images
            .get(&image.id)
            .cloned()
            .ok_or_else(|| Error::ImageRead {
                id: image.id.clone(),
                reason: "not present in source".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_known_and_missing() {
        let mut source = MemoryImageSource::new();
        source.insert("a", Image::zeros(4, 4));
        assert_eq!(source.len(), 1);

        let image = source.read(&ImageRef::new("a")).unwrap();
        assert_eq!(image.dimensions(), (4, 4));

        let err = source.read(&ImageRef::new("b")).unwrap_err();
        assert!(matches!(err, Error::ImageRead { ref id, .. } if id == "b"));
    }

    #[test]
    fn test_angles_default_to_zero_when_deserialized() {
        let image: ImageRef = serde_json::from_str(r#"{"id": "1@refs.stk"}"#).unwrap();
        assert_eq!(image, ImageRef::new("1@refs.stk"));
        assert_eq!(ImageRef::new("x").with_angles(10.0, 20.0).tilt, 20.0);
    }
}
