//! Ordered anchor and tag collections driven by configuration or a UI
//!
//! Index-based operations mirror how an editing table addresses rows:
//! out-of-range indices are ignored rather than treated as errors.

use crate::core::constants::{ANCHOR_ID_BASE, DEFAULT_PATH_HISTORY_LIMIT, TAG_ID_BASE};
use crate::core::types::{Anchor, Tag};
use crate::processing::kalman::FilterParameters;
use nalgebra::Vector3;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistryError {
    #[error("node id 0x{0:04X} is already registered")]
    DuplicateId(u16),
}

#[derive(Debug, Clone, Default)]
pub struct AnchorRegistry {
    anchors: Vec<Anchor>,
}

impl AnchorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an anchor; the id defaults to `0xFF00 + len`
    pub fn add(&mut self, id: Option<u16>, position: Vector3<f64>, enabled: bool) -> Result<&Anchor, RegistryError> {
        let id = id.unwrap_or_else(|| ANCHOR_ID_BASE.wrapping_add(self.anchors.len() as u16));
        if self.anchors.iter().any(|a| a.id == id) {
            return Err(RegistryError::DuplicateId(id));
        }
        self.anchors.push(Anchor { id, position, enabled });
        let index = self.anchors.len() - 1;
        Ok(&self.anchors[index])
    }

    pub fn remove(&mut self, index: usize) -> Option<Anchor> {
        if index < self.anchors.len() {
            Some(self.anchors.remove(index))
        } else {
            None
        }
    }

    pub fn toggle_enable(&mut self, index: usize) {
        if let Some(anchor) = self.anchors.get_mut(index) {
            anchor.enabled = !anchor.enabled;
        }
    }

    pub fn set_position(&mut self, index: usize, position: Vector3<f64>) {
        if let Some(anchor) = self.anchors.get_mut(index) {
            anchor.position = position;
        }
    }

    /// Overwrite only the planar coordinates, keeping the anchor's height
    pub fn set_planar_position(&mut self, index: usize, x: f64, y: f64) {
        if let Some(anchor) = self.anchors.get_mut(index) {
            anchor.position.x = x;
            anchor.position.y = y;
        }
    }

    pub fn get(&self, index: usize) -> Option<&Anchor> {
        self.anchors.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Anchor> {
        self.anchors.iter()
    }

    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }

    pub fn active_indices(&self) -> Vec<usize> {
        self.anchors
            .iter()
            .enumerate()
            .filter(|(_, a)| a.enabled)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn ids_for_indices(&self, indices: &[usize]) -> Vec<u16> {
        indices
            .iter()
            .filter_map(|&i| self.anchors.get(i))
            .map(|a| a.id)
            .collect()
    }

    pub fn active_ids(&self) -> Vec<u16> {
        self.anchors.iter().filter(|a| a.enabled).map(|a| a.id).collect()
    }

    pub fn active_positions(&self) -> Vec<Vector3<f64>> {
        self.anchors.iter().filter(|a| a.enabled).map(|a| a.position).collect()
    }

    pub fn active(&self) -> Vec<&Anchor> {
        self.anchors.iter().filter(|a| a.enabled).collect()
    }
}

/// Tag collection; every tag added gets a fresh filter built from `filter_parameters`
#[derive(Debug, Clone)]
pub struct TagRegistry {
    tags: Vec<Tag>,
    filter_parameters: FilterParameters,
    path_limit: usize,
}

impl Default for TagRegistry {
    fn default() -> Self {
        Self::new(FilterParameters::default(), DEFAULT_PATH_HISTORY_LIMIT)
    }
}

impl TagRegistry {
    pub fn new(filter_parameters: FilterParameters, path_limit: usize) -> Self {
        Self {
            tags: Vec::new(),
            filter_parameters,
            path_limit,
        }
    }

    /// Add a tag; the id defaults to `len`
    pub fn add(&mut self, id: Option<u16>, height: f64, enabled: bool) -> Result<&Tag, RegistryError> {
        let id = id.unwrap_or_else(|| TAG_ID_BASE.wrapping_add(self.tags.len() as u16));
        if self.tags.iter().any(|t| t.id == id) {
            return Err(RegistryError::DuplicateId(id));
        }
        let mut tag = Tag::with_parameters(id, height, self.filter_parameters, self.path_limit);
        tag.enabled = enabled;
        self.tags.push(tag);
        let index = self.tags.len() - 1;
        Ok(&self.tags[index])
    }

    pub fn remove(&mut self, index: usize) -> Option<Tag> {
        if index < self.tags.len() {
            Some(self.tags.remove(index))
        } else {
            None
        }
    }

    pub fn toggle_enable(&mut self, index: usize) {
        if let Some(tag) = self.tags.get_mut(index) {
            tag.enabled = !tag.enabled;
        }
    }

    pub fn set_enable(&mut self, index: usize, enabled: bool) {
        if let Some(tag) = self.tags.get_mut(index) {
            tag.enabled = enabled;
        }
    }

    pub fn set_height(&mut self, index: usize, height: f64) {
        if let Some(tag) = self.tags.get_mut(index) {
            tag.height = height;
        }
    }

    pub fn get(&self, index: usize) -> Option<&Tag> {
        self.tags.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tag> {
        self.tags.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Tag> {
        self.tags.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn active_tags(&self) -> Vec<&Tag> {
        self.tags.iter().filter(|t| t.enabled).collect()
    }

    pub fn ids(&self) -> Vec<u16> {
        self.tags.iter().map(|t| t.id).collect()
    }

    pub fn clear_paths(&mut self) {
        for tag in &mut self.tags {
            tag.clear_path();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anchor_default_ids_and_duplicates() {
        let mut anchors = AnchorRegistry::new();
        assert_eq!(anchors.add(None, Vector3::zeros(), true).unwrap().id, 0xFF00);
        assert_eq!(anchors.add(None, Vector3::zeros(), true).unwrap().id, 0xFF01);
        assert_eq!(
            anchors.add(Some(0xFF00), Vector3::zeros(), true).unwrap_err(),
            RegistryError::DuplicateId(0xFF00)
        );
        assert_eq!(anchors.len(), 2);
    }

    #[test]
    fn test_anchor_active_selection() {
        let mut anchors = AnchorRegistry::new();
        anchors.add(Some(0xFF00), Vector3::new(0.0, 0.0, 1.0), true).unwrap();
        anchors.add(Some(0xFF01), Vector3::new(1.0, 0.0, 1.0), false).unwrap();
        anchors.add(Some(0xFF02), Vector3::new(0.0, 1.0, 1.0), true).unwrap();

        assert_eq!(anchors.active_indices(), vec![0, 2]);
        assert_eq!(anchors.active_ids(), vec![0xFF00, 0xFF02]);
        assert_eq!(anchors.active_positions()[1], Vector3::new(0.0, 1.0, 1.0));
        assert_eq!(anchors.ids_for_indices(&[2, 7, 1]), vec![0xFF02, 0xFF01]);

        anchors.toggle_enable(1);
        anchors.toggle_enable(9);
        assert_eq!(anchors.active_ids().len(), 3);
    }

    #[test]
    fn test_anchor_position_edits() {
        let mut anchors = AnchorRegistry::new();
        anchors.add(None, Vector3::new(1.0, 2.0, 3.0), true).unwrap();
        anchors.set_planar_position(0, 5.0, 6.0);
        assert_eq!(anchors.get(0).unwrap().position, Vector3::new(5.0, 6.0, 3.0));
        anchors.set_position(0, Vector3::new(0.0, 0.0, 0.0));
        assert_eq!(anchors.get(0).unwrap().position, Vector3::zeros());
        assert!(anchors.remove(3).is_none());
        assert!(anchors.remove(0).is_some());
        assert!(anchors.is_empty());
    }

    #[test]
    fn test_tag_registry_operations() {
        let mut tags = TagRegistry::default();
        tags.add(None, 1.0, true).unwrap();
        tags.add(None, 1.2, false).unwrap();
        assert_eq!(tags.ids(), vec![0, 1]);
        assert_eq!(tags.active_tags().len(), 1);

        tags.set_enable(1, true);
        tags.set_height(1, 0.8);
        assert_eq!(tags.active_tags().len(), 2);
        assert_eq!(tags.get(1).unwrap().height, 0.8);

        tags.toggle_enable(0);
        assert!(!tags.get(0).unwrap().enabled);
        assert!(tags.add(Some(1), 1.0, true).is_err());
    }
}
