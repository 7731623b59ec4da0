//! Host image registry.
//!
//! The controller never owns pixel data. Every image it touches lives in
//! a registry and is referred to by an [`ImageId`]. [`ImageRegistry`] is
//! the contract a host provides; [`Registry`] is an in-memory
//! implementation that the CLI and the tests use.
//!
//! Releasing an image is two steps, matching how display hosts work:
//! [`hide`](ImageRegistry::hide) takes it off screen and
//! [`free`](ImageRegistry::free) drops its pixels and retires the handle.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque handle to an image held by a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageId(u64);

impl ImageId {
    /// Wrap a raw id.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw id.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Errors raised by registry operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// The handle was never issued, or the image has been freed.
    #[error("no image with id {0} in the registry")]
    UnknownImage(ImageId),
}

/// Operations the controller needs from the host's image registry.
pub trait ImageRegistry {
    /// Pixel payload stored per image.
    type Image;

    /// Borrow the pixels of a live image.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownImage`] if `id` is not live.
    fn image(&self, id: ImageId) -> Result<&Self::Image, RegistryError>;

    /// Current title of a live image.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownImage`] if `id` is not live.
    fn title(&self, id: ImageId) -> Result<&str, RegistryError>;

    /// Register a new image. It becomes the active image.
    fn add(&mut self, title: String, image: Self::Image) -> ImageId;

    /// The active image, if any.
    fn active(&self) -> Option<ImageId>;

    /// Make a live image the active one.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownImage`] if `id` is not live.
    fn set_active(&mut self, id: ImageId) -> Result<(), RegistryError>;

    /// Release any exclusive-edit lock the host holds on the image.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownImage`] if `id` is not live.
    fn unlock(&mut self, id: ImageId) -> Result<(), RegistryError>;

    /// Take the image off screen without dropping its pixels.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownImage`] if `id` is not live.
    fn hide(&mut self, id: ImageId) -> Result<(), RegistryError>;

    /// Drop the pixels and retire the handle.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownImage`] if `id` is not live.
    fn free(&mut self, id: ImageId) -> Result<(), RegistryError>;

    /// Change the title of a live image.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownImage`] if `id` is not live.
    fn rename(&mut self, id: ImageId, title: String) -> Result<(), RegistryError>;

    /// Hide then free an image.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownImage`] if `id` is not live.
    fn release(&mut self, id: ImageId) -> Result<(), RegistryError> {
        self.hide(id)?;
        self.free(id)
    }
}

impl<T: ImageRegistry + ?Sized> ImageRegistry for &mut T {
    type Image = T::Image;

    fn image(&self, id: ImageId) -> Result<&Self::Image, RegistryError> {
        (**self).image(id)
    }

    fn title(&self, id: ImageId) -> Result<&str, RegistryError> {
        (**self).title(id)
    }

    fn add(&mut self, title: String, image: Self::Image) -> ImageId {
        (**self).add(title, image)
    }

    fn active(&self) -> Option<ImageId> {
        (**self).active()
    }

    fn set_active(&mut self, id: ImageId) -> Result<(), RegistryError> {
        (**self).set_active(id)
    }

    fn unlock(&mut self, id: ImageId) -> Result<(), RegistryError> {
        (**self).unlock(id)
    }

    fn hide(&mut self, id: ImageId) -> Result<(), RegistryError> {
        (**self).hide(id)
    }

    fn free(&mut self, id: ImageId) -> Result<(), RegistryError> {
        (**self).free(id)
    }

    fn rename(&mut self, id: ImageId, title: String) -> Result<(), RegistryError> {
        (**self).rename(id, title)
    }

    fn release(&mut self, id: ImageId) -> Result<(), RegistryError> {
        (**self).release(id)
    }
}

/// One image held by a [`Registry`].
#[derive(Debug, Clone)]
pub struct Entry<I> {
    title: String,
    image: I,
    visible: bool,
    locked: bool,
}

impl<I> Entry<I> {
    /// Current title.
    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Pixel payload.
    #[must_use]
    pub const fn image(&self) -> &I {
        &self.image
    }

    /// Whether the image is shown.
    #[must_use]
    pub const fn is_visible(&self) -> bool {
        self.visible
    }

    /// Whether the image is locked for exclusive editing.
    #[must_use]
    pub const fn is_locked(&self) -> bool {
        self.locked
    }
}

/// In-memory image registry.
///
/// Handles are issued from a monotonically increasing counter and are
/// never reused, so a freed handle stays invalid.
#[derive(Debug, Clone)]
pub struct Registry<I> {
    entries: BTreeMap<ImageId, Entry<I>>,
    next_id: u64,
    active: Option<ImageId>,
}

impl<I> Default for Registry<I> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
            next_id: 1,
            active: None,
        }
    }
}

impl<I> Registry<I> {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an image that the host holds locked, as a source opened
    /// for editing would be.
    pub fn add_locked(&mut self, title: String, image: I) -> ImageId {
        let id = self.insert(title, image);
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.locked = true;
        }
        id
    }

    /// Look up an entry.
    #[must_use]
    pub fn entry(&self, id: ImageId) -> Option<&Entry<I>> {
        self.entries.get(&id)
    }

    /// Handles of all live images, in issue order.
    pub fn live(&self) -> impl Iterator<Item = ImageId> + '_ {
        self.entries.keys().copied()
    }

    /// Number of live images.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no images are live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove a live image and hand its pixels back to the caller.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownImage`] if `id` is not live.
    pub fn take(&mut self, id: ImageId) -> Result<I, RegistryError> {
        let entry = self
            .entries
            .remove(&id)
            .ok_or(RegistryError::UnknownImage(id))?;
        if self.active == Some(id) {
            self.active = None;
        }
        Ok(entry.image)
    }

    fn insert(&mut self, title: String, image: I) -> ImageId {
        let id = ImageId(self.next_id);
        self.next_id += 1;
        self.entries.insert(
            id,
            Entry {
                title,
                image,
                visible: true,
                locked: false,
            },
        );
        self.active = Some(id);
        id
    }

    fn entry_mut(&mut self, id: ImageId) -> Result<&mut Entry<I>, RegistryError> {
        self.entries
            .get_mut(&id)
            .ok_or(RegistryError::UnknownImage(id))
    }
}

impl<I> ImageRegistry for Registry<I> {
    type Image = I;

    fn image(&self, id: ImageId) -> Result<&I, RegistryError> {
        self.entry(id)
            .map(Entry::image)
            .ok_or(RegistryError::UnknownImage(id))
    }

    fn title(&self, id: ImageId) -> Result<&str, RegistryError> {
        self.entry(id)
            .map(Entry::title)
            .ok_or(RegistryError::UnknownImage(id))
    }

    fn add(&mut self, title: String, image: I) -> ImageId {
        self.insert(title, image)
    }

    fn active(&self) -> Option<ImageId> {
        self.active
    }

    fn set_active(&mut self, id: ImageId) -> Result<(), RegistryError> {
        self.entry_mut(id)?;
        self.active = Some(id);
        Ok(())
    }

    fn unlock(&mut self, id: ImageId) -> Result<(), RegistryError> {
        self.entry_mut(id)?.locked = false;
        Ok(())
    }

    fn hide(&mut self, id: ImageId) -> Result<(), RegistryError> {
        self.entry_mut(id)?.visible = false;
        Ok(())
    }

    fn free(&mut self, id: ImageId) -> Result<(), RegistryError> {
        self.take(id).map(drop)
    }

    fn rename(&mut self, id: ImageId, title: String) -> Result<(), RegistryError> {
        self.entry_mut(id)?.title = title;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn added_image_becomes_active() {
        let mut registry = Registry::new();
        let a = registry.add("a".into(), ());
        assert_eq!(registry.active(), Some(a));
        let b = registry.add("b".into(), ());
        assert_eq!(registry.active(), Some(b));
    }

    #[test]
    fn handles_are_never_reused() {
        let mut registry = Registry::new();
        let a = registry.add("a".into(), ());
        registry.free(a).unwrap();
        let b = registry.add("b".into(), ());
        assert_ne!(a, b);
        assert_eq!(registry.image(a), Err(RegistryError::UnknownImage(a)));
    }

    #[test]
    fn release_hides_then_frees() {
        let mut registry = Registry::new();
        let a = registry.add("a".into(), 5_u8);
        registry.release(a).unwrap();
        assert!(registry.is_empty());
        assert_eq!(registry.active(), None);
        assert_eq!(registry.release(a), Err(RegistryError::UnknownImage(a)));
    }

    #[test]
    fn hide_keeps_pixels() {
        let mut registry = Registry::new();
        let a = registry.add("a".into(), 5_u8);
        registry.hide(a).unwrap();
        let entry = registry.entry(a).unwrap();
        assert!(!entry.is_visible());
        assert_eq!(*entry.image(), 5);
    }

    #[test]
    fn unlock_clears_lock() {
        let mut registry = Registry::new();
        let a = registry.add_locked("a".into(), ());
        assert!(registry.entry(a).unwrap().is_locked());
        registry.unlock(a).unwrap();
        assert!(!registry.entry(a).unwrap().is_locked());
    }

    #[test]
    fn rename_changes_title() {
        let mut registry = Registry::new();
        let a = registry.add("a".into(), ());
        registry.rename(a, "renamed".into()).unwrap();
        assert_eq!(registry.title(a).unwrap(), "renamed");
    }

    #[test]
    fn set_active_rejects_unknown_handle() {
        let mut registry: Registry<()> = Registry::new();
        let ghost = ImageId::new(42);
        assert_eq!(
            registry.set_active(ghost),
            Err(RegistryError::UnknownImage(ghost)),
        );
    }

    #[test]
    fn take_returns_pixels() {
        let mut registry = Registry::new();
        let a = registry.add("a".into(), vec![1_u8, 2, 3]);
        assert_eq!(registry.take(a).unwrap(), vec![1, 2, 3]);
        assert_eq!(registry.len(), 0);
    }
}
