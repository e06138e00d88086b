//! Type-erased named values.
//!
//! A [`Blob`] holds at most one value of any `Send + Sync` type together with
//! its [`TypeTag`]. Serializers are looked up by that tag.

use std::any::{Any, TypeId};

/// Runtime identifier of a value's type.
#[derive(Debug, Clone, Copy)]
pub struct TypeTag {
    id: TypeId,
    name: &'static str,
}

impl TypeTag {
    /// Returns the tag of `T`.
    pub fn of<T: Any>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// Returns the underlying `TypeId`.
    #[inline]
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Returns the Rust type name, for diagnostics only.
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns true if the tag identifies `T`.
    #[inline]
    pub fn is<T: Any>(&self) -> bool {
        self.id == TypeId::of::<T>()
    }
}

// equality is by TypeId; the name is informational
impl PartialEq for TypeTag {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeTag {}

impl std::hash::Hash for TypeTag {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// A container for one opaquely typed value.
#[derive(Default)]
pub struct Blob {
    value: Option<Box<dyn Any + Send + Sync>>,
    tag: Option<TypeTag>,
}

impl Blob {
    /// Creates an empty blob.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Creates a blob holding `value`.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            value: Some(Box::new(value)),
            tag: Some(TypeTag::of::<T>()),
        }
    }

    /// Returns true if the blob holds no value.
    pub fn is_empty(&self) -> bool {
        self.value.is_none()
    }

    /// Returns the tag of the held value, if any.
    pub fn tag(&self) -> Option<TypeTag> {
        self.tag
    }

    /// Returns true if the blob holds a `T`.
    pub fn is<T: Any>(&self) -> bool {
        self.tag.is_some_and(|tag| tag.is::<T>())
    }

    /// Returns the held value as `&dyn Any`.
    pub fn as_any(&self) -> Option<&(dyn Any + Send + Sync)> {
        self.value.as_deref()
    }

    /// Returns a reference to the held value if it is a `T`.
    pub fn get<T: Any>(&self) -> Option<&T> {
        self.value.as_ref().and_then(|v| v.downcast_ref::<T>())
    }

    /// Returns a mutable reference to the held value if it is a `T`.
    pub fn get_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.value.as_mut().and_then(|v| v.downcast_mut::<T>())
    }

    /// Replaces the content of the blob with `value`.
    pub fn set<T: Any + Send + Sync>(&mut self, value: T) {
        self.value = Some(Box::new(value));
        self.tag = Some(TypeTag::of::<T>());
    }

    /// Moves the held value out if it is a `T`, leaving the blob empty.
    ///
    /// A value of another type is left untouched and `None` is returned.
    pub fn take<T: Any>(&mut self) -> Option<T> {
        if !self.is::<T>() {
            return None;
        }
        let value = self.value.take()?;
        self.tag = None;
        value.downcast::<T>().ok().map(|boxed| *boxed)
    }

    /// Moves the whole content out, leaving the blob empty.
    pub fn take_any(&mut self) -> Blob {
        std::mem::take(self)
    }
}

impl std::fmt::Debug for Blob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Blob")
            .field("type", &self.tag.map(|t| t.name()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_new_get() {
        let blob = Blob::new(String::from("hello"));
        assert!(blob.is::<String>());
        assert!(!blob.is::<i32>());
        assert_eq!(blob.get::<String>().map(|s| s.as_str()), Some("hello"));
        assert_eq!(blob.get::<i32>(), None);
        assert_eq!(blob.tag(), Some(TypeTag::of::<String>()));
    }

    #[test]
    fn test_blob_empty() {
        let blob = Blob::empty();
        assert!(blob.is_empty());
        assert!(blob.tag().is_none());
        assert!(blob.as_any().is_none());
    }

    #[test]
    fn test_blob_set_retypes() {
        let mut blob = Blob::new(7_i32);
        blob.set("abc".to_string());
        assert!(blob.is::<String>());
        assert_eq!(blob.tag(), Some(TypeTag::of::<String>()));
        assert_eq!(blob.get::<String>().map(|s| s.as_str()), Some("abc"));
    }

    #[test]
    fn test_blob_take() {
        let mut blob = Blob::new(3_u64);
        assert_eq!(blob.take::<i32>(), None);
        assert_eq!(blob.take::<u64>(), Some(3));
        assert!(blob.is_empty());
    }

    #[test]
    fn test_type_tag_eq() {
        assert_eq!(TypeTag::of::<f32>(), TypeTag::of::<f32>());
        assert_ne!(TypeTag::of::<f32>(), TypeTag::of::<f64>());
        assert!(TypeTag::of::<f32>().name().contains("f32"));
    }
}
