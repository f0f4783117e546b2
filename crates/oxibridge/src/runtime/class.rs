//! `Class` registration and inheritance for the `oxibridge` runtime.
//!
//! Classes are **globally registered** and never deallocated:
//! - Each class name maps to exactly one `Class`
//! - Class metadata is leaked on registration and lives for the program
//! - Single inheritance, walked through [`Class::super_class`]
//!
//! The bridge only needs classes as the isa of [`Object`](super::Object)
//! instances, so there is no method table here; dispatch belongs to the
//! host runtime.
//!
//! # Thread Safety
//!
//! The registry is guarded by an `RwLock` and supports concurrent
//! registration and lookup from multiple threads.

use crate::error::{Error, Result};
use fxhash::FxHashMap;
use oxibridge_log::debug;
use std::fmt;
use std::sync::{OnceLock, PoisonError, RwLock};

/// Class metadata, leaked on registration.
pub(crate) struct ClassInner {
    name: Box<str>,
    super_class: Option<&'static ClassInner>,
}

/// Global class registry: name -> metadata.
struct ClassRegistry {
    classes: RwLock<FxHashMap<Box<str>, &'static ClassInner>>,
}

static REGISTRY: OnceLock<ClassRegistry> = OnceLock::new();

fn registry() -> &'static ClassRegistry {
    REGISTRY.get_or_init(|| ClassRegistry {
        classes: RwLock::new(FxHashMap::default()),
    })
}

/// A registered runtime class.
///
/// `Class` is a cheap handle (one pointer) to metadata that lives for the
/// rest of the program; copying it does not copy the class.
///
/// # Example
///
/// ```rust
/// use oxibridge::Class;
///
/// let root = Class::new_root("DocRoot").unwrap();
/// let child = Class::new("DocChild", &root).unwrap();
///
/// assert!(child.is_subclass_of(&root));
/// assert_eq!(child.super_class(), Some(root));
/// ```
#[derive(Clone, Copy)]
pub struct Class {
    pub(crate) inner: &'static ClassInner,
}

impl Class {
    /// Creates a new root class (no superclass).
    ///
    /// # Errors
    ///
    /// Returns [`Error::ClassAlreadyExists`] if the name is taken, or
    /// [`Error::InvalidClassName`] if it is empty.
    pub fn new_root(name: &str) -> Result<Self> {
        Self::register(name, None)
    }

    /// Creates a new class inheriting from `super_class`.
    ///
    /// # Errors
    ///
    /// Same as [`Class::new_root`].
    pub fn new(name: &str, super_class: &Class) -> Result<Self> {
        Self::register(name, Some(super_class.inner))
    }

    fn register(
        name: &str,
        super_class: Option<&'static ClassInner>,
    ) -> Result<Self> {
        if name.is_empty() {
            return Err(Error::InvalidClassName);
        }

        let mut classes = registry()
            .classes
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if classes.contains_key(name) {
            return Err(Error::ClassAlreadyExists {
                name: name.to_string(),
            });
        }

        let inner: &'static ClassInner = Box::leak(Box::new(ClassInner {
            name: name.into(),
            super_class,
        }));
        classes.insert(name.into(), inner);
        drop(classes);

        debug!(
            "registered class {name} (super: {})",
            super_class.map_or("<root>", |sc| &*sc.name)
        );

        Ok(Class { inner })
    }

    /// Looks up a previously registered class by name.
    #[must_use]
    pub fn named(name: &str) -> Option<Class> {
        registry()
            .classes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(|&inner| Class { inner })
    }

    /// Returns the class name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        &self.inner.name
    }

    /// Returns the superclass, or `None` for a root class.
    #[must_use]
    pub fn super_class(&self) -> Option<Class> {
        self.inner.super_class.map(|inner| Class { inner })
    }

    /// Returns `true` if `self` is `other` or inherits from it.
    #[must_use]
    pub fn is_subclass_of(&self, other: &Class) -> bool {
        let mut current = Some(self.inner);
        while let Some(inner) = current {
            if std::ptr::eq(inner, other.inner) {
                return true;
            }
            current = inner.super_class;
        }
        false
    }
}

impl PartialEq for Class {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.inner, other.inner)
    }
}

impl Eq for Class {}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Class")
            .field("name", &self.name())
            .field("super_class", &self.super_class().map(|sc| sc.name()))
            .finish()
    }
}
