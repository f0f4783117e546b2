//! Object allocation and lifecycle for the `oxibridge` runtime.
//!
//! Objects are heap-allocated and reference counted:
//! - Each object has an atomic reference count starting at 1
//! - `Clone` retains, `Drop` releases (shallow, identity preserving)
//! - [`Copying::copy`] allocates a new instance (deep, new identity)
//! - The object is deallocated when the count reaches 0
//!
//! Every object owns an [`Associations`] table. It is torn down together
//! with the object, which releases any strongly held associated values.

use crate::error::Result;
use crate::runtime::association::{AssociatedStorage, Associations, Copying};
use crate::runtime::class::{Class, ClassInner};
use oxibridge_log::trace;
use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};

/// Heap representation of an object.
struct RawObject {
    /// Isa pointer; classes are never deallocated.
    class: &'static ClassInner,
    /// Starts at 1, deallocated when it reaches 0.
    refcount: AtomicU32,
    /// Out-of-band values attached to this instance.
    associations: Associations,
}

/// A runtime instance.
///
/// # Example
///
/// ```rust
/// use oxibridge::{Class, Object};
///
/// let class = Class::new_root("ObjectDocExample").unwrap();
/// let obj1 = Object::new(&class).unwrap();
///
/// // Clone creates a new reference to the same object
/// let obj2 = obj1.clone();
///
/// assert_eq!(obj1, obj2);
/// assert_eq!(obj1.refcount(), 2);
/// ```
pub struct Object {
    /// Never null, valid while refcount > 0.
    ptr: NonNull<RawObject>,
}

impl Object {
    /// Creates a new instance of `class` with refcount 1.
    ///
    /// # Errors
    ///
    /// This does not fail at present.
    pub fn new(class: &Class) -> Result<Self> {
        Ok(Self::allocate(class.inner, Associations::new()))
    }

    fn allocate(class: &'static ClassInner, associations: Associations) -> Self {
        let raw = Box::new(RawObject {
            class,
            refcount: AtomicU32::new(1),
            associations,
        });

        Object {
            ptr: NonNull::from(Box::leak(raw)),
        }
    }

    fn raw(&self) -> &RawObject {
        // SAFETY: self holds one reference, so the allocation is alive.
        unsafe { self.ptr.as_ref() }
    }

    fn retain(&self) {
        let old = self.raw().refcount.fetch_add(1, Ordering::AcqRel);
        assert!(old != u32::MAX, "Reference count overflow in Object::retain");
    }

    /// Drops one reference, deallocating on the last.
    ///
    /// # Safety
    ///
    /// Must be called exactly once per reference, and `self` must not be
    /// used afterwards.
    unsafe fn release(&self) {
        let old = self.raw().refcount.fetch_sub(1, Ordering::AcqRel);
        if old == 1 {
            trace!(
                "deallocating {} instance at {:#x}",
                self.class().name(),
                self.identity()
            );
            // SAFETY: ptr came from Box::leak and this was the last
            // reference. Dropping the box drops the association table.
            unsafe { drop(Box::from_raw(self.ptr.as_ptr())) };
        }
    }

    /// Returns the object's class.
    #[must_use]
    pub fn class(&self) -> Class {
        Class {
            inner: self.raw().class,
        }
    }

    /// Returns the current reference count.
    ///
    /// Only a snapshot; other threads may retain or release concurrently.
    #[must_use]
    pub fn refcount(&self) -> u32 {
        self.raw().refcount.load(Ordering::Acquire)
    }

    /// Returns the object's stable address, its identity for its lifetime.
    #[must_use]
    pub fn identity(&self) -> usize {
        self.ptr.as_ptr() as usize
    }
}

impl AssociatedStorage for Object {
    fn associations(&self) -> &Associations {
        &self.raw().associations
    }
}

/// A copy is a new instance of the same class whose association table
/// holds the bindings the original had at copy time.
impl Copying for Object {
    fn copy(&self) -> Self {
        let copy = Self::allocate(self.raw().class, self.associations().snapshot());
        trace!(
            "copied {} instance {:#x} to {:#x}",
            self.class().name(),
            self.identity(),
            copy.identity()
        );
        copy
    }
}

// SAFETY: the refcount is atomic, the class pointer is immutable and
// 'static, and the association table synchronizes internally.
unsafe impl Send for Object {}

// SAFETY: see `Send`; every access through `&Object` is synchronized.
unsafe impl Sync for Object {}

impl Clone for Object {
    fn clone(&self) -> Self {
        self.retain();
        Object { ptr: self.ptr }
    }
}

impl Drop for Object {
    fn drop(&mut self) {
        // SAFETY: each Object handle owns exactly one reference.
        unsafe { self.release() };
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr
    }
}

impl Eq for Object {}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("class", &self.class().name())
            .field("refcount", &self.refcount())
            .field("associations", self.associations())
            .finish()
    }
}
