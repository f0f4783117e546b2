//! Associated storage: out-of-band values attached to a live entity.
//!
//! An entity embeds an [`Associations`] table and implements
//! [`AssociatedStorage`] to expose it. Each entry binds an opaque
//! [`AssociationKey`] to a value under an [`AssociationPolicy`]:
//!
//! | Policy   | Stored as                         | Value lifetime            |
//! |----------|-----------------------------------|---------------------------|
//! | `Weak`   | `Weak<T>`                         | caller's responsibility   |
//! | `Strong` | `Arc<T>` (shared with the caller) | at least the entity's     |
//! | `Copy`   | `Arc<T>` of a [`Copying::copy`]   | at least the entity's     |
//!
//! Weak and strong bindings go through [`AssociatedStorage::set_associated_value`]
//! with a [`Retention`]; copied bindings go through
//! [`AssociatedStorage::set_copied_value`], which needs a [`Copying`] value.
//!
//! The table is owned by the entity and dropped with it, so no association
//! outlives its target. There is no global side table and no way to
//! enumerate the entries of a table.
//!
//! # Example
//!
//! ```rust
//! use oxibridge::runtime::{AssociatedStorage, AssociationKey, AssociationPolicy, Retention};
//! use oxibridge::{Class, Object};
//! use std::sync::Arc;
//!
//! static TAG: u8 = 0;
//!
//! let class = Class::new_root("AssocDocExample").unwrap();
//! let obj = Object::new(&class).unwrap();
//! let key = AssociationKey::from_static(&TAG);
//!
//! obj.set_associated_value(key, Some(Arc::new("blue".to_string())), Retention::Strong);
//! assert_eq!(obj.associated_value::<String>(key).as_deref().map(String::as_str), Some("blue"));
//! assert_eq!(obj.associated_policy(key), Some(AssociationPolicy::Strong));
//!
//! obj.set_associated_value::<String>(key, None, Retention::Strong);
//! assert!(obj.associated_value::<String>(key).is_none());
//! ```
//!
//! # Thread Safety
//!
//! Tables are guarded by an `RwLock`. Reads and writes on distinct entities
//! never contend; concurrent writes to the same (entity, key) pair are last
//! write wins.

use crate::error::{Error, Result};
use fxhash::FxHashMap;
use oxibridge_log::trace;
use std::any::{Any, type_name};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, Weak};

type AnyValue = dyn Any + Send + Sync;

/// Opaque, pointer-sized key namespacing a value on an entity.
///
/// Keys are compared by value only. The runtime neither allocates nor
/// validates them; uniqueness is up to the caller, and the address of a
/// private `static` is the usual choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssociationKey(usize);

impl AssociationKey {
    /// Builds a key from the address of a `'static` item.
    #[must_use]
    pub fn from_static<T>(anchor: &'static T) -> Self {
        AssociationKey(std::ptr::from_ref(anchor) as usize)
    }

    /// Builds a key from an arbitrary token.
    #[must_use]
    pub const fn from_raw(raw: usize) -> Self {
        AssociationKey(raw)
    }

    /// Returns the raw token.
    #[must_use]
    pub const fn as_raw(self) -> usize {
        self.0
    }
}

impl fmt::Display for AssociationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Ownership rule applied to an associated value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssociationPolicy {
    /// The value is not retained. Once every other owner drops it, reads
    /// return `None`.
    Weak,
    /// The value is retained until the association is replaced, removed,
    /// or its entity is destroyed.
    Strong,
    /// A [`Copying::copy`] is taken at set time and retained; later
    /// changes to the caller's value are not observed.
    Copy,
}

/// How [`Associations::set`] holds a shared value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Retention {
    /// Binds without retaining, see [`AssociationPolicy::Weak`].
    Weak,
    /// Binds and retains, see [`AssociationPolicy::Strong`].
    Strong,
}

impl From<Retention> for AssociationPolicy {
    fn from(retention: Retention) -> Self {
        match retention {
            Retention::Weak => AssociationPolicy::Weak,
            Retention::Strong => AssociationPolicy::Strong,
        }
    }
}

/// Values that can produce an independent duplicate of themselves.
///
/// Unlike `Clone`, a copy must not share mutable state with the original:
/// changing one afterwards is never visible through the other.
pub trait Copying: Any + Send + Sync + Sized {
    /// Returns an independent duplicate.
    #[must_use]
    fn copy(&self) -> Self;
}

macro_rules! impl_copying_by_clone {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Copying for $ty {
                fn copy(&self) -> Self {
                    self.clone()
                }
            }
        )*
    };
}

impl_copying_by_clone!(
    bool, char, u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128,
    isize, f32, f64, String, Box<str>,
);

impl<T: Copying> Copying for Option<T> {
    fn copy(&self) -> Self {
        self.as_ref().map(T::copy)
    }
}

impl<T: Copying> Copying for Vec<T> {
    fn copy(&self) -> Self {
        self.iter().map(T::copy).collect()
    }
}

impl fmt::Display for AssociationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AssociationPolicy::Weak => "weak",
            AssociationPolicy::Strong => "strong",
            AssociationPolicy::Copy => "copy",
        })
    }
}

#[derive(Clone)]
enum Slot {
    Unretained(Weak<AnyValue>),
    Retained(Arc<AnyValue>),
}

#[derive(Clone)]
struct Association {
    slot: Slot,
    policy: AssociationPolicy,
}

impl Association {
    fn load(&self) -> Option<Arc<AnyValue>> {
        match &self.slot {
            Slot::Unretained(weak) => weak.upgrade(),
            Slot::Retained(strong) => Some(Arc::clone(strong)),
        }
    }
}

/// Per-entity association table.
///
/// Embed one in any type that should carry associated values and expose it
/// through [`AssociatedStorage`]. Dropping the table releases every
/// retained value.
#[derive(Default)]
pub struct Associations {
    entries: RwLock<FxHashMap<AssociationKey, Association>>,
}

impl Associations {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `value` to `key`, shared with the caller under `retention`,
    /// or removes the binding when `value` is `None`.
    ///
    /// A previous binding for `key` is replaced along with its policy. The
    /// replaced value is released after the table lock is dropped, so its
    /// destructor may use this table.
    pub fn set<T>(
        &self,
        key: AssociationKey,
        value: Option<Arc<T>>,
        retention: Retention,
    ) where
        T: Any + Send + Sync,
    {
        let association = value.map(|value| {
            let erased: Arc<AnyValue> = value;
            let slot = match retention {
                Retention::Weak => Slot::Unretained(Arc::downgrade(&erased)),
                Retention::Strong => Slot::Retained(erased),
            };
            Association {
                slot,
                policy: retention.into(),
            }
        });
        self.replace::<T>(key, association);
    }

    /// Binds a [`Copying::copy`] of `value` to `key`, or removes the
    /// binding when `value` is `None`.
    ///
    /// The copy is taken before the table is locked.
    pub fn set_copied<T>(&self, key: AssociationKey, value: Option<&T>)
    where
        T: Copying,
    {
        let association = value.map(|value| Association {
            slot: Slot::Retained(Arc::new(value.copy())),
            policy: AssociationPolicy::Copy,
        });
        self.replace::<T>(key, association);
    }

    fn replace<T>(&self, key: AssociationKey, association: Option<Association>) {
        let displaced = match association {
            Some(association) => {
                trace!(
                    "associating {} under {key} ({})",
                    type_name::<T>(),
                    association.policy
                );
                self.write().insert(key, association)
            }
            None => {
                trace!("clearing association under {key}");
                self.write().remove(&key)
            }
        };
        drop(displaced);
    }

    /// Returns a new table holding the same bindings, under the same
    /// policies, as this one right now.
    ///
    /// Retained values are shared with this table, weak bindings stay weak.
    /// Later changes to either table do not affect the other.
    #[must_use]
    pub fn snapshot(&self) -> Associations {
        Associations {
            entries: RwLock::new(FxHashMap::clone(&self.read())),
        }
    }

    /// Returns the value bound to `key`.
    ///
    /// `None` if nothing is bound, if a weakly held value has been dropped,
    /// or if the bound value is not a `T`.
    #[must_use]
    pub fn get<T>(&self, key: AssociationKey) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        self.try_get(key).ok().flatten()
    }

    /// Returns the value bound to `key`, distinguishing a type mismatch
    /// from an absent value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AssociatedTypeMismatch`] if a live value is bound
    /// to `key` but is not a `T`.
    pub fn try_get<T>(&self, key: AssociationKey) -> Result<Option<Arc<T>>>
    where
        T: Any + Send + Sync,
    {
        let loaded = self.read().get(&key).and_then(Association::load);
        match loaded {
            None => Ok(None),
            Some(value) => value.downcast::<T>().map(Some).map_err(|_| {
                Error::AssociatedTypeMismatch {
                    expected: type_name::<T>(),
                }
            }),
        }
    }

    /// Returns the policy governing `key`, if bound.
    ///
    /// A weak binding whose value has been dropped still reports
    /// [`AssociationPolicy::Weak`] until it is replaced or removed.
    #[must_use]
    pub fn policy(&self, key: AssociationKey) -> Option<AssociationPolicy> {
        self.read().get(&key).map(|association| association.policy)
    }

    /// Removes every binding, releasing retained values.
    pub fn clear(&self) {
        let drained = std::mem::take(&mut *self.write());
        if !drained.is_empty() {
            trace!("cleared {} association(s)", drained.len());
        }
        drop(drained);
    }

    fn read(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, FxHashMap<AssociationKey, Association>>
    {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, FxHashMap<AssociationKey, Association>>
    {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Associations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Associations")
            .field("len", &self.read().len())
            .finish()
    }
}

/// Entities that carry an [`Associations`] table.
///
/// Implementors only provide [`associations`](Self::associations); the
/// accessor pair comes for free.
pub trait AssociatedStorage {
    /// The table owned by this entity.
    fn associations(&self) -> &Associations;

    /// Attaches `value` under `key`, shared under `retention`; `None`
    /// removes the association.
    fn set_associated_value<T>(
        &self,
        key: AssociationKey,
        value: Option<Arc<T>>,
        retention: Retention,
    ) where
        T: Any + Send + Sync,
    {
        self.associations().set(key, value, retention);
    }

    /// Attaches a copy of `value` under `key`; `None` removes the
    /// association.
    fn set_copied_value<T>(&self, key: AssociationKey, value: Option<&T>)
    where
        T: Copying,
    {
        self.associations().set_copied(key, value);
    }

    /// Returns the value attached under `key`, or `None`.
    fn associated_value<T>(&self, key: AssociationKey) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        self.associations().get(key)
    }

    /// Like [`associated_value`](Self::associated_value), but reports a
    /// type mismatch.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AssociatedTypeMismatch`] if the live value under
    /// `key` is not a `T`.
    fn try_associated_value<T>(
        &self,
        key: AssociationKey,
    ) -> Result<Option<Arc<T>>>
    where
        T: Any + Send + Sync,
    {
        self.associations().try_get(key)
    }

    /// Returns the policy in force for `key`.
    fn associated_policy(
        &self,
        key: AssociationKey,
    ) -> Option<AssociationPolicy> {
        self.associations().policy(key)
    }

    /// Removes every association on this entity.
    fn remove_associated_values(&self) {
        self.associations().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static KEY_A: u8 = 1;
    static KEY_B: u8 = 2;

    #[derive(Debug)]
    struct Label(Mutex<String>);

    impl Label {
        fn new(text: &str) -> Self {
            Label(Mutex::new(text.to_string()))
        }

        fn text(&self) -> String {
            self.0.lock().unwrap().clone()
        }
    }

    impl Copying for Label {
        fn copy(&self) -> Self {
            Label::new(&self.text())
        }
    }

    #[test]
    fn test_static_keys_are_distinct() {
        let a = AssociationKey::from_static(&KEY_A);
        let b = AssociationKey::from_static(&KEY_B);

        assert_ne!(a, b);
        assert_eq!(a, AssociationKey::from_static(&KEY_A));
        assert_eq!(AssociationKey::from_raw(7).as_raw(), 7);
    }

    #[test]
    fn test_get_without_set_is_absent() {
        let table = Associations::new();
        let key = AssociationKey::from_raw(1);

        assert!(table.get::<u32>(key).is_none());
        assert_eq!(table.try_get::<u32>(key), Ok(None));
        assert!(table.policy(key).is_none());
    }

    #[test]
    fn test_set_then_get_every_policy() {
        let table = Associations::new();

        for (raw, retention) in [(1, Retention::Weak), (2, Retention::Strong)] {
            let key = AssociationKey::from_raw(raw);
            let value = Arc::new(raw as u64 * 10);
            table.set(key, Some(Arc::clone(&value)), retention);

            assert_eq!(table.get::<u64>(key).as_deref(), Some(&(raw as u64 * 10)));
            assert_eq!(table.policy(key), Some(retention.into()));
        }

        let key = AssociationKey::from_raw(3);
        table.set_copied(key, Some(&30_u64));
        assert_eq!(table.get::<u64>(key).as_deref(), Some(&30));
        assert_eq!(table.policy(key), Some(AssociationPolicy::Copy));
    }

    #[test]
    fn test_shared_values_need_not_be_copyable() {
        let table = Associations::new();
        let strong = AssociationKey::from_raw(1);
        let weak = AssociationKey::from_raw(2);
        let counter = Arc::new(AtomicUsize::new(0));

        table.set(strong, Some(Arc::clone(&counter)), Retention::Strong);
        table.set(weak, Some(Arc::clone(&counter)), Retention::Weak);
        counter.fetch_add(3, Ordering::SeqCst);

        let through_strong = table.get::<AtomicUsize>(strong).unwrap();
        let through_weak = table.get::<AtomicUsize>(weak).unwrap();
        assert_eq!(through_strong.load(Ordering::SeqCst), 3);
        assert!(Arc::ptr_eq(&through_weak, &counter));
    }

    #[test]
    fn test_copying_containers_copy_elements() {
        let labels = vec![Some(Label::new("a")), None];
        let copied = labels.copy();

        *labels[0].as_ref().unwrap().0.lock().unwrap() = "b".to_string();

        assert_eq!(copied[0].as_ref().map(Label::text).as_deref(), Some("a"));
        assert!(copied[1].is_none());
    }

    #[test]
    fn test_snapshot_is_independent() {
        let table = Associations::new();
        let kept = AssociationKey::from_raw(1);
        let later = AssociationKey::from_raw(2);
        let value = Arc::new(4_u32);

        table.set(kept, Some(Arc::clone(&value)), Retention::Weak);
        let snapshot = table.snapshot();
        table.set(later, Some(Arc::new(5_u32)), Retention::Strong);
        table.set::<u32>(kept, None, Retention::Strong);

        assert_eq!(snapshot.get::<u32>(kept).as_deref(), Some(&4));
        assert_eq!(snapshot.policy(kept), Some(AssociationPolicy::Weak));
        assert!(snapshot.get::<u32>(later).is_none());
        assert_eq!(Arc::strong_count(&value), 1);
    }

    #[test]
    fn test_strong_shares_the_callers_value() {
        let table = Associations::new();
        let key = AssociationKey::from_raw(1);
        let label = Arc::new(Label::new("before"));

        table.set(key, Some(Arc::clone(&label)), Retention::Strong);
        *label.0.lock().unwrap() = "after".to_string();

        let stored = table.get::<Label>(key).unwrap();
        assert!(Arc::ptr_eq(&stored, &label));
        assert_eq!(stored.text(), "after");
    }

    #[test]
    fn test_copy_is_isolated_from_later_mutation() {
        let table = Associations::new();
        let key = AssociationKey::from_raw(1);
        let label = Arc::new(Label::new("before"));

        table.set_copied(key, Some(&*label));
        *label.0.lock().unwrap() = "after".to_string();

        let stored = table.get::<Label>(key).unwrap();
        assert!(!Arc::ptr_eq(&stored, &label));
        assert_eq!(stored.text(), "before");
    }

    #[test]
    fn test_weak_does_not_retain() {
        let table = Associations::new();
        let key = AssociationKey::from_raw(1);
        let value = Arc::new(5_u32);

        table.set(key, Some(Arc::clone(&value)), Retention::Weak);
        assert_eq!(Arc::strong_count(&value), 1);
        assert_eq!(table.get::<u32>(key).as_deref(), Some(&5));

        drop(value);
        assert!(table.get::<u32>(key).is_none());
        assert_eq!(table.policy(key), Some(AssociationPolicy::Weak));
    }

    #[test]
    fn test_strong_retains_until_removed() {
        let table = Associations::new();
        let key = AssociationKey::from_raw(1);
        let value = Arc::new(5_u32);

        table.set(key, Some(Arc::clone(&value)), Retention::Strong);
        assert_eq!(Arc::strong_count(&value), 2);

        table.set::<u32>(key, None, Retention::Strong);
        assert_eq!(Arc::strong_count(&value), 1);
        assert!(table.get::<u32>(key).is_none());
        assert!(table.policy(key).is_none());
    }

    #[test]
    fn test_none_removes_regardless_of_prior_policy() {
        let table = Associations::new();
        let key = AssociationKey::from_raw(1);

        table.set_copied(key, Some(&1_u8));
        table.set::<u8>(key, None, Retention::Weak);

        assert!(table.get::<u8>(key).is_none());
    }

    #[test]
    fn test_latest_policy_governs() {
        let table = Associations::new();
        let key = AssociationKey::from_raw(1);
        let value = Arc::new(9_i32);

        table.set(key, Some(Arc::clone(&value)), Retention::Strong);
        table.set(key, Some(Arc::clone(&value)), Retention::Weak);

        assert_eq!(table.policy(key), Some(AssociationPolicy::Weak));
        assert_eq!(Arc::strong_count(&value), 1);
    }

    #[test]
    fn test_type_mismatch() {
        let table = Associations::new();
        let key = AssociationKey::from_raw(1);

        table.set(key, Some(Arc::new(1_u32)), Retention::Strong);

        assert!(table.get::<String>(key).is_none());
        assert!(matches!(
            table.try_get::<String>(key),
            Err(Error::AssociatedTypeMismatch { .. })
        ));
    }

    #[test]
    fn test_clear_releases_everything() {
        let table = Associations::new();
        let value = Arc::new(3_u16);

        table.set(AssociationKey::from_raw(1), Some(Arc::clone(&value)), Retention::Strong);
        table.set(AssociationKey::from_raw(2), Some(Arc::clone(&value)), Retention::Strong);
        assert_eq!(Arc::strong_count(&value), 3);

        table.clear();
        assert_eq!(Arc::strong_count(&value), 1);
    }

    #[test]
    fn test_drop_releases_retained_values() {
        static DROPS: AtomicUsize = AtomicUsize::new(0);

        struct Tracked;

        impl Drop for Tracked {
            fn drop(&mut self) {
                DROPS.fetch_add(1, Ordering::SeqCst);
            }
        }

        let table = Associations::new();
        table.set(AssociationKey::from_raw(1), Some(Arc::new(Tracked)), Retention::Strong);
        assert_eq!(DROPS.load(Ordering::SeqCst), 0);

        drop(table);
        assert_eq!(DROPS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_displaced_value_may_reenter_table() {
        struct Reentrant(Arc<Associations>);

        impl Drop for Reentrant {
            fn drop(&mut self) {
                // Deadlocks if the write lock were still held.
                let _ = self.0.get::<u8>(AssociationKey::from_raw(99));
            }
        }

        let table = Arc::new(Associations::new());
        let key = AssociationKey::from_raw(1);
        table.set(key, Some(Arc::new(Reentrant(Arc::clone(&table)))), Retention::Strong);
        table.set::<Reentrant>(key, None, Retention::Strong);

        assert!(table.get::<Reentrant>(key).is_none());
    }
}
