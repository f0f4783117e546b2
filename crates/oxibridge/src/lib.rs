//! `oxibridge`: runtime bridging utilities for a dynamic object runtime.
//!
//! Two independent facilities:
//!
//! - **Associated storage**: attach values to a live [`Object`] (or any
//!   type embedding an [`Associations`] table) under an opaque
//!   [`AssociationKey`], with a weak, strong or copy
//!   [`AssociationPolicy`]. Associations die with their target.
//! - **Exception trap**: run a block under supervision with optional
//!   catch and finally blocks, and raise [`Exception`]s carrying a name,
//!   reason and user info.
//!
//! # Example
//!
//! ```rust
//! use oxibridge::runtime::exception;
//! use oxibridge::{AssociatedStorage, AssociationKey, AssociationPolicy, Class, Object};
//!
//! static RETRIES: u8 = 0;
//!
//! let class = Class::new_root("CrateDocJob").unwrap();
//! let job = Object::new(&class).unwrap();
//! let key = AssociationKey::from_static(&RETRIES);
//!
//! let clean = exception::try_catch(
//!     || exception::throw_exception_named("Timeout"),
//!     |_| job.set_copied_value(key, Some(&1_u32)),
//! );
//!
//! assert!(!clean);
//! assert_eq!(job.associated_value::<u32>(key).as_deref(), Some(&1));
//! assert_eq!(job.associated_policy(key), Some(AssociationPolicy::Copy));
//! ```

pub mod error;
pub mod runtime;

// Re-export commonly used types
pub use error::{Error, Result};
pub use runtime::{
    AssociatedStorage, AssociationKey, AssociationPolicy, Associations, Class,
    Copying, Exception, Object, Retention, UserInfo,
};
