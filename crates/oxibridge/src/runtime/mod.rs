//! `oxibridge` runtime module.
//!
//! - [`class`]: class registration and inheritance
//! - [`object`]: reference-counted instances that own an association table
//! - [`association`]: per-entity associated storage with ownership policies
//! - [`exception`]: raising exceptions and trapping them with
//!   try/catch/finally
//!
//! The two bridging facilities are independent: associations never raise,
//! and the trap keeps no state between invocations.

pub mod association;
pub mod class;
pub mod exception;
pub mod object;

pub use association::{
    AssociatedStorage, AssociationKey, AssociationPolicy, Associations,
    Copying, Retention,
};
pub use class::Class;
pub use exception::{
    Exception, UserInfo, capture, throw_exception, throw_exception_named,
    throw_exception_with_name, throw_exception_with_reason, try_block,
    try_catch, try_catch_finally, try_finally,
};
pub use object::Object;
