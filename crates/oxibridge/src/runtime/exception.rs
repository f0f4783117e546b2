//! Exception raising and trapping.
//!
//! Exceptions travel on the native unwinding mechanism: raising an
//! [`Exception`] unwinds with the exception as the payload, and a trap
//! catches the unwind at its boundary. Four trap shapes are provided,
//! mirroring `@try`/`@catch`/`@finally`:
//!
//! - [`try_block`]: pass-through boundary
//! - [`try_catch`]: handle the exception
//! - [`try_finally`]: always clean up, then propagate
//! - [`try_catch_finally`]: handle, then always clean up
//!
//! Each returns `true` if the try block completed without raising.
//!
//! # Ordering
//!
//! try, then catch (only if an exception was raised and a catch block was
//! given), then finally. Finally runs exactly once per trap, last, and
//! also when the exception is about to propagate or the catch block itself
//! raised. A raise from catch or finally supersedes the exception being
//! handled; the earlier one is dropped.
//!
//! Only [`Exception`] payloads are caught. Any other panic crosses every
//! trap unchanged, after that trap's finally block has run.
//!
//! # Example
//!
//! ```rust
//! use oxibridge::runtime::exception::{self, Exception};
//!
//! let mut recorded = String::new();
//! let mut ran_finally = false;
//!
//! let clean = exception::try_catch_finally(
//!     || exception::throw_exception_with_reason("E1", "bad"),
//!     |ex: &Exception| recorded = ex.name().to_string(),
//!     || ran_finally = true,
//! );
//!
//! assert!(!clean);
//! assert_eq!(recorded, "E1");
//! assert!(ran_finally);
//! ```

use crate::error::Error;
use fxhash::FxHashMap;
use oxibridge_log::{debug, warn};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

/// Auxiliary key/value pairs carried by an exception.
pub type UserInfo = FxHashMap<String, String>;

type Payload = Box<dyn Any + Send>;

/// A raised (or raisable) exception: name, optional reason, optional
/// user info.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exception {
    name: String,
    reason: Option<String>,
    user_info: Option<UserInfo>,
    underlying: Option<Box<Exception>>,
}

impl Exception {
    /// Generic failure with no more specific name.
    pub const GENERIC: &'static str = "GenericException";
    /// An argument was out of contract.
    pub const INVALID_ARGUMENT: &'static str = "InvalidArgumentException";
    /// An index or length was out of range.
    pub const RANGE: &'static str = "RangeException";
    /// Internal state was found inconsistent.
    pub const INTERNAL_INCONSISTENCY: &'static str =
        "InternalInconsistencyException";
    /// Conversion of a runtime [`Error`].
    pub const RUNTIME_ERROR: &'static str = "RuntimeError";

    /// Creates an exception with only a name.
    pub fn new(name: impl Into<String>) -> Self {
        Exception {
            name: name.into(),
            reason: None,
            user_info: None,
            underlying: None,
        }
    }

    /// Sets the human-readable reason.
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Replaces the user info.
    #[must_use]
    pub fn with_user_info(mut self, user_info: UserInfo) -> Self {
        self.user_info = Some(user_info);
        self
    }

    /// Records the exception that led to this one; exposed as
    /// [`std::error::Error::source`].
    #[must_use]
    pub fn with_underlying(mut self, underlying: Exception) -> Self {
        self.underlying = Some(Box::new(underlying));
        self
    }

    /// Returns the exception name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    /// Returns the user info, if any.
    #[must_use]
    pub fn user_info(&self) -> Option<&UserInfo> {
        self.user_info.as_ref()
    }

    /// Returns a single user info entry.
    #[must_use]
    pub fn user_info_value(&self, key: &str) -> Option<&str> {
        self.user_info.as_ref()?.get(key).map(String::as_str)
    }

    /// Returns the exception recorded with [`with_underlying`](Self::with_underlying).
    #[must_use]
    pub fn underlying(&self) -> Option<&Exception> {
        self.underlying.as_deref()
    }

    /// Raises this exception. Equivalent to [`throw_exception`].
    pub fn raise(self) -> ! {
        throw_exception(self)
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            Some(reason) => write!(f, "{}: {reason}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

impl std::error::Error for Exception {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.underlying
            .as_deref()
            .map(|ex| ex as &(dyn std::error::Error + 'static))
    }
}

impl From<Error> for Exception {
    fn from(err: Error) -> Self {
        Exception::new(Exception::RUNTIME_ERROR).with_reason(err.to_string())
    }
}

/// Raises `exception` through the unwinding mechanism.
///
/// The panic hook is not invoked; an exception that escapes every trap
/// terminates the thread like any other uncaught panic.
pub fn throw_exception(exception: Exception) -> ! {
    debug!("raising {exception}");
    panic::resume_unwind(Box::new(exception))
}

/// Builds an exception from its parts and raises it.
pub fn throw_exception_with_name(
    name: &str,
    reason: Option<&str>,
    user_info: Option<UserInfo>,
) -> ! {
    let mut exception = Exception::new(name);
    exception.reason = reason.map(str::to_string);
    exception.user_info = user_info;
    throw_exception(exception)
}

/// Raises an exception with a name and a reason.
pub fn throw_exception_with_reason(name: &str, reason: &str) -> ! {
    throw_exception_with_name(name, Some(reason), None)
}

/// Raises an exception with only a name.
pub fn throw_exception_named(name: &str) -> ! {
    throw_exception_with_name(name, None, None)
}

/// How the try and catch phases of one trap ended.
pub(crate) enum TrapOutcome {
    /// The try block returned normally.
    Completed,
    /// An exception was raised and the catch block handled it.
    Caught,
    /// Unwinding must continue past the trap once finally has run.
    Uncaught(Payload),
}

impl TrapOutcome {
    fn is_completed(&self) -> bool {
        matches!(self, TrapOutcome::Completed)
    }
}

fn supervise<T, C, F>(
    try_block: T,
    catch_block: Option<C>,
    finally_block: Option<F>,
) -> bool
where
    T: FnOnce(),
    C: FnOnce(&Exception),
    F: FnOnce(),
{
    let outcome = match panic::catch_unwind(AssertUnwindSafe(try_block)) {
        Ok(()) => TrapOutcome::Completed,
        Err(payload) => handle(payload, catch_block),
    };

    if let Some(finally_block) = finally_block {
        // A raise here unwinds past the trap and drops any pending payload.
        finally_block();
    }

    match outcome {
        TrapOutcome::Uncaught(payload) => panic::resume_unwind(payload),
        outcome => outcome.is_completed(),
    }
}

fn handle<C>(payload: Payload, catch_block: Option<C>) -> TrapOutcome
where
    C: FnOnce(&Exception),
{
    let Some(catch_block) = catch_block else {
        if let Some(exception) = payload.downcast_ref::<Exception>() {
            debug!("propagating {exception} past trap without catch");
        }
        return TrapOutcome::Uncaught(payload);
    };

    let exception = match payload.downcast::<Exception>() {
        Ok(exception) => exception,
        Err(foreign) => return TrapOutcome::Uncaught(foreign),
    };

    debug!("caught {exception}");
    match panic::catch_unwind(AssertUnwindSafe(|| catch_block(&*exception))) {
        Ok(()) => TrapOutcome::Caught,
        Err(secondary) => {
            warn!("catch block for {exception} raised; superseding");
            TrapOutcome::Uncaught(secondary)
        }
    }
}

/// Runs `try_block` as a pass-through boundary.
///
/// An exception propagates to the caller unchanged, so a return always
/// means the block completed (`true`).
pub fn try_block<T>(block: T) -> bool
where
    T: FnOnce(),
{
    supervise(block, None::<fn(&Exception)>, None::<fn()>)
}

/// Runs `try_block`, handing a raised exception to `catch_block`.
///
/// Returns `false` if `catch_block` ran. The exception does not propagate
/// unless `catch_block` raises.
pub fn try_catch<T, C>(try_block: T, catch_block: C) -> bool
where
    T: FnOnce(),
    C: FnOnce(&Exception),
{
    supervise(try_block, Some(catch_block), None::<fn()>)
}

/// Runs `try_block`, then `finally_block` regardless of outcome.
///
/// A raised exception propagates after `finally_block` completes.
pub fn try_finally<T, F>(try_block: T, finally_block: F) -> bool
where
    T: FnOnce(),
    F: FnOnce(),
{
    supervise(try_block, None::<fn(&Exception)>, Some(finally_block))
}

/// Runs `try_block`, `catch_block` if it raised, then `finally_block`.
///
/// If `catch_block` raises, `finally_block` still runs and the new
/// exception propagates afterwards.
pub fn try_catch_finally<T, C, F>(
    try_block: T,
    catch_block: C,
    finally_block: F,
) -> bool
where
    T: FnOnce(),
    C: FnOnce(&Exception),
    F: FnOnce(),
{
    supervise(try_block, Some(catch_block), Some(finally_block))
}

/// Runs `f`, returning a raised exception as `Err`.
///
/// Panics that are not [`Exception`]s keep unwinding.
///
/// # Errors
///
/// Returns the [`Exception`] raised while running `f`.
///
/// # Example
///
/// ```rust
/// use oxibridge::runtime::exception;
///
/// let err = exception::capture(|| -> u32 {
///     exception::throw_exception_named("Empty")
/// })
/// .unwrap_err();
/// assert_eq!(err.name(), "Empty");
///
/// assert_eq!(exception::capture(|| 2 + 2), Ok(4));
/// ```
pub fn capture<R, F>(f: F) -> Result<R, Exception>
where
    F: FnOnce() -> R,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Ok(value),
        Err(payload) => match payload.downcast::<Exception>() {
            Ok(exception) => Err(*exception),
            Err(foreign) => panic::resume_unwind(foreign),
        },
    }
}
