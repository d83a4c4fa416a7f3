//! COM status codes
//!
//! [`HRESULT`] is the only value that crosses the ABI to report failure.
//! Negative values are failures; zero and positive values are success codes,
//! some of which are informational (e.g. [`S_FALSE`]).

use std::cell::{Cell, RefCell};
use std::marker::PhantomData;

use crate::error::{Error, Result};

/// COM result type. 0 ([`S_OK`]) indicates success, negative values indicate errors.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct HRESULT(pub i32);

/// Success
pub const S_OK: HRESULT = HRESULT(0);
/// Success, but returned false
pub const S_FALSE: HRESULT = HRESULT(1);
/// Not implemented
pub const E_NOTIMPL: HRESULT = HRESULT(0x8000_4001_u32 as i32);
/// No such interface supported
pub const E_NOINTERFACE: HRESULT = HRESULT(0x8000_4002_u32 as i32);
/// Invalid pointer
pub const E_POINTER: HRESULT = HRESULT(0x8000_4003_u32 as i32);
/// Unspecified failure
pub const E_FAIL: HRESULT = HRESULT(0x8000_4005_u32 as i32);
/// Catastrophic failure
pub const E_UNEXPECTED: HRESULT = HRESULT(0x8000_FFFF_u32 as i32);
/// Out of memory
pub const E_OUTOFMEMORY: HRESULT = HRESULT(0x8007_000E_u32 as i32);
/// Invalid argument
pub const E_INVALIDARG: HRESULT = HRESULT(0x8007_0057_u32 as i32);
/// The object has been closed
pub const RO_E_CLOSED: HRESULT = HRESULT(0x8000_0013_u32 as i32);

impl HRESULT {
    /// Check if an HRESULT indicates success (non-negative)
    #[inline]
    #[must_use]
    pub const fn is_ok(self) -> bool {
        self.0 >= 0
    }

    /// Check if an HRESULT indicates failure (negative)
    #[inline]
    #[must_use]
    pub const fn is_err(self) -> bool {
        self.0 < 0
    }

    /// Convert into a `Result`, without consulting the fault slot.
    #[inline]
    pub fn ok(self) -> Result<()> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(Error::from(self))
        }
    }

    /// Facility field (bits 16..29)
    #[inline]
    #[must_use]
    pub const fn facility(self) -> u16 {
        ((self.0 as u32 >> 16) & 0x1FFF) as u16
    }

    /// Code field (low 16 bits)
    #[inline]
    #[must_use]
    pub const fn code(self) -> u16 {
        (self.0 as u32 & 0xFFFF) as u16
    }
}

impl std::fmt::Debug for HRESULT {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HRESULT(0x{:08X})", self.0 as u32)
    }
}

impl std::fmt::Display for HRESULT {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:08X}", self.0 as u32)
    }
}

impl From<i32> for HRESULT {
    fn from(value: i32) -> Self {
        HRESULT(value)
    }
}

#[cfg(feature = "windows-compat")]
impl From<windows_core::HRESULT> for HRESULT {
    fn from(value: windows_core::HRESULT) -> Self {
        HRESULT(value.0)
    }
}

#[cfg(feature = "windows-compat")]
impl From<HRESULT> for windows_core::HRESULT {
    fn from(value: HRESULT) -> Self {
        windows_core::HRESULT(value.0)
    }
}

// =============================================================================
// Fault slot
// =============================================================================

/// Error stashed by a thunk, tagged with the proxy call it belongs to.
struct Fault {
    depth: u32,
    error: Error,
}

thread_local! {
    static PROXY_DEPTH: Cell<u32> = const { Cell::new(0) };
    static LAST_FAULT: RefCell<Option<Fault>> = const { RefCell::new(None) };
}

/// Remember the error behind a failure code returned from a shadow thunk.
///
/// Only kept while a proxy call is in progress on this thread; a thunk
/// reached through a raw vtable call has nobody to hand the error back to.
pub(crate) fn stash_fault(error: Error) {
    let depth = PROXY_DEPTH.with(Cell::get);
    if depth == 0 {
        return;
    }
    LAST_FAULT.with(|slot| *slot.borrow_mut() = Some(Fault { depth, error }));
}

/// Drop any fault recorded at `depth` or deeper.
fn discard_from(depth: u32) {
    LAST_FAULT.with(|slot| {
        let mut slot = slot.borrow_mut();
        if slot.as_ref().is_some_and(|fault| fault.depth >= depth) {
            *slot = None;
        }
    });
}

/// Take the error stashed by a callback that failed during the innermost
/// proxy call in progress on this thread, if any.
pub fn take_last_fault() -> Option<Error> {
    let depth = PROXY_DEPTH.with(Cell::get);
    LAST_FAULT.with(|slot| {
        let mut slot = slot.borrow_mut();
        if slot.as_ref().is_some_and(|fault| fault.depth == depth) {
            slot.take().map(|fault| fault.error)
        } else {
            None
        }
    })
}

/// Marks a proxy call on this thread. Faults stashed while it is alive
/// belong to it and are discarded when it ends.
#[doc(hidden)]
#[must_use]
pub struct FaultScope {
    depth: u32,
    _not_send: PhantomData<*const ()>,
}

impl FaultScope {
    pub fn enter() -> Self {
        let depth = PROXY_DEPTH.with(|current| {
            let depth = current.get() + 1;
            current.set(depth);
            depth
        });
        discard_from(depth);
        FaultScope {
            depth,
            _not_send: PhantomData,
        }
    }
}

impl Drop for FaultScope {
    fn drop(&mut self) {
        discard_from(self.depth);
        PROXY_DEPTH.with(|current| current.set(self.depth - 1));
    }
}

/// Convert a status code returned by native code into a `Result`.
///
/// If the failure originated in a shadow thunk reached by the current proxy
/// call, the original error is returned instead of a bare [`Error::Native`].
pub fn check(hr: HRESULT) -> Result<()> {
    if hr.is_ok() {
        return Ok(());
    }
    match take_last_fault() {
        Some(fault) if fault.code() == hr => Err(fault),
        _ => Err(Error::from(hr)),
    }
}
