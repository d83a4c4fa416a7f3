//! COM (Component Object Model) core types
//!
//! This module provides the pieces every interface shares:
//! - [`IUnknownVTable`] - slots 0..=2 of every COM vtable
//! - [`IUnknown`] - the root typed proxy
//! - [`ComInterface`] / [`VTableLayout`] - implemented by `#[com_interface]`
//! - [`RefCount`] - the atomic counter behind each shadow
//!
//! ## Example
//! ```ignore
//! use shadowbridge::proc::com_interface;
//! use shadowbridge::Result;
//!
//! #[com_interface("12345678-1234-1234-1234-123456789abc")]
//! pub trait IMyInterface {
//!     fn do_something(&self, x: i32) -> Result<()>;
//! }
//! ```

use std::ffi::c_void;
use std::ops::Deref;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::{Error, Result};
use crate::guid::GUID;
use crate::hresult::HRESULT;
use crate::marshal::Param;
use crate::object::ComObject;
use crate::shadow::{self, Shadowed, ShadowVTable};

// =============================================================================
// IUnknown - Base COM interface
// =============================================================================

/// IUnknown interface ID
pub const IID_IUNKNOWN: GUID = GUID::new(
    0x00000000,
    0x0000,
    0x0000,
    [0xC0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x46],
);

/// Slots 0, 1, 2 of every COM vtable.
#[repr(C)]
pub struct IUnknownVTable {
    /// Query for another interface by GUID.
    pub query_interface:
        unsafe extern "system" fn(this: *mut c_void, riid: *const GUID, ppv: *mut *mut c_void) -> HRESULT,
    /// Increment reference count. Returns new count.
    pub add_ref: unsafe extern "system" fn(this: *mut c_void) -> u32,
    /// Decrement reference count. Returns new count.
    pub release: unsafe extern "system" fn(this: *mut c_void) -> u32,
}

impl IUnknownVTable {
    /// The `IUnknown` slots of a shadow exposing managed type `T`.
    #[must_use]
    pub const fn shadow<T: Shadowed>() -> Self {
        Self {
            query_interface: shadow::shadow_query_interface::<T>,
            add_ref: shadow::shadow_add_ref::<T>,
            release: shadow::shadow_release::<T>,
        }
    }
}

/// Root of the `{Interface}Impl` trait hierarchy generated by `#[com_interface]`.
///
/// Every [`Shadowed`] type implements it.
pub trait IUnknownImpl: Shadowed {}

impl<T: Shadowed> IUnknownImpl for T {}

/// Typed proxy for the root interface.
#[repr(transparent)]
#[derive(Clone, Debug, Default)]
pub struct IUnknown(ComObject);

impl IUnknown {
    /// Get the vtable
    pub fn vtable(&self) -> Result<&IUnknownVTable> {
        let this = self.0.handle()?.as_ptr();
        Ok(unsafe { crate::object::iunknown_vtable(this) })
    }
}

impl Deref for IUnknown {
    type Target = ComObject;

    fn deref(&self) -> &ComObject {
        &self.0
    }
}

unsafe impl ComInterface for IUnknown {
    const IID: GUID = IID_IUNKNOWN;
    const NAME: &'static str = "IUnknown";
    const BASE_IID: Option<GUID> = None;

    fn derives_from(iid: &GUID) -> bool {
        *iid == IID_IUNKNOWN
    }

    fn as_object(&self) -> &ComObject {
        &self.0
    }

    unsafe fn from_object(object: ComObject) -> Self {
        IUnknown(object)
    }
}

impl VTableLayout for IUnknown {
    const SLOT_COUNT: usize = 3;
    type VTable = IUnknownVTable;
}

impl<T: Shadowed> ShadowVTable<T> for IUnknown {
    const VTABLE: &'static IUnknownVTable = &IUnknownVTable::shadow::<T>();
}

impl Param for IUnknown {
    type Abi = *mut c_void;

    fn to_abi(&self) -> *mut c_void {
        self.0.as_raw()
    }

    unsafe fn from_abi(abi: *mut c_void) -> Result<Self> {
        unsafe { crate::marshal::interface_from_abi(abi, false) }
    }

    fn into_abi(self) -> *mut c_void {
        self.0.into_raw()
    }

    unsafe fn from_abi_owned(abi: *mut c_void) -> Result<Self> {
        unsafe { crate::marshal::interface_from_abi(abi, true) }
    }
}

// =============================================================================
// Interface traits
// =============================================================================

/// A typed proxy for a COM interface.
///
/// Automatically implemented by `#[com_interface]`.
///
/// # Safety
/// The implementing type must be a `#[repr(transparent)]` wrapper around
/// [`ComObject`] whose pointer is an interface with identifier `IID`.
pub unsafe trait ComInterface: Sized + 'static {
    /// The interface ID (IID) for this interface.
    const IID: GUID;
    /// Interface name, for diagnostics.
    const NAME: &'static str;
    /// IID of the interface this one extends (`None` only for `IUnknown`).
    const BASE_IID: Option<GUID>;

    /// True if `iid` names this interface or one of its ancestors.
    fn derives_from(iid: &GUID) -> bool;

    /// The underlying proxy
    fn as_object(&self) -> &ComObject;

    /// Wrap an object already known to implement this interface.
    ///
    /// # Safety
    /// `object` must hold a pointer to this interface (or be null).
    unsafe fn from_object(object: ComObject) -> Self;

    /// Raw interface pointer (no AddRef)
    #[inline]
    fn as_raw(&self) -> *mut c_void {
        self.as_object().as_raw()
    }

    /// Cast to another interface.
    #[inline]
    fn cast<I: ComInterface>(&self) -> Result<I> {
        self.as_object().query_interface::<I>()
    }
}

/// Vtable metadata for an interface.
pub trait VTableLayout {
    /// Total number of slots, including inherited ones.
    const SLOT_COUNT: usize;
    /// The `#[repr(C)]` vtable struct.
    type VTable;
}

// =============================================================================
// RefCount - Atomic reference counter for shadows
// =============================================================================

/// Atomic reference counter that refuses to go below zero.
#[repr(transparent)]
#[derive(Debug)]
pub struct RefCount(AtomicU32);

impl RefCount {
    /// Create a counter with the given initial count
    #[must_use]
    pub const fn new(initial: u32) -> Self {
        Self(AtomicU32::new(initial))
    }

    /// Increment the reference count. Returns the new count.
    #[inline]
    pub fn add_ref(&self) -> u32 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Decrement the reference count. Returns the new count.
    ///
    /// A release on a count of zero leaves it at zero and reports
    /// [`Error::RefCountUnderflow`].
    #[inline]
    pub fn release(&self) -> Result<u32> {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| count.checked_sub(1))
            .map(|previous| previous - 1)
            .map_err(|_| Error::RefCountUnderflow)
    }

    /// Get the current reference count.
    #[inline]
    #[must_use]
    pub fn count(&self) -> u32 {
        self.0.load(Ordering::Acquire)
    }
}

impl Default for RefCount {
    fn default() -> Self {
        Self::new(0)
    }
}
