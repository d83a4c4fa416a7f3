//! Reference-counted proxy for native COM objects
//!
//! [`ComObject`] owns at most one native reference. Every typed proxy generated
//! by `#[com_interface]` is a `#[repr(transparent)]` wrapper around one.
//!
//! ## Reference accounting
//!
//! | Operation | Native AddRef | Native Release |
//! |-----------|---------------|----------------|
//! | `from_raw(ptr, true)` | 0 | 0 |
//! | `from_raw(ptr, false)` | 1 | 0 |
//! | `clone()` | 1 | 0 |
//! | successful `query_interface` | 1 (on the result, by native code) | 0 |
//! | `dispose()` / drop | 0 | 1 (first call only) |
//! | `set_handle(new, ..)` | as `from_raw` for `new` | 1 for the old handle |

use std::ffi::c_void;
use std::marker::PhantomData;
use std::mem::ManuallyDrop;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};

use crate::com::{ComInterface, IID_IUNKNOWN, IUnknownVTable};
use crate::error::{Error, Result};
use crate::guid::GUID;
use crate::hresult::{E_NOINTERFACE, check};

/// Read the `IUnknown` prefix of a native object's vtable.
///
/// # Safety
/// `this` must point to a live vtable-prefixed COM object.
#[inline]
pub(crate) unsafe fn iunknown_vtable<'a>(this: *mut c_void) -> &'a IUnknownVTable {
    unsafe { &**(this as *const *const IUnknownVTable) }
}

/// # Safety
/// `this` must point to a live vtable-prefixed COM object.
#[inline]
pub(crate) unsafe fn add_ref_raw(this: *mut c_void) -> u32 {
    unsafe { (iunknown_vtable(this).add_ref)(this) }
}

/// # Safety
/// `this` must point to a live vtable-prefixed COM object the caller holds a reference on.
#[inline]
pub(crate) unsafe fn release_raw(this: *mut c_void) -> u32 {
    unsafe { (iunknown_vtable(this).release)(this) }
}

/// Owning proxy for a native interface pointer.
///
/// Not `Send`/`Sync`: apartment rules for the wrapped object are the caller's
/// responsibility.
pub struct ComObject {
    ptr: AtomicPtr<c_void>,
    disposed: AtomicBool,
    _apartment: PhantomData<*mut c_void>,
}

impl ComObject {
    /// A proxy with no handle, to receive one later through [`set_handle`](Self::set_handle).
    #[must_use]
    pub const fn null() -> Self {
        Self {
            ptr: AtomicPtr::new(ptr::null_mut()),
            disposed: AtomicBool::new(false),
            _apartment: PhantomData,
        }
    }

    /// Wrap a native interface pointer.
    ///
    /// With `transfer_ownership == false` the proxy AddRefs immediately, so the
    /// native count reflects the new holder. A null `ptr` yields a null proxy.
    ///
    /// # Safety
    /// `ptr` must be null or point to a live COM object; when transferring
    /// ownership the caller must own one reference, which moves into the proxy.
    pub unsafe fn from_raw(ptr: *mut c_void, transfer_ownership: bool) -> Self {
        if !ptr.is_null() && !transfer_ownership {
            unsafe { add_ref_raw(ptr) };
        }
        Self {
            ptr: AtomicPtr::new(ptr),
            disposed: AtomicBool::new(false),
            _apartment: PhantomData,
        }
    }

    /// Take over a reference the caller owns (e.g. a factory out-parameter).
    ///
    /// # Safety
    /// See [`from_raw`](Self::from_raw).
    #[inline]
    pub unsafe fn from_raw_owned(ptr: *mut c_void) -> Self {
        unsafe { Self::from_raw(ptr, true) }
    }

    /// Share a reference someone else owns (e.g. an in-parameter).
    ///
    /// # Safety
    /// See [`from_raw`](Self::from_raw).
    #[inline]
    pub unsafe fn from_raw_borrowed(ptr: *mut c_void) -> Self {
        unsafe { Self::from_raw(ptr, false) }
    }

    /// The raw pointer, or null. Does not touch the reference count.
    #[inline]
    #[must_use]
    pub fn as_raw(&self) -> *mut c_void {
        self.ptr.load(Ordering::Acquire)
    }

    /// The live native pointer.
    ///
    /// Fails with [`Error::UseAfterDispose`] once disposed and with
    /// [`Error::NullHandle`] if no handle was ever assigned.
    pub fn handle(&self) -> Result<NonNull<c_void>> {
        if self.disposed.load(Ordering::Acquire) {
            tracing::error!("ComObject used after dispose");
            return Err(Error::UseAfterDispose);
        }
        NonNull::new(self.as_raw()).ok_or(Error::NullHandle)
    }

    /// True if no handle is held
    #[inline]
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.as_raw().is_null()
    }

    /// True after [`dispose`](Self::dispose)
    #[inline]
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Issue a native `QueryInterface` for `iid`.
    ///
    /// A missing interface is the soft failure [`Error::InterfaceNotSupported`].
    /// This proxy's own reference is never touched.
    pub fn query_interface_raw(&self, iid: &GUID) -> Result<ComObject> {
        let this = self.handle()?.as_ptr();
        let mut out: *mut c_void = ptr::null_mut();

        let hr = unsafe { (iunknown_vtable(this).query_interface)(this, iid, &mut out) };
        if hr == E_NOINTERFACE {
            tracing::trace!(%iid, "QueryInterface: not supported");
            return Err(Error::InterfaceNotSupported(*iid));
        }
        check(hr)?;
        if out.is_null() {
            return Err(Error::InterfaceNotSupported(*iid));
        }

        // The native side already counted the new reference
        Ok(unsafe { ComObject::from_raw_owned(out) })
    }

    /// Cast to a typed interface proxy.
    ///
    /// Asks for `T::IID`; the [`registry`](crate::registry) is not consulted
    /// except for a debug-build warning when an installed registry lacks `T`.
    pub fn query_interface<T: ComInterface>(&self) -> Result<T> {
        #[cfg(debug_assertions)]
        crate::registry::check_registered::<T>(crate::registry::installed());
        let object = self.query_interface_raw(&T::IID)?;
        Ok(unsafe { T::from_object(object) })
    }

    /// Like [`query_interface`](Self::query_interface), mapping an absent
    /// interface to `None`.
    pub fn query_interface_opt<T: ComInterface>(&self) -> Result<Option<T>> {
        match self.query_interface::<T>() {
            Ok(iface) => Ok(Some(iface)),
            Err(Error::InterfaceNotSupported(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// COM identity: true if both proxies reach the same object's `IUnknown`.
    pub fn is_same_object(&self, other: &ComObject) -> Result<bool> {
        let a = self.query_interface_raw(&IID_IUNKNOWN)?;
        let b = other.query_interface_raw(&IID_IUNKNOWN)?;
        Ok(a.as_raw() == b.as_raw())
    }

    /// Replace the handle.
    ///
    /// The new pointer is stored with a single atomic swap before the old one is
    /// released, so a reentrant read during that release never observes a dead
    /// pointer.
    ///
    /// # Safety
    /// Same contract as [`from_raw`](Self::from_raw) for `ptr`.
    pub unsafe fn set_handle(&self, ptr: *mut c_void, transfer_ownership: bool) {
        if !ptr.is_null() && !transfer_ownership {
            unsafe { add_ref_raw(ptr) };
        }
        let old = self.ptr.swap(ptr, Ordering::AcqRel);
        self.disposed.store(false, Ordering::Release);
        tracing::debug!(old = ?old, new = ?ptr, "ComObject handle replaced");
        if !old.is_null() {
            unsafe { release_raw(old) };
        }
    }

    /// Release the native reference. Idempotent.
    pub fn dispose(&self) {
        let old = self.ptr.swap(ptr::null_mut(), Ordering::AcqRel);
        self.disposed.store(true, Ordering::Release);
        if !old.is_null() {
            let remaining = unsafe { release_raw(old) };
            tracing::debug!(ptr = ?old, remaining, "ComObject disposed");
        }
        crate::shadow::reclaim();
    }

    /// Give up ownership of the reference without releasing it.
    #[must_use]
    pub fn into_raw(self) -> *mut c_void {
        let this = ManuallyDrop::new(self);
        this.ptr.swap(ptr::null_mut(), Ordering::AcqRel)
    }
}

impl Default for ComObject {
    fn default() -> Self {
        Self::null()
    }
}

impl Clone for ComObject {
    fn clone(&self) -> Self {
        let ptr = self.as_raw();
        let clone = unsafe { Self::from_raw(ptr, false) };
        clone
            .disposed
            .store(self.disposed.load(Ordering::Acquire), Ordering::Release);
        clone
    }
}

impl Drop for ComObject {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for ComObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComObject")
            .field("ptr", &self.as_raw())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
