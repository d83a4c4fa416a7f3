//! Native-callable shadows of Rust objects
//!
//! A [`Callback<T>`] owns a Rust value and a [`ShadowContainer`] of [`Shadow`]s,
//! one per interface of `T` that native code has asked for. A shadow is a
//! COM object in its own right: its first field is the vtable pointer native
//! code dispatches through.
//!
//! ## Memory Layout
//!
//! ```text
//! Shadow (#[repr(C)])                 static vtable (one per (T, interface))
//! ┌──────────────────┐                ┌──────────────────────────┐
//! │ vtable*          │ ─────────────► │ QueryInterface<T>        │ slot 0
//! ├──────────────────┤                │ AddRef<T>                │ slot 1
//! │ refcount         │                │ Release<T>               │ slot 2
//! │ owner*           │ ──► Arc<..T..> │ method thunks<T>         │ slot 3..
//! │ iid              │                └──────────────────────────┘
//! └──────────────────┘
//! ```
//!
//! ## Lifetimes
//!
//! The native count of a shadow and the Rust strong count of its owner are
//! linked: a shadow going 0 -> 1 takes a strong reference on the owner, and
//! 1 -> 0 gives it back. The owner is therefore alive while any shadow is
//! referenced natively or any [`Callback`] handle exists. The owner is freed
//! as soon as the last reference goes away, unless a thunk is running on the
//! releasing thread. Then it is parked and freed when the outermost thunk on
//! that thread returns.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::ffi::c_void;
use std::ops::Deref;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::ptr;
use std::sync::Arc;

use crate::com::{ComInterface, IID_IUNKNOWN, RefCount, VTableLayout};
use crate::config;
use crate::container::ShadowContainer;
use crate::error::{Error, Result};
use crate::guid::GUID;
use crate::hresult::{E_POINTER, HRESULT, S_OK, stash_fault};
use crate::object::ComObject;
use crate::registry;

// =============================================================================
// Capability table
// =============================================================================

/// A Rust type that can be exposed to native code.
///
/// Usually implemented with [`shadowed!`](crate::shadowed).
pub trait Shadowed: Send + Sync + Sized + 'static {
    /// Interfaces exposed by the type. The first entry answers `IUnknown`.
    const INTERFACES: &'static [ShadowInterface];
}

/// Vtable of interface `Self` filled with thunks dispatching to `T`.
///
/// Implemented by `#[com_interface]` for every `T` implementing the
/// interface's `Impl` trait.
pub trait ShadowVTable<T>: ComInterface + VTableLayout {
    /// The static vtable
    const VTABLE: &'static Self::VTable;
}

/// One row of a capability table.
#[derive(Clone, Copy)]
pub struct ShadowInterface {
    /// Interface identifier
    pub iid: GUID,
    /// Interface name
    pub name: &'static str,
    /// Static vtable handed to native code
    pub vtable: *const c_void,
    /// Accepts the interface's own id and those of its ancestors
    pub derives_from: fn(&GUID) -> bool,
}

// SAFETY: the vtable pointer refers to an immutable static
unsafe impl Send for ShadowInterface {}
unsafe impl Sync for ShadowInterface {}

impl ShadowInterface {
    /// The row for interface `I` implemented by `T`.
    #[must_use]
    pub const fn of<T, I: ShadowVTable<T>>() -> Self {
        Self {
            iid: I::IID,
            name: I::NAME,
            vtable: I::VTABLE as *const I::VTable as *const c_void,
            derives_from: I::derives_from,
        }
    }

    /// Pick the row answering a query for `iid`.
    ///
    /// `IUnknown` maps to the first row, then an exact match wins, then the
    /// first row whose inheritance chain contains `iid`.
    pub fn resolve<'a>(interfaces: &'a [ShadowInterface], iid: &GUID) -> Option<&'a ShadowInterface> {
        if *iid == IID_IUNKNOWN {
            return interfaces.first();
        }
        interfaces
            .iter()
            .find(|entry| entry.iid == *iid)
            .or_else(|| interfaces.iter().find(|entry| (entry.derives_from)(iid)))
    }
}

impl std::fmt::Debug for ShadowInterface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShadowInterface")
            .field("iid", &self.iid)
            .field("name", &self.name)
            .field("vtable", &self.vtable)
            .finish()
    }
}

// =============================================================================
// Shadow
// =============================================================================

/// Native view of a Rust object for one interface.
#[repr(C)]
pub struct Shadow {
    vtable: *const c_void,
    refcount: RefCount,
    owner: *const c_void,
    iid: GUID,
    name: &'static str,
}

// SAFETY: the vtable is static, the owner is shared behind an Arc of a
// Send + Sync value, and the count is atomic
unsafe impl Send for Shadow {}
unsafe impl Sync for Shadow {}

impl Shadow {
    pub(crate) fn new(entry: &ShadowInterface, owner: *const c_void) -> Self {
        Self {
            vtable: entry.vtable,
            refcount: RefCount::new(0),
            owner,
            iid: entry.iid,
            name: entry.name,
        }
    }

    /// The pointer native code receives
    #[inline]
    #[must_use]
    pub fn as_raw(&self) -> *mut c_void {
        self as *const Shadow as *mut c_void
    }

    /// Current native reference count
    #[inline]
    #[must_use]
    pub fn ref_count(&self) -> u32 {
        self.refcount.count()
    }

    /// Interface this shadow was created for
    #[inline]
    #[must_use]
    pub fn iid(&self) -> GUID {
        self.iid
    }

    /// Name of that interface
    #[inline]
    #[must_use]
    pub fn interface_name(&self) -> &'static str {
        self.name
    }

    /// The static vtable
    #[inline]
    #[must_use]
    pub fn vtable(&self) -> *const c_void {
        self.vtable
    }
}

impl std::fmt::Debug for Shadow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shadow")
            .field("interface", &self.name)
            .field("iid", &self.iid)
            .field("refcount", &self.ref_count())
            .finish()
    }
}

/// # Safety
/// `this` must be a pointer handed out by a live [`Shadow`].
#[inline]
unsafe fn shadow_ref<'a>(this: *mut c_void) -> &'a Shadow {
    unsafe { &*(this as *const Shadow) }
}

/// # Safety
/// The shadow's owner must be alive.
#[inline]
unsafe fn owner_ref<'a, T: Shadowed>(shadow: &Shadow) -> &'a CallbackInner<T> {
    unsafe { &*(shadow.owner as *const CallbackInner<T>) }
}

// =============================================================================
// IUnknown thunks
// =============================================================================

/// Slot 0 of every shadow vtable for `T`.
///
/// # Safety
/// Called by native code through a shadow vtable.
#[doc(hidden)]
pub unsafe extern "system" fn shadow_query_interface<T: Shadowed>(
    this: *mut c_void,
    riid: *const GUID,
    ppv: *mut *mut c_void,
) -> HRESULT {
    if ppv.is_null() {
        return E_POINTER;
    }
    unsafe { *ppv = ptr::null_mut() };
    if this.is_null() || riid.is_null() {
        return E_POINTER;
    }

    let shadow = unsafe { shadow_ref(this) };
    let iid = unsafe { *riid };
    let owner = unsafe { owner_ref::<T>(shadow) };

    match owner.shadows.get_or_create(&iid) {
        Ok(target) => {
            let raw = target.as_raw();
            unsafe {
                shadow_add_ref::<T>(raw);
                *ppv = raw;
            }
            tracing::trace!(%iid, interface = target.interface_name(), "QueryInterface hit");
            S_OK
        }
        Err(e) => {
            let requested = registry::global().name_of(&iid).unwrap_or("<unregistered>");
            tracing::trace!(
                %iid,
                requested,
                owner = owner.shadows.type_name(),
                "QueryInterface miss"
            );
            e.code()
        }
    }
}

/// Slot 1 of every shadow vtable for `T`.
///
/// # Safety
/// Called by native code through a shadow vtable.
#[doc(hidden)]
pub unsafe extern "system" fn shadow_add_ref<T: Shadowed>(this: *mut c_void) -> u32 {
    if this.is_null() {
        return 0;
    }
    let shadow = unsafe { shadow_ref(this) };
    let count = shadow.refcount.add_ref();
    if count == 1 {
        // First native reference keeps the owner alive
        unsafe { Arc::increment_strong_count(shadow.owner as *const CallbackInner<T>) };
    }
    count
}

/// Slot 2 of every shadow vtable for `T`.
///
/// # Safety
/// Called by native code through a shadow vtable.
#[doc(hidden)]
pub unsafe extern "system" fn shadow_release<T: Shadowed>(this: *mut c_void) -> u32 {
    if this.is_null() {
        return 0;
    }
    let shadow = unsafe { shadow_ref(this) };
    match shadow.refcount.release() {
        Ok(0) => {
            tracing::trace!(interface = shadow.name, "last native reference released");
            let owner = unsafe { Arc::from_raw(shadow.owner as *const CallbackInner<T>) };
            defer_release(owner);
            0
        }
        Ok(count) => count,
        Err(e) => {
            config::refcount_violation(
                "release below zero",
                &format_args!("{e} on {} shadow at {:p}", shadow.name, this),
            );
            0
        }
    }
}

// =============================================================================
// Method dispatch
// =============================================================================

/// Strong reference on the owner for the duration of one call.
struct CallGuard<T: Shadowed>(Option<Arc<CallbackInner<T>>>);

impl<T: Shadowed> CallGuard<T> {
    /// # Safety
    /// The owner of `shadow` must be alive.
    unsafe fn enter(shadow: &Shadow) -> Self {
        let owner = shadow.owner as *const CallbackInner<T>;
        THUNK_DEPTH.with(|depth| depth.set(depth.get() + 1));
        unsafe {
            Arc::increment_strong_count(owner);
            Self(Some(Arc::from_raw(owner)))
        }
    }

    fn value(&self) -> &T {
        match &self.0 {
            Some(inner) => &inner.value,
            None => unreachable!("call guard used after release"),
        }
    }
}

impl<T: Shadowed> Drop for CallGuard<T> {
    fn drop(&mut self) {
        THUNK_DEPTH.with(|depth| depth.set(depth.get() - 1));
        if let Some(owner) = self.0.take() {
            defer_release(owner);
        }
        reclaim();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

/// Run `f` on the owner of `this`, containing panics.
///
/// # Safety
/// `this` must be non-null and handed out by a live shadow of `T`.
unsafe fn invoke<T, R>(this: *mut c_void, method: &'static str, f: impl FnOnce(&T) -> Result<R>) -> Result<R>
where
    T: Shadowed,
{
    let shadow = unsafe { shadow_ref(this) };
    let guard = unsafe { CallGuard::<T>::enter(shadow) };

    let outcome = catch_unwind(AssertUnwindSafe(|| f(guard.value())));

    // `guard` outlives every use of `shadow` below
    match outcome {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::warn!(interface = shadow.name, method, %message, "callback panicked");
            Err(Error::CallbackFault(format!("{}::{method}: {message}", shadow.name)))
        }
    }
}

/// Entry point of generated thunks for methods returning a status code.
///
/// Errors and panics become failure codes; with
/// [`stash_faults`](config::BridgeConfig::stash_faults) on, the error is kept
/// for [`check`](crate::check) in the proxy call that reached this thunk.
///
/// # Safety
/// `this` must be null or handed out by a live shadow of `T`.
#[doc(hidden)]
pub unsafe fn dispatch<T: Shadowed>(
    this: *mut c_void,
    method: &'static str,
    f: impl FnOnce(&T) -> Result<()>,
) -> HRESULT {
    if this.is_null() {
        return E_POINTER;
    }
    match unsafe { invoke(this, method, f) } {
        Ok(()) => S_OK,
        Err(e) => {
            let code = e.code();
            tracing::warn!(method, code = %code, error = %e, "callback failed");
            if config::get().stash_faults {
                stash_fault(e);
            }
            code
        }
    }
}

/// Entry point of generated thunks for methods returning a plain value.
///
/// A failure cannot be reported, so it is logged and `R::default()` returned.
///
/// # Safety
/// `this` must be null or handed out by a live shadow of `T`.
#[doc(hidden)]
pub unsafe fn dispatch_value<T: Shadowed, R: Default>(
    this: *mut c_void,
    method: &'static str,
    f: impl FnOnce(&T) -> Result<R>,
) -> R {
    if this.is_null() {
        return R::default();
    }
    match unsafe { invoke(this, method, f) } {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(method, error = %e, "callback failed, returning default");
            R::default()
        }
    }
}

// =============================================================================
// Deferred reclamation
// =============================================================================

thread_local! {
    /// Thunks currently running on this thread
    static THUNK_DEPTH: Cell<u32> = const { Cell::new(0) };
    /// Owners released inside a thunk on this thread
    static DEFERRED: RefCell<Vec<Box<dyn Any>>> = const { RefCell::new(Vec::new()) };
}

fn in_thunk() -> bool {
    THUNK_DEPTH.with(Cell::get) > 0
}

/// Give back a strong reference on an owner.
///
/// If it was the last one and a thunk is running on this thread, the owner
/// is parked instead of dropped, so its memory outlives the native frame
/// that released it.
fn defer_release<T: Shadowed>(owner: Arc<CallbackInner<T>>) {
    let Some(inner) = Arc::into_inner(owner) else {
        return;
    };
    if in_thunk() {
        tracing::trace!(owner = inner.shadows.type_name(), "owner parked for reclamation");
        DEFERRED.with(|queue| queue.borrow_mut().push(Box::new(inner)));
    } else {
        tracing::trace!(owner = inner.shadows.type_name(), "owner freed");
        drop(inner);
    }
}

/// Free owners parked on this thread.
///
/// Returns the number of objects freed. Does nothing while a thunk is
/// running on this thread. Runs automatically when the outermost thunk
/// returns, when a [`Callback`] is created or dropped, and on
/// [`ComObject::dispose`].
pub fn reclaim() -> usize {
    if in_thunk() {
        return 0;
    }
    // Taken out first: an owner's drop may release other shadows
    let parked = DEFERRED.with(|queue| std::mem::take(&mut *queue.borrow_mut()));
    let count = parked.len();
    drop(parked);
    if count > 0 {
        tracing::debug!(count, "reclaimed shadowed objects");
    }
    count
}

// =============================================================================
// Callback
// =============================================================================

pub(crate) struct CallbackInner<T> {
    value: T,
    shadows: ShadowContainer,
}

/// Host of a Rust object exposed to native code.
///
/// Cloning shares the object. The object lives until every `Callback` handle
/// and every native reference to one of its shadows is gone.
pub struct Callback<T: Shadowed> {
    inner: Arc<CallbackInner<T>>,
}

impl<T: Shadowed> Callback<T> {
    /// Wrap `value`. No shadow exists until one is requested.
    pub fn new(value: T) -> Self {
        reclaim();
        let inner = Arc::new_cyclic(|weak| CallbackInner {
            value,
            shadows: ShadowContainer::new::<T>(weak.as_ptr() as *const c_void),
        });
        Self { inner }
    }

    /// The shadows created so far
    #[inline]
    pub fn container(&self) -> &ShadowContainer {
        &self.inner.shadows
    }

    /// The shadow answering for interface `I`.
    pub fn shadow<I: ComInterface>(&self) -> Result<&Shadow> {
        self.shadow_for(&I::IID)
    }

    /// The shadow answering for `iid`.
    pub fn shadow_for(&self, iid: &GUID) -> Result<&Shadow> {
        self.inner.shadows.get_or_create(iid)
    }

    /// Typed proxy over this object's own shadow (one native reference).
    pub fn to_interface<I: ComInterface>(&self) -> Result<I> {
        let shadow = self.shadow::<I>()?;
        let object = unsafe { ComObject::from_raw(shadow.as_raw(), false) };
        Ok(unsafe { I::from_object(object) })
    }

    /// Hand the object to native code as interface `I`.
    ///
    /// The returned pointer carries one reference, which keeps the object
    /// alive after this handle is dropped.
    pub fn into_raw<I: ComInterface>(self) -> Result<*mut c_void> {
        let shadow = self.shadow::<I>()?;
        let raw = shadow.as_raw();
        unsafe { shadow_add_ref::<T>(raw) };
        Ok(raw)
    }

    /// Number of `Callback` handles and native-referenced shadows keeping the
    /// object alive.
    #[must_use]
    pub fn strong_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl<T: Shadowed> Deref for Callback<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner.value
    }
}

impl<T: Shadowed> Clone for Callback<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Shadowed> Drop for Callback<T> {
    fn drop(&mut self) {
        reclaim();
    }
}

impl<T: Shadowed + std::fmt::Debug> std::fmt::Debug for Callback<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callback")
            .field("value", &self.inner.value)
            .field("shadows", &self.inner.shadows)
            .finish()
    }
}
