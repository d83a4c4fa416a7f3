//! Marshaling helpers for crossing the native boundary
//!
//! Two layers:
//! - [`Blittable`] types have identical managed and native representations and
//!   are copied bit for bit ([`read`], [`write`], [`as_bytes`], [`from_bytes`],
//!   [`slice_from_raw`], [`copy_to_native`]).
//! - [`Param`] projects a Rust parameter type onto its ABI type. The code
//!   generated by `#[com_interface]` calls it on both sides: proxies lower
//!   arguments with [`Param::to_abi`], shadow thunks lift them with
//!   [`Param::from_abi`].
//!
//! | Rust type | ABI type |
//! |-----------|----------|
//! | integers, floats, `GUID`, `HRESULT` | same |
//! | `bool` | `i32` (Win32 `BOOL`) |
//! | `*const T`, `*mut T` | same |
//! | `&T`, `&mut T` (`T: Blittable`) | `*const T`, `*mut T` (non-null) |
//! | `&U16CStr` | `*const u16` (NUL-terminated) |
//! | interface proxy `I` | `*mut c_void` (non-null) |
//! | `Option<I>` | `*mut c_void` (nullable) |

use std::ffi::c_void;
use std::mem::{MaybeUninit, size_of};

use widestring::{U16CStr, U16CString, U16Str};

use crate::com::ComInterface;
use crate::error::{Error, Result};
use crate::guid::GUID;
use crate::hresult::HRESULT;
use crate::object::ComObject;

// =============================================================================
// Blittable
// =============================================================================

/// Types whose managed and native layouts are identical.
///
/// # Safety
/// The type must be `#[repr(C)]` or `#[repr(transparent)]` (or a primitive),
/// contain no references, and accept every bit pattern native code may write.
pub unsafe trait Blittable: Copy + 'static {}

macro_rules! blittable {
    ($($ty:ty),* $(,)?) => {
        $(unsafe impl Blittable for $ty {})*
    };
}

blittable!(u8, u16, u32, u64, i8, i16, i32, i64, usize, isize, f32, f64, GUID, HRESULT);

unsafe impl<T: Blittable, const N: usize> Blittable for [T; N] {}
unsafe impl<T: 'static> Blittable for *const T {}
unsafe impl<T: 'static> Blittable for *mut T {}

/// Copy a value out of native memory.
///
/// # Safety
/// `ptr` must be null or valid and aligned for reads of `T`.
pub unsafe fn read<T: Blittable>(ptr: *const T) -> Result<T> {
    if ptr.is_null() {
        return Err(Error::NullPointer);
    }
    Ok(unsafe { ptr.read() })
}

/// Copy a value out of possibly unaligned native memory (e.g. packed buffers).
///
/// # Safety
/// `ptr` must be null or valid for reads of `size_of::<T>()` bytes.
pub unsafe fn read_unaligned<T: Blittable>(ptr: *const T) -> Result<T> {
    if ptr.is_null() {
        return Err(Error::NullPointer);
    }
    Ok(unsafe { ptr.read_unaligned() })
}

/// Copy a value into native memory.
///
/// # Safety
/// `ptr` must be null or valid and aligned for writes of `T`.
pub unsafe fn write<T: Blittable>(ptr: *mut T, value: T) -> Result<()> {
    if ptr.is_null() {
        return Err(Error::NullPointer);
    }
    unsafe { ptr.write(value) };
    Ok(())
}

/// View a blittable value as raw bytes.
pub fn as_bytes<T: Blittable>(value: &T) -> &[u8] {
    unsafe { std::slice::from_raw_parts(value as *const T as *const u8, size_of::<T>()) }
}

/// Rebuild a blittable value from raw bytes; the length must match exactly.
pub fn from_bytes<T: Blittable>(bytes: &[u8]) -> Result<T> {
    if bytes.len() != size_of::<T>() {
        return Err(Error::InvalidArgument(format!(
            "expected {} bytes, got {}",
            size_of::<T>(),
            bytes.len()
        )));
    }
    Ok(unsafe { (bytes.as_ptr() as *const T).read_unaligned() })
}

// =============================================================================
// Arrays
// =============================================================================

/// Borrow a native `(pointer, count)` array.
///
/// A zero count is always valid, even with a null pointer.
///
/// # Safety
/// For non-zero `len`, `ptr` must be valid for `len` reads of `T` for `'a`.
pub unsafe fn slice_from_raw<'a, T: Blittable>(ptr: *const T, len: usize) -> Result<&'a [T]> {
    if len == 0 {
        return Ok(&[]);
    }
    if ptr.is_null() {
        return Err(Error::NullPointer);
    }
    Ok(unsafe { std::slice::from_raw_parts(ptr, len) })
}

/// Mutable variant of [`slice_from_raw`].
///
/// # Safety
/// For non-zero `len`, `ptr` must be valid for `len` writes of `T` for `'a`
/// and not aliased.
pub unsafe fn slice_from_raw_mut<'a, T: Blittable>(ptr: *mut T, len: usize) -> Result<&'a mut [T]> {
    if len == 0 {
        return Ok(&mut []);
    }
    if ptr.is_null() {
        return Err(Error::NullPointer);
    }
    Ok(unsafe { std::slice::from_raw_parts_mut(ptr, len) })
}

/// Copy `src` into a native buffer of `capacity` elements. Returns the count written.
///
/// # Safety
/// `dst` must be valid for `capacity` writes of `T`.
pub unsafe fn copy_to_native<T: Blittable>(src: &[T], dst: *mut T, capacity: usize) -> Result<usize> {
    if src.len() > capacity {
        return Err(Error::InvalidArgument(format!(
            "buffer holds {capacity} elements, {} required",
            src.len()
        )));
    }
    if src.is_empty() {
        return Ok(0);
    }
    if dst.is_null() {
        return Err(Error::NullPointer);
    }
    unsafe { std::ptr::copy_nonoverlapping(src.as_ptr(), dst, src.len()) };
    Ok(src.len())
}

/// Lower a list of optional interfaces to a native pointer array.
///
/// No references are added; the array borrows from `items`.
pub fn interface_array<I: ComInterface>(items: &[Option<I>]) -> Vec<*mut c_void> {
    items
        .iter()
        .map(|item| item.as_ref().map_or(std::ptr::null_mut(), |i| i.as_raw()))
        .collect()
}

// =============================================================================
// Strings
// =============================================================================

/// Encode a string as NUL-terminated UTF-16.
pub fn to_wide(s: &str) -> Result<U16CString> {
    Ok(U16CString::from_str(s)?)
}

/// Decode a NUL-terminated UTF-16 string.
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated UTF-16 buffer.
pub unsafe fn from_wide_ptr(ptr: *const u16) -> Result<String> {
    if ptr.is_null() {
        return Err(Error::NullPointer);
    }
    Ok(unsafe { U16CStr::from_ptr_str(ptr) }.to_string()?)
}

/// Decode a counted UTF-16 string (no terminator required).
///
/// # Safety
/// For non-zero `len`, `ptr` must be valid for `len` reads of `u16`.
pub unsafe fn from_wide_len(ptr: *const u16, len: usize) -> Result<String> {
    if len == 0 {
        return Ok(String::new());
    }
    if ptr.is_null() {
        return Err(Error::NullPointer);
    }
    Ok(unsafe { U16Str::from_ptr(ptr, len) }.to_string()?)
}

// =============================================================================
// Out parameters
// =============================================================================

/// Hand a return value to the native caller through an out-parameter.
///
/// Ownership of the value moves to the caller.
///
/// # Safety
/// `out` must be null or valid for a write of `T::Abi`.
pub unsafe fn write_out<T: Param>(out: *mut T::Abi, value: T) -> Result<()> {
    if out.is_null() {
        return Err(Error::NullPointer);
    }
    unsafe { out.write(value.into_abi()) };
    Ok(())
}

/// Zero an out-parameter so a failing call never leaves garbage behind.
///
/// # Safety
/// `out` must be null or valid for a write of `A`.
pub unsafe fn clear_out<A: Copy>(out: *mut A) {
    if !out.is_null() {
        unsafe { out.write(MaybeUninit::zeroed().assume_init()) };
    }
}

// =============================================================================
// Param
// =============================================================================

/// Projection of a Rust parameter type onto its native ABI type.
pub trait Param: Sized {
    /// The type that crosses the boundary
    type Abi: Copy;

    /// Lower for the duration of a call; no ownership moves.
    fn to_abi(&self) -> Self::Abi;

    /// Lift a value the native caller still owns.
    ///
    /// # Safety
    /// `abi` must satisfy the native contract of the parameter (valid pointers
    /// for the duration of the call).
    unsafe fn from_abi(abi: Self::Abi) -> Result<Self>;

    /// Lower and hand ownership to the other side.
    #[inline]
    fn into_abi(self) -> Self::Abi {
        self.to_abi()
    }

    /// Lift a value whose ownership is handed to us.
    ///
    /// # Safety
    /// Same as [`from_abi`](Self::from_abi).
    #[inline]
    unsafe fn from_abi_owned(abi: Self::Abi) -> Result<Self> {
        unsafe { Self::from_abi(abi) }
    }
}

macro_rules! param_identity {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Param for $ty {
                type Abi = $ty;

                #[inline]
                fn to_abi(&self) -> $ty {
                    *self
                }

                #[inline]
                unsafe fn from_abi(abi: $ty) -> Result<Self> {
                    Ok(abi)
                }
            }
        )*
    };
}

param_identity!(u8, u16, u32, u64, i8, i16, i32, i64, usize, isize, f32, f64, GUID, HRESULT);

impl Param for bool {
    type Abi = i32;

    #[inline]
    fn to_abi(&self) -> i32 {
        i32::from(*self)
    }

    #[inline]
    unsafe fn from_abi(abi: i32) -> Result<Self> {
        Ok(abi != 0)
    }
}

impl<T: 'static> Param for *const T {
    type Abi = *const T;

    #[inline]
    fn to_abi(&self) -> *const T {
        *self
    }

    #[inline]
    unsafe fn from_abi(abi: *const T) -> Result<Self> {
        Ok(abi)
    }
}

impl<T: 'static> Param for *mut T {
    type Abi = *mut T;

    #[inline]
    fn to_abi(&self) -> *mut T {
        *self
    }

    #[inline]
    unsafe fn from_abi(abi: *mut T) -> Result<Self> {
        Ok(abi)
    }
}

impl<'a, T: Blittable> Param for &'a T {
    type Abi = *const T;

    #[inline]
    fn to_abi(&self) -> *const T {
        *self
    }

    unsafe fn from_abi(abi: *const T) -> Result<Self> {
        unsafe { abi.as_ref() }.ok_or(Error::NullPointer)
    }
}

/// Generated proxies lower `&mut T` through [`into_abi`](Param::into_abi), which
/// keeps the write permission of the unique borrow. The pointer from `to_abi`
/// is derived from a shared reborrow and must only be read through.
impl<'a, T: Blittable> Param for &'a mut T {
    type Abi = *mut T;

    #[inline]
    fn to_abi(&self) -> *mut T {
        &**self as *const T as *mut T
    }

    unsafe fn from_abi(abi: *mut T) -> Result<Self> {
        unsafe { abi.as_mut() }.ok_or(Error::NullPointer)
    }

    #[inline]
    fn into_abi(self) -> *mut T {
        self as *mut T
    }
}

impl<'a> Param for &'a U16CStr {
    type Abi = *const u16;

    #[inline]
    fn to_abi(&self) -> *const u16 {
        self.as_ptr()
    }

    unsafe fn from_abi(abi: *const u16) -> Result<Self> {
        if abi.is_null() {
            return Err(Error::NullPointer);
        }
        Ok(unsafe { U16CStr::from_ptr_str(abi) })
    }
}

impl<I: ComInterface> Param for Option<I> {
    type Abi = *mut c_void;

    #[inline]
    fn to_abi(&self) -> *mut c_void {
        self.as_ref().map_or(std::ptr::null_mut(), |i| i.as_raw())
    }

    unsafe fn from_abi(abi: *mut c_void) -> Result<Self> {
        if abi.is_null() {
            return Ok(None);
        }
        Ok(Some(unsafe { interface_from_abi(abi, false)? }))
    }

    fn into_abi(self) -> *mut c_void {
        self.map_or(std::ptr::null_mut(), |i| {
            // Keep the proxy's reference alive for the receiver
            let object = unsafe { std::ptr::read(i.as_object()) };
            std::mem::forget(i);
            object.into_raw()
        })
    }

    unsafe fn from_abi_owned(abi: *mut c_void) -> Result<Self> {
        if abi.is_null() {
            return Ok(None);
        }
        Ok(Some(unsafe { interface_from_abi(abi, true)? }))
    }
}

/// Wrap an interface pointer received from native code.
///
/// # Safety
/// `abi` must be null or a live pointer to interface `I`; with `owned`, the
/// caller hands over one reference.
pub unsafe fn interface_from_abi<I: ComInterface>(abi: *mut c_void, owned: bool) -> Result<I> {
    if abi.is_null() {
        return Err(Error::NullPointer);
    }
    let object = unsafe { ComObject::from_raw(abi, owned) };
    Ok(unsafe { I::from_object(object) })
}

/// Move the reference out of an interface proxy.
pub fn interface_into_abi<I: ComInterface>(iface: I) -> *mut c_void {
    let object = unsafe { std::ptr::read(iface.as_object()) };
    std::mem::forget(iface);
    object.into_raw()
}
