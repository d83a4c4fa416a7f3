//! Interfaces, Rust implementations and a native test double shared by the
//! integration tests

#![allow(dead_code)]

use shadowbridge::proc::{com_implement, com_interface};
use shadowbridge::{
    Blittable, Callback, E_NOINTERFACE, E_POINTER, Error, GUID, HRESULT, IID_IUNKNOWN,
    IUnknownVTable, Result, S_OK, shadowed,
};
use std::ffi::c_void;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use widestring::U16CStr;

// =============================================================================
// Interfaces
// =============================================================================

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct GlyphRun {
    pub glyph_count: u32,
    pub font_size: f32,
    pub bidi_level: u32,
}

unsafe impl Blittable for GlyphRun {}

#[com_interface("6ab39a7b-4f26-4d62-9d4c-1a5b2a4e0c11")]
pub trait ITextRenderer {
    /// Slot 3
    fn draw_glyph_run(&self, baseline_x: f32, baseline_y: f32, run: &GlyphRun) -> Result<()>;
    fn pixels_per_dip(&self) -> f32;
    fn is_pixel_snapping_disabled(&self) -> Result<bool>;
}

#[com_interface("0c5a7d1e-3b7f-4e0a-8f43-7d0f6a9b2c31")]
pub trait ICounter {
    fn increment(&self);
    fn value(&self) -> u32;
    fn label_length(&self, label: &U16CStr) -> Result<u32>;
}

#[com_interface("5d9e2c44-0a11-4b8e-9c7a-2f1e3d4c5b6a")]
pub trait IShape {
    fn area(&self) -> f64;
}

#[com_interface("a3f1c2d4-5e6f-4a8b-9c0d-1e2f3a4b5c6d", extends(IShape))]
pub trait ICircle {
    fn radius(&self) -> Result<f64>;
    fn scale(&self, factor: f64) -> Result<()>;
}

#[com_interface("e7b6c5d4-a3b2-4c1d-8e9f-0a1b2c3d4e5f")]
pub trait ISink {
    fn notify(&self, source: Option<ICounter>) -> Result<()>;
    fn create_counter(&self, start: u32) -> Result<ICounter>;
    /// Fills in the caller's run
    fn shape_run(&self, run: &mut GlyphRun) -> Result<()>;
}

// =============================================================================
// Rust implementations
// =============================================================================

pub const MODE_OK: u8 = 0;
pub const MODE_ERR: u8 = 1;
pub const MODE_PANIC: u8 = 2;

#[derive(Default)]
pub struct Renderer {
    pub runs: Mutex<Vec<(f32, f32, GlyphRun)>>,
    pub mode: AtomicU8,
}

impl Renderer {
    pub fn with_mode(mode: u8) -> Self {
        let renderer = Self::default();
        renderer.mode.store(mode, Ordering::SeqCst);
        renderer
    }
}

#[com_implement(ITextRenderer)]
impl Renderer {
    fn draw_glyph_run(&self, baseline_x: f32, baseline_y: f32, run: &GlyphRun) -> Result<()> {
        match self.mode.load(Ordering::SeqCst) {
            MODE_ERR => Err(Error::InvalidArgument("empty glyph run".into())),
            MODE_PANIC => panic!("renderer exploded"),
            _ => {
                self.runs.lock().unwrap().push((baseline_x, baseline_y, *run));
                Ok(())
            }
        }
    }

    fn pixels_per_dip(&self) -> f32 {
        if self.mode.load(Ordering::SeqCst) == MODE_PANIC {
            panic!("no display");
        }
        1.5
    }

    fn is_pixel_snapping_disabled(&self) -> Result<bool> {
        Ok(true)
    }
}

shadowed!(Renderer: ITextRenderer);

pub struct Counter {
    pub value: AtomicU32,
    pub dropped: Option<Arc<AtomicBool>>,
}

impl Counter {
    pub fn new(start: u32) -> Self {
        Self {
            value: AtomicU32::new(start),
            dropped: None,
        }
    }

    /// A counter that raises the returned flag when it is freed
    pub fn tracked(start: u32) -> (Self, Arc<AtomicBool>) {
        let flag = Arc::new(AtomicBool::new(false));
        let counter = Self {
            value: AtomicU32::new(start),
            dropped: Some(Arc::clone(&flag)),
        };
        (counter, flag)
    }
}

impl Drop for Counter {
    fn drop(&mut self) {
        if let Some(flag) = &self.dropped {
            flag.store(true, Ordering::SeqCst);
        }
    }
}

#[com_implement(ICounter)]
impl Counter {
    fn increment(&self) {
        self.value.fetch_add(1, Ordering::SeqCst);
    }

    fn value(&self) -> u32 {
        self.value.load(Ordering::SeqCst)
    }

    fn label_length(&self, label: &U16CStr) -> Result<u32> {
        Ok(label.len() as u32)
    }
}

shadowed!(Counter: ICounter);

pub struct Circle {
    pub radius: Mutex<f64>,
}

#[com_implement(IShape)]
impl Circle {
    fn area(&self) -> f64 {
        let r = *self.radius.lock().unwrap();
        std::f64::consts::PI * r * r
    }
}

#[com_implement(ICircle)]
impl Circle {
    fn radius(&self) -> Result<f64> {
        Ok(*self.radius.lock().unwrap())
    }

    fn scale(&self, factor: f64) -> Result<()> {
        if factor <= 0.0 {
            return Err(Error::InvalidArgument(format!("scale factor {factor}")));
        }
        *self.radius.lock().unwrap() *= factor;
        Ok(())
    }
}

/// Exposes two unrelated interfaces
pub struct Gadget {
    pub counter: Counter,
}

#[com_implement(ICounter)]
impl Gadget {
    fn increment(&self) {
        self.counter.increment();
    }

    fn value(&self) -> u32 {
        self.counter.value()
    }

    fn label_length(&self, label: &U16CStr) -> Result<u32> {
        self.counter.label_length(label)
    }
}

#[com_implement(IShape)]
impl Gadget {
    fn area(&self) -> f64 {
        0.0
    }
}

shadowed!(Gadget: ICounter, IShape);

shadowed!(Circle: ICircle);

#[derive(Default)]
pub struct Sink {
    pub notified: AtomicU32,
}

#[com_implement(ISink)]
impl Sink {
    fn notify(&self, source: Option<ICounter>) -> Result<()> {
        self.notified.fetch_add(1, Ordering::SeqCst);
        if let Some(counter) = source {
            counter.increment()?;
        }
        Ok(())
    }

    fn create_counter(&self, start: u32) -> Result<ICounter> {
        Callback::new(Counter::new(start)).to_interface::<ICounter>()
    }

    fn shape_run(&self, run: &mut GlyphRun) -> Result<()> {
        run.glyph_count += 1;
        run.font_size *= 2.0;
        run.bidi_level = 1;
        Ok(())
    }
}

shadowed!(Sink: ISink);

// =============================================================================
// Log capture
// =============================================================================

#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for Captured {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Run `f` with a thread-local subscriber and return what it logged.
pub fn capture_logs(f: impl FnOnce()) -> String {
    let captured = Captured::default();
    let writer = captured.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_max_level(tracing::Level::TRACE)
        .with_writer(move || writer.clone())
        .finish();
    tracing::subscriber::with_default(subscriber, f);
    let bytes = captured.0.lock().unwrap().clone();
    String::from_utf8_lossy(&bytes).into_owned()
}

// =============================================================================
// Native test double
// =============================================================================

/// A native COM object with a static vtable and an observable count.
///
/// Answers `QueryInterface` with itself for `IUnknown` and every id in
/// `supported`. Memory belongs to the test, so a count of zero frees nothing.
#[repr(C)]
pub struct FakeNative {
    vtable: *const IUnknownVTable,
    refcount: AtomicU32,
    supported: Vec<GUID>,
}

static FAKE_VTABLE: IUnknownVTable = IUnknownVTable {
    query_interface: fake_query_interface,
    add_ref: fake_add_ref,
    release: fake_release,
};

unsafe extern "system" fn fake_query_interface(
    this: *mut c_void,
    riid: *const GUID,
    ppv: *mut *mut c_void,
) -> HRESULT {
    if ppv.is_null() || riid.is_null() {
        return E_POINTER;
    }
    unsafe { *ppv = ptr::null_mut() };
    let object = unsafe { &*(this as *const FakeNative) };
    let iid = unsafe { *riid };
    if iid == IID_IUNKNOWN || object.supported.contains(&iid) {
        object.refcount.fetch_add(1, Ordering::SeqCst);
        unsafe { *ppv = this };
        S_OK
    } else {
        E_NOINTERFACE
    }
}

unsafe extern "system" fn fake_add_ref(this: *mut c_void) -> u32 {
    let object = unsafe { &*(this as *const FakeNative) };
    object.refcount.fetch_add(1, Ordering::SeqCst) + 1
}

unsafe extern "system" fn fake_release(this: *mut c_void) -> u32 {
    let object = unsafe { &*(this as *const FakeNative) };
    let previous = object.refcount.fetch_sub(1, Ordering::SeqCst);
    assert!(previous > 0, "native object released below zero");
    previous - 1
}

impl FakeNative {
    /// An object whose creator holds `initial` references
    pub fn new(initial: u32, supported: &[GUID]) -> Box<Self> {
        Box::new(Self {
            vtable: &FAKE_VTABLE,
            refcount: AtomicU32::new(initial),
            supported: supported.to_vec(),
        })
    }

    pub fn as_raw(&self) -> *mut c_void {
        self as *const Self as *mut c_void
    }

    pub fn count(&self) -> u32 {
        self.refcount.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Calling shadows the way native code does
// =============================================================================

pub unsafe fn native_query(this: *mut c_void, iid: &GUID) -> (HRESULT, *mut c_void) {
    // Non-null sentinel, so tests can see QueryInterface clear it
    let mut out = ptr::NonNull::<c_void>::dangling().as_ptr();
    let vtable = unsafe { &**(this as *const *const IUnknownVTable) };
    let hr = unsafe { (vtable.query_interface)(this, iid, &mut out) };
    (hr, out)
}

pub unsafe fn native_add_ref(this: *mut c_void) -> u32 {
    let vtable = unsafe { &**(this as *const *const IUnknownVTable) };
    unsafe { (vtable.add_ref)(this) }
}

pub unsafe fn native_release(this: *mut c_void) -> u32 {
    let vtable = unsafe { &**(this as *const *const IUnknownVTable) };
    unsafe { (vtable.release)(this) }
}
