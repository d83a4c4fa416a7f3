//! Tests for native object proxies

mod common;

use common::*;
use shadowbridge::{Callback, ComInterface, ComObject, Error, GUID, IUnknown};
use widestring::u16cstr;

const IID_ABSENT: GUID = GUID::from_u128(0x0bad_0000_0000_0000_0000_0000_0000_0001);

// =============================================================================
// Test: Reference accounting against a native object
// =============================================================================

#[test]
fn test_borrowed_wrap_then_dispose_is_balanced() {
    let native = FakeNative::new(1, &[]);

    let object = unsafe { ComObject::from_raw(native.as_raw(), false) };
    assert_eq!(native.count(), 2);

    object.dispose();
    assert_eq!(native.count(), 1);
}

#[test]
fn test_owned_wrap_double_dispose() {
    // Scenario: factory hands over H, proxy takes it, disposed twice
    let native = FakeNative::new(1, &[]);

    let object = unsafe { ComObject::from_raw(native.as_raw(), true) };
    assert_eq!(native.count(), 1);

    object.dispose();
    assert_eq!(native.count(), 0);
    assert!(object.is_disposed());
    assert!(object.as_raw().is_null());

    object.dispose();
    assert_eq!(native.count(), 0);

    // Drop after dispose releases nothing either
    drop(object);
    assert_eq!(native.count(), 0);
}

#[test]
fn test_drop_releases_once() {
    let native = FakeNative::new(1, &[]);
    {
        let _object = unsafe { ComObject::from_raw_borrowed(native.as_raw()) };
        assert_eq!(native.count(), 2);
    }
    assert_eq!(native.count(), 1);
}

#[test]
fn test_clone_adds_reference() {
    let native = FakeNative::new(1, &[]);
    let object = unsafe { ComObject::from_raw_owned(native.as_raw()) };

    let clone = object.clone();
    assert_eq!(native.count(), 2);
    assert_eq!(clone.as_raw(), object.as_raw());

    drop(clone);
    drop(object);
    assert_eq!(native.count(), 0);
}

#[test]
fn test_use_after_dispose() {
    let native = FakeNative::new(1, &[]);
    let object = unsafe { ComObject::from_raw_owned(native.as_raw()) };
    object.dispose();

    assert!(matches!(object.handle(), Err(Error::UseAfterDispose)));
    assert!(matches!(
        object.query_interface::<IUnknown>(),
        Err(Error::UseAfterDispose)
    ));
}

#[test]
fn test_use_after_dispose_is_logged_as_error() {
    let native = FakeNative::new(1, &[IID_ICOUNTER]);
    let counter = unsafe { ICounter::from_object(ComObject::from_raw_owned(native.as_raw())) };
    counter.dispose();

    let logs = capture_logs(|| {
        assert!(matches!(counter.value(), Err(Error::UseAfterDispose)));
    });
    assert!(logs.contains("ERROR"), "{logs}");
    assert!(logs.contains("ComObject used after dispose"), "{logs}");
    assert_eq!(native.count(), 0);
}

#[test]
fn test_into_raw_keeps_reference() {
    let native = FakeNative::new(1, &[]);
    let object = unsafe { ComObject::from_raw_borrowed(native.as_raw()) };
    let raw = object.into_raw();
    assert_eq!(raw, native.as_raw());
    assert_eq!(native.count(), 2);

    drop(unsafe { ComObject::from_raw_owned(raw) });
    assert_eq!(native.count(), 1);
}

// =============================================================================
// Test: QueryInterface
// =============================================================================

#[test]
fn test_query_interface_supported() {
    let native = FakeNative::new(1, &[IID_ICOUNTER]);
    let object = unsafe { ComObject::from_raw_owned(native.as_raw()) };

    let counter = object.query_interface::<ICounter>().unwrap();
    assert_eq!(native.count(), 2);
    assert_eq!(counter.as_raw(), native.as_raw());

    drop(counter);
    assert_eq!(native.count(), 1);
}

#[test]
fn test_query_interface_not_supported_is_soft() {
    let native = FakeNative::new(1, &[]);
    let object = unsafe { ComObject::from_raw_owned(native.as_raw()) };

    let result = object.query_interface_raw(&IID_ABSENT);
    assert!(matches!(result, Err(Error::InterfaceNotSupported(iid)) if iid == IID_ABSENT));
    assert_eq!(native.count(), 1);
    assert!(!object.is_disposed());

    assert!(object.query_interface_opt::<ICounter>().unwrap().is_none());
    assert_eq!(native.count(), 1);
}

#[test]
fn test_is_same_object() {
    let native = FakeNative::new(1, &[IID_ICOUNTER]);
    let other = FakeNative::new(1, &[]);
    let a = unsafe { ComObject::from_raw_owned(native.as_raw()) };
    let b = a.query_interface::<ICounter>().unwrap();
    let c = unsafe { ComObject::from_raw_owned(other.as_raw()) };

    assert!(a.is_same_object(&b).unwrap());
    assert!(!a.is_same_object(&c).unwrap());
    assert_eq!(native.count(), 2);
    assert_eq!(other.count(), 1);
}

// =============================================================================
// Test: Handle replacement
// =============================================================================

#[test]
fn test_set_handle_releases_previous() {
    let first = FakeNative::new(1, &[]);
    let second = FakeNative::new(1, &[]);

    let object = ComObject::null();
    unsafe { object.set_handle(first.as_raw(), false) };
    assert_eq!(first.count(), 2);

    unsafe { object.set_handle(second.as_raw(), false) };
    assert_eq!(first.count(), 1);
    assert_eq!(second.count(), 2);
    assert_eq!(object.as_raw(), second.as_raw());

    drop(object);
    assert_eq!(second.count(), 1);
}

#[test]
fn test_set_handle_revives_disposed_proxy() {
    let native = FakeNative::new(1, &[]);
    let object = ComObject::null();
    object.dispose();
    assert!(matches!(object.handle(), Err(Error::UseAfterDispose)));

    unsafe { object.set_handle(native.as_raw(), true) };
    assert!(object.handle().is_ok());
    drop(object);
    assert_eq!(native.count(), 0);
}

#[test]
fn test_default_typed_proxy_has_no_handle() {
    let counter = ICounter::default();
    assert!(matches!(counter.value(), Err(Error::NullHandle)));
}

// =============================================================================
// Test: Typed proxies over shadows (Rust -> native ABI -> Rust)
// =============================================================================

#[test]
fn test_typed_proxy_round_trip() {
    let callback = Callback::new(Counter::new(10));
    let counter = callback.to_interface::<ICounter>().unwrap();

    counter.increment().unwrap();
    counter.increment().unwrap();
    assert_eq!(counter.value().unwrap(), 12);
    assert_eq!(callback.value(), 12);

    let label = u16cstr!("glyphs");
    assert_eq!(counter.label_length(label).unwrap(), 6);
}

#[test]
fn test_typed_proxy_after_dispose() {
    let callback = Callback::new(Counter::new(0));
    let counter = callback.to_interface::<ICounter>().unwrap();
    counter.dispose();

    assert!(matches!(counter.increment(), Err(Error::UseAfterDispose)));
    assert_eq!(callback.container().live_references(), 0);
}

#[test]
fn test_cast_between_interfaces() {
    let callback = Callback::new(Gadget {
        counter: Counter::new(3),
    });
    let counter = callback.to_interface::<ICounter>().unwrap();

    let shape = counter.cast::<IShape>().unwrap();
    assert_eq!(shape.area().unwrap(), 0.0);

    let unknown = counter.cast::<IUnknown>().unwrap();
    assert!(unknown.is_same_object(&shape).unwrap());

    assert!(matches!(
        counter.cast::<ICircle>(),
        Err(Error::InterfaceNotSupported(iid)) if iid == IID_ICIRCLE
    ));
}

#[test]
fn test_derived_proxy_reaches_base_methods() {
    let callback = Callback::new(Circle {
        radius: std::sync::Mutex::new(2.0),
    });
    let circle = callback.to_interface::<ICircle>().unwrap();

    assert_eq!(circle.radius().unwrap(), 2.0);
    circle.scale(1.5).unwrap();
    assert_eq!(circle.radius().unwrap(), 3.0);

    // Deref to IShape
    let area = circle.area().unwrap();
    assert!((area - std::f64::consts::PI * 9.0).abs() < 1e-9);

    let shape: IShape = circle.cast().unwrap();
    assert_eq!(shape.as_raw(), circle.as_raw());
}

#[test]
fn test_interface_parameters() {
    let sink = Callback::new(Sink::default());
    let counter = Callback::new(Counter::new(0));

    let sink_proxy = sink.to_interface::<ISink>().unwrap();
    let counter_proxy = counter.to_interface::<ICounter>().unwrap();

    sink_proxy.notify(Some(counter_proxy.clone())).unwrap();
    sink_proxy.notify(None).unwrap();

    assert_eq!(sink.notified.load(std::sync::atomic::Ordering::SeqCst), 2);
    assert_eq!(counter.value(), 1);

    // The sink's temporary references are gone again
    drop(counter_proxy);
    assert_eq!(counter.container().live_references(), 0);
}

#[test]
fn test_mutable_reference_parameter_sees_native_writes() {
    let sink = Callback::new(Sink::default());
    let sink_proxy = sink.to_interface::<ISink>().unwrap();

    let mut run = GlyphRun {
        glyph_count: 3,
        font_size: 7.5,
        bidi_level: 0,
    };
    sink_proxy.shape_run(&mut run).unwrap();
    sink_proxy.shape_run(&mut run).unwrap();

    assert_eq!(
        run,
        GlyphRun {
            glyph_count: 5,
            font_size: 30.0,
            bidi_level: 1,
        }
    );
}

#[test]
fn test_interface_out_parameter_transfers_ownership() {
    let sink = Callback::new(Sink::default());
    let sink_proxy = sink.to_interface::<ISink>().unwrap();

    let created = sink_proxy.create_counter(41).unwrap();
    created.increment().unwrap();
    assert_eq!(created.value().unwrap(), 42);

    let raw = created.as_raw();
    // Exactly one reference, held by `created`
    unsafe {
        assert_eq!(native_add_ref(raw), 2);
        assert_eq!(native_release(raw), 1);
    }
}
