//! Tests for contract violations under the `Log` policy with fault stashing off
//!
//! Configuration is process-wide, so every test installs the same one first.

mod common;

use common::*;
use shadowbridge::config::{self, BridgeConfig, ViolationPolicy};
use shadowbridge::{Callback, E_INVALIDARG, E_UNEXPECTED, Error, take_last_fault};

fn setup() {
    let _ = config::install(BridgeConfig {
        refcount_violation: ViolationPolicy::Log,
        stash_faults: false,
    });
    assert_eq!(config::get().refcount_violation, ViolationPolicy::Log);
}

// =============================================================================
// Test: Reference count underflow
// =============================================================================

#[test]
fn test_release_below_zero_is_ignored() {
    setup();
    let counter = Callback::new(Counter::new(0));
    let proxy = counter.to_interface::<ICounter>().unwrap();
    let raw = proxy.as_raw();
    drop(proxy);

    let shadow = counter.shadow::<ICounter>().unwrap();
    assert_eq!(shadow.ref_count(), 0);

    // One Release too many
    assert_eq!(unsafe { native_release(raw) }, 0);
    assert_eq!(unsafe { native_release(raw) }, 0);
    assert_eq!(shadow.ref_count(), 0);
    assert_eq!(counter.strong_count(), 1);

    // The shadow still works afterwards
    assert_eq!(unsafe { native_add_ref(raw) }, 1);
    assert_eq!(unsafe { native_release(raw) }, 0);
}

// =============================================================================
// Test: Faults without stashing
// =============================================================================

#[test]
fn test_error_is_bare_status_without_stash() {
    setup();
    let renderer = Callback::new(Renderer::with_mode(MODE_ERR));
    let proxy = renderer.to_interface::<ITextRenderer>().unwrap();

    let result = proxy.draw_glyph_run(0.0, 0.0, &GlyphRun::default());
    assert!(matches!(result, Err(Error::Native(hr)) if hr == E_INVALIDARG));
    assert!(take_last_fault().is_none());
}

#[test]
fn test_panic_is_bare_status_without_stash() {
    setup();
    let renderer = Callback::new(Renderer::with_mode(MODE_PANIC));
    let proxy = renderer.to_interface::<ITextRenderer>().unwrap();

    let result = proxy.draw_glyph_run(0.0, 0.0, &GlyphRun::default());
    assert!(matches!(result, Err(Error::Native(hr)) if hr == E_UNEXPECTED));
    assert!(take_last_fault().is_none());
    assert_eq!(renderer.container().live_references(), 1);
}
