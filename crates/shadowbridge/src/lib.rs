//! COM interop bridge for Rust
//!
//! Two directions:
//! - **Native -> Rust**: [`ComObject`] wraps a native interface pointer and owns
//!   one reference. Typed proxies generated by `#[com_interface]` wrap it and
//!   expose one method per vtable slot.
//! - **Rust -> native**: [`Callback<T>`] exposes a Rust value through
//!   [`Shadow`]s, native-callable COM objects whose vtables are built at compile
//!   time. A [`ShadowContainer`] keeps one shadow per interface.
//!
//! Supporting pieces: [`GUID`] and [`HRESULT`], the process-wide
//! [`registry`] of interface ids, the [`marshal`] helpers and runtime
//! [`config`].
//!
//! ## Example
//! ```ignore
//! use shadowbridge::proc::{com_implement, com_interface};
//! use shadowbridge::{Callback, Result, shadowed};
//!
//! #[com_interface("6ab39a7b-4f26-4d62-9d4c-1a5b2a4e0c11")]
//! pub trait ITextRenderer {
//!     fn draw_glyph_run(&self, x: f32, y: f32, glyphs: u32) -> Result<()>;
//! }
//!
//! struct Renderer;
//!
//! #[com_implement(ITextRenderer)]
//! impl Renderer {
//!     fn draw_glyph_run(&self, x: f32, y: f32, glyphs: u32) -> Result<()> {
//!         Ok(())
//!     }
//! }
//!
//! shadowed!(Renderer: ITextRenderer);
//!
//! let callback = Callback::new(Renderer);
//! let raw = callback.into_raw::<ITextRenderer>()?; // hand to native code
//! ```
//!
//! ## Layout of generated code
//!
//! | Item | Purpose |
//! |------|---------|
//! | `IID_IFOO` | interface id constant |
//! | `IFooVTable` | `#[repr(C)]` vtable, base vtable first |
//! | `IFoo` | typed proxy (`#[repr(transparent)]` over `ComObject`) |
//! | `IFooImpl` | trait a Rust type implements to be exposed as `IFoo` |

pub mod com;
pub mod config;
pub mod container;
pub mod decl;
pub mod error;
pub mod guid;
pub mod hresult;
pub mod marshal;
pub mod object;
pub mod registry;
pub mod shadow;

pub use com::{ComInterface, IID_IUNKNOWN, IUnknown, IUnknownImpl, IUnknownVTable, RefCount, VTableLayout};
pub use container::ShadowContainer;
pub use error::{Error, Result};
pub use guid::GUID;
pub use hresult::{
    E_FAIL, E_INVALIDARG, E_NOINTERFACE, E_NOTIMPL, E_OUTOFMEMORY, E_POINTER, E_UNEXPECTED, HRESULT,
    RO_E_CLOSED, S_FALSE, S_OK, check, take_last_fault,
};
pub use marshal::{Blittable, Param};
pub use object::ComObject;
pub use shadow::{Callback, Shadow, ShadowInterface, ShadowVTable, Shadowed, reclaim};

/// Proc-macros - re-exports from shadowbridge-macro crate
pub mod proc {
    pub use shadowbridge_macro::{com_implement, com_interface};
}

// Re-export common types for macro use
#[doc(hidden)]
pub use std::ffi::c_void;
