//! Declarative macros
//!
//! - `shadowed!` - declare the interfaces a Rust type exposes to native code
//! - `registry!` - build a [`RegistryBuilder`](crate::registry::RegistryBuilder)
//!   from a list of interfaces
//!
//! # Example
//! ```ignore
//! struct Renderer;
//!
//! #[com_implement(ITextRenderer)]
//! impl Renderer {
//!     fn draw_glyph_run(&self, x: f32, y: f32) -> Result<()> { Ok(()) }
//! }
//!
//! shadowed!(Renderer: ITextRenderer, IPixelSnapping);
//! ```

/// Implement [`Shadowed`](crate::Shadowed) for a type.
///
/// The first interface listed answers queries for `IUnknown`. Each interface
/// also answers for its ancestors, so list derived interfaces, not their bases.
///
/// # Syntax
/// ```ignore
/// shadowed!(Type: IFirst, ISecond);
/// ```
#[macro_export]
macro_rules! shadowed {
    ($ty:ty : $($iface:path),+ $(,)?) => {
        impl $crate::Shadowed for $ty {
            const INTERFACES: &'static [$crate::ShadowInterface] = &[
                $($crate::ShadowInterface::of::<$ty, $iface>()),+
            ];
        }
    };
}

/// Build a [`RegistryBuilder`](crate::registry::RegistryBuilder) holding the
/// listed interfaces (plus `IUnknown`).
///
/// # Panics
/// If two of them claim the same interface id.
///
/// # Syntax
/// ```ignore
/// let builder = registry![ITextRenderer, IPixelSnapping];
/// shadowbridge::registry::install(builder)?;
/// ```
#[macro_export]
macro_rules! registry {
    ($($iface:path),* $(,)?) => {{
        let mut builder = $crate::registry::RegistryBuilder::new();
        $(builder.register::<$iface>();)*
        builder
    }};
}
