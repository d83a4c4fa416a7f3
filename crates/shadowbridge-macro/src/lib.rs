//! Procedural macros for shadowbridge
//!
//! Provides:
//! - `#[com_interface("guid")]` - Define a COM interface (vtable, proxy, `Impl` trait, shadow thunks)
//! - `#[com_interface("guid", extends(IBase))]` - Same, inheriting from another interface
//! - `#[com_implement(Interface)]` - Implement an interface for a Rust type
//!
//! ## Calling Convention
//!
//! Every generated vtable slot is `extern "system"`: `stdcall` on x86 Windows,
//! the platform C convention everywhere else.
//!
//! ## Method shapes
//!
//! | Declared return | Native slot | Proxy returns |
//! |-----------------|-------------|---------------|
//! | none / `()` | `fn(this, args..)` | `Result<()>` |
//! | `Result<()>` | `fn(this, args..) -> HRESULT` | `Result<()>` |
//! | `Result<T>` | `fn(this, args.., *mut T::Abi) -> HRESULT` | `Result<T>` |
//! | `T` | `fn(this, args..) -> T::Abi` | `Result<T>` |
//!
//! Parameter and return types are projected through `shadowbridge::Param`.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::parse::{Parse, ParseStream};
use syn::visit_mut::VisitMut;
use syn::{
    Attribute, FnArg, GenericArgument, Ident, ImplItem, ItemImpl, ItemTrait, Lifetime, LitStr, Pat,
    Path, PathArguments, ReturnType, Signature, Token, TraitItem, Type, parenthesized,
    parse_macro_input, spanned::Spanned,
};

/// Returns the path to the shadowbridge crate.
fn crate_path() -> TokenStream2 {
    quote! { ::shadowbridge }
}

/// `path::IFoo` -> `path::IFoo{suffix}`
fn sibling_path(path: &Path, suffix: &str) -> Path {
    let mut sibling = path.clone();
    if let Some(last) = sibling.segments.last_mut() {
        last.ident = format_ident!("{}{}", last.ident, suffix);
    }
    sibling
}

/// Gives every elided or `'_` lifetime the `'static` lifetime, so a type can
/// appear in a vtable field or thunk signature.
struct StaticLifetimes;

impl VisitMut for StaticLifetimes {
    fn visit_type_reference_mut(&mut self, reference: &mut syn::TypeReference) {
        if reference.lifetime.is_none() {
            reference.lifetime = Some(Lifetime::new("'static", reference.and_token.span()));
        }
        syn::visit_mut::visit_type_reference_mut(self, reference);
    }

    fn visit_lifetime_mut(&mut self, lifetime: &mut Lifetime) {
        if lifetime.ident == "_" {
            *lifetime = Lifetime::new("'static", lifetime.span());
        }
    }
}

fn static_type(ty: &Type) -> Type {
    let mut ty = ty.clone();
    StaticLifetimes.visit_type_mut(&mut ty);
    ty
}

// =============================================================================
// Attribute arguments
// =============================================================================

/// `"guid"` or `"guid", extends(path::IBase)`
struct InterfaceArgs {
    guid: LitStr,
    base: Option<Path>,
}

impl Parse for InterfaceArgs {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let guid: LitStr = input.parse()?;
        let mut base = None;

        if input.peek(Token![,]) {
            input.parse::<Token![,]>()?;
            if !input.is_empty() {
                let keyword: Ident = input.parse()?;
                if keyword != "extends" {
                    return Err(syn::Error::new(
                        keyword.span(),
                        format!("unknown option '{}', expected extends(Interface)", keyword),
                    ));
                }
                let content;
                parenthesized!(content in input);
                base = Some(content.parse::<Path>()?);
                if input.peek(Token![,]) {
                    input.parse::<Token![,]>()?;
                }
            }
        }

        if !input.is_empty() {
            return Err(input.error("unexpected tokens after interface arguments"));
        }

        Ok(Self { guid, base })
    }
}

// =============================================================================
// Validation helpers for ABI safety
// =============================================================================

/// Check if a type can cross the boundary through `Param`
fn check_abi_type(ty: &Type) -> Result<(), String> {
    match ty {
        Type::Path(type_path) => {
            if let Some(segment) = type_path.path.segments.last() {
                let name = segment.ident.to_string();
                match name.as_str() {
                    "String" => {
                        return Err("String is not FFI-safe. Use &U16CStr instead".into());
                    }
                    "Vec" => {
                        return Err(
                            "Vec<T> is not FFI-safe. Use *const T and a length parameter instead"
                                .into(),
                        );
                    }
                    "Box" => return Err("Box<T> is not FFI-safe. Use *mut T instead".into()),
                    "Rc" | "Arc" => {
                        return Err(format!(
                            "{} is not FFI-safe. Expose the object through Callback instead",
                            name
                        ));
                    }
                    "Result" => {
                        return Err("Result<T> is only allowed as the return type".into());
                    }
                    "str" => return Err("str is not FFI-safe. Use &U16CStr instead".into()),
                    _ => {}
                }
            }
        }
        Type::Reference(type_ref) => match type_ref.elem.as_ref() {
            Type::Slice(_) => {
                return Err(
                    "&[T] is not FFI-safe. Use *const T and a length parameter instead".into(),
                );
            }
            Type::Path(path) if path.path.is_ident("str") => {
                return Err("&str is not FFI-safe. Use &U16CStr instead".into());
            }
            elem => return check_abi_type(elem),
        },
        Type::Slice(_) => {
            return Err(
                "Slices [T] are not FFI-safe. Use *const T and a length parameter instead".into(),
            );
        }
        Type::TraitObject(_) => {
            return Err("Trait objects (dyn Trait) are not FFI-safe".into());
        }
        Type::ImplTrait(_) => {
            return Err("impl Trait is not FFI-safe".into());
        }
        Type::Tuple(tuple) if !tuple.elems.is_empty() => {
            return Err(
                "Non-empty tuples are not FFI-safe. Use a #[repr(C)] struct instead".into(),
            );
        }
        _ => {}
    }
    Ok(())
}

/// Validate a method signature for COM vtable compatibility
fn validate_signature(sig: &Signature) -> Result<(), syn::Error> {
    let method_name = &sig.ident;
    let span = method_name.span();

    // Check for async
    if sig.asyncness.is_some() {
        return Err(syn::Error::new(
            span,
            format!(
                "method '{}': async functions are not supported in COM vtables",
                method_name
            ),
        ));
    }

    // Check for generics
    if !sig.generics.params.is_empty() {
        return Err(syn::Error::new(
            span,
            format!(
                "method '{}': generic methods are not supported in COM vtables",
                method_name
            ),
        ));
    }

    // Check for &self
    let receiver = sig.inputs.iter().find_map(|arg| match arg {
        FnArg::Receiver(receiver) => Some(receiver),
        FnArg::Typed(_) => None,
    });
    let Some(receiver) = receiver else {
        return Err(syn::Error::new(
            span,
            format!(
                "method '{}': must have a &self parameter (COM methods require a this pointer)",
                method_name
            ),
        ));
    };
    if receiver.reference.is_none() || receiver.mutability.is_some() {
        return Err(syn::Error::new(
            receiver.self_token.span(),
            format!(
                "method '{}': only &self is supported, shadows are shared between native callers",
                method_name
            ),
        ));
    }

    // Check parameter types
    for arg in &sig.inputs {
        if let FnArg::Typed(pat_type) = arg {
            if !matches!(pat_type.pat.as_ref(), Pat::Ident(_)) {
                return Err(syn::Error::new(
                    pat_type.pat.span(),
                    format!("method '{}': parameters must be plain identifiers", method_name),
                ));
            }
            if let Err(msg) = check_abi_type(&pat_type.ty) {
                return Err(syn::Error::new(
                    pat_type.ty.span(),
                    format!("method '{}': {}", method_name, msg),
                ));
            }
        }
    }

    // Check return type
    let returned = match classify_return(&sig.output)? {
        ReturnKind::Unit | ReturnKind::Status => None,
        ReturnKind::Out(ty) | ReturnKind::Value(ty) => Some(ty),
    };
    if let Some(ty) = returned
        && let Err(msg) = check_abi_type(&ty)
    {
        return Err(syn::Error::new(
            sig.output.span(),
            format!("method '{}': return type - {}", method_name, msg),
        ));
    }

    Ok(())
}

/// Validate a trait definition for COM vtable compatibility
fn validate_trait(input: &ItemTrait) -> Result<(), syn::Error> {
    if !input.generics.params.is_empty() {
        return Err(syn::Error::new(
            input.generics.span(),
            "generic interfaces are not supported",
        ));
    }
    if !input.supertraits.is_empty() {
        return Err(syn::Error::new(
            input.supertraits.span(),
            "use #[com_interface(\"guid\", extends(IBase))] instead of supertraits",
        ));
    }

    for item in &input.items {
        match item {
            TraitItem::Fn(method) => {
                if method.default.is_some() {
                    return Err(syn::Error::new(
                        method.sig.ident.span(),
                        "interface methods cannot have default bodies",
                    ));
                }
                validate_signature(&method.sig)?;
            }
            other => {
                return Err(syn::Error::new(
                    other.span(),
                    "COM interfaces may only contain methods",
                ));
            }
        }
    }

    Ok(())
}

/// Validate an impl block for COM vtable compatibility
fn validate_impl(input: &ItemImpl) -> Result<(), syn::Error> {
    if let Some((_, path, _)) = &input.trait_ {
        return Err(syn::Error::new(
            path.span(),
            "#[com_implement] expects an inherent impl block",
        ));
    }

    // Check for generics on the impl
    if !input.generics.params.is_empty() {
        return Err(syn::Error::new(
            input.generics.span(),
            "generic impl blocks are not supported",
        ));
    }

    for item in &input.items {
        if let ImplItem::Fn(method) = item {
            validate_signature(&method.sig)?;
        }
    }

    Ok(())
}

// =============================================================================
// Method model
// =============================================================================

/// How a method reports its result across the boundary
#[derive(Debug, Clone)]
enum ReturnKind {
    /// No return value
    Unit,
    /// `Result<()>` -> HRESULT
    Status,
    /// `Result<T>` -> trailing out-parameter + HRESULT
    Out(Type),
    /// `T` returned directly
    Value(Type),
}

/// `Result<T>` -> `Some(T)`
fn result_inner(ty: &Type) -> Result<Option<Type>, syn::Error> {
    let Type::Path(type_path) = ty else {
        return Ok(None);
    };
    let Some(last) = type_path.path.segments.last() else {
        return Ok(None);
    };
    if last.ident != "Result" {
        return Ok(None);
    }

    let types: Vec<&Type> = match &last.arguments {
        PathArguments::AngleBracketed(args) => args
            .args
            .iter()
            .filter_map(|arg| match arg {
                GenericArgument::Type(ty) => Some(ty),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };
    match types.as_slice() {
        [inner] => Ok(Some((*inner).clone())),
        _ => Err(syn::Error::new(
            ty.span(),
            "use shadowbridge::Result<T>; the error type of interface methods is fixed",
        )),
    }
}

fn classify_return(output: &ReturnType) -> Result<ReturnKind, syn::Error> {
    let ty = match output {
        ReturnType::Default => return Ok(ReturnKind::Unit),
        ReturnType::Type(_, ty) => ty.as_ref(),
    };
    if let Type::Tuple(tuple) = ty
        && tuple.elems.is_empty()
    {
        return Ok(ReturnKind::Unit);
    }

    Ok(match result_inner(ty)? {
        Some(Type::Tuple(tuple)) if tuple.elems.is_empty() => ReturnKind::Status,
        Some(inner) => ReturnKind::Out(static_type(&inner)),
        None => ReturnKind::Value(static_type(ty)),
    })
}

struct MethodInfo {
    name: Ident,
    attrs: Vec<Attribute>,
    sig: Signature,
    param_names: Vec<Ident>,
    param_types: Vec<Type>,
    /// Parameter types with `'static` lifetimes, for ABI positions
    abi_types: Vec<Type>,
    ret: ReturnKind,
}

fn collect_methods(input: &ItemTrait) -> Result<Vec<MethodInfo>, syn::Error> {
    let mut methods = Vec::new();

    for item in &input.items {
        if let TraitItem::Fn(method) = item {
            let params: Vec<_> = method
                .sig
                .inputs
                .iter()
                .filter_map(|arg| {
                    if let FnArg::Typed(pat_type) = arg
                        && let Pat::Ident(pat_ident) = pat_type.pat.as_ref()
                    {
                        return Some((pat_ident.ident.clone(), pat_type.ty.as_ref().clone()));
                    }
                    None
                })
                .collect();

            methods.push(MethodInfo {
                name: method.sig.ident.clone(),
                attrs: method.attrs.clone(),
                sig: method.sig.clone(),
                param_names: params.iter().map(|(n, _)| n.clone()).collect(),
                abi_types: params.iter().map(|(_, t)| static_type(t)).collect(),
                param_types: params.into_iter().map(|(_, t)| t).collect(),
                ret: classify_return(&method.sig.output)?,
            });
        }
    }

    Ok(methods)
}

// =============================================================================
// Code generation
// =============================================================================

/// Argument expression handed to the native slot.
///
/// `&mut T` is lowered by value so the pointer keeps the unique borrow's
/// write permission; everything else is lowered from a shared borrow.
fn lower_arg(krate: &TokenStream2, name: &Ident, ty: &Type) -> TokenStream2 {
    match ty {
        Type::Reference(reference) if reference.mutability.is_some() => {
            quote! { #krate::Param::into_abi(#name) }
        }
        _ => quote! { #krate::Param::to_abi(&#name) },
    }
}

fn com_interface_internal(
    args: InterfaceArgs,
    input: ItemTrait,
) -> Result<TokenStream2, syn::Error> {
    validate_trait(&input)?;

    let krate = crate_path();
    let (data1, data2, data3, data4) = parse_guid_string(&args.guid.value())
        .map_err(|e| syn::Error::new(args.guid.span(), e))?;

    let name = &input.ident;
    let name_str = name.to_string();
    let vis = &input.vis;
    let attrs = &input.attrs;
    let vtable_name = format_ident!("{}VTable", name);
    let impl_name = format_ident!("{}Impl", name);
    let iid_name = format_ident!("IID_{}", name_str.to_uppercase());

    // Inherit from IUnknown unless told otherwise. The base vtable is embedded
    // as the first field, so own slots follow the inherited ones.
    let base: Path = args
        .base
        .unwrap_or_else(|| syn::parse_quote!(::shadowbridge::IUnknown));
    let base_vtable = sibling_path(&base, "VTable");
    let base_impl = sibling_path(&base, "Impl");

    let methods = collect_methods(&input)?;
    let own_slots = methods.len();

    let mut vtable_fields = Vec::new();
    let mut proxy_methods = Vec::new();
    let mut impl_methods = Vec::new();
    let mut thunks = Vec::new();
    let mut thunk_slots = Vec::new();

    for method in &methods {
        let method_name = &method.name;
        let thunk_name = format_ident!("__thunk_{}", method_name);
        let qualified = format!("{}::{}", name_str, method_name);
        let method_attrs = &method.attrs;
        let sig = &method.sig;
        let param_names = &method.param_names;
        let param_types = &method.param_types;
        let abi_types = &method.abi_types;
        let abi: Vec<TokenStream2> = abi_types
            .iter()
            .map(|ty| quote! { <#ty as #krate::Param>::Abi })
            .collect();

        // Native slot
        let (out_param, native_ret) = match &method.ret {
            ReturnKind::Unit => (quote! {}, quote! {}),
            ReturnKind::Status => (quote! {}, quote! { -> #krate::HRESULT }),
            ReturnKind::Out(ty) => (
                quote! { , __out: *mut <#ty as #krate::Param>::Abi },
                quote! { -> #krate::HRESULT },
            ),
            ReturnKind::Value(ty) => (quote! {}, quote! { -> <#ty as #krate::Param>::Abi }),
        };
        vtable_fields.push(quote! {
            pub #method_name: unsafe extern "system" fn(
                this: *mut #krate::c_void
                #(, #param_names: #abi)*
                #out_param
            ) #native_ret
        });

        // Proxy method: lower arguments, call through the vtable, lift the result
        let lowered_args: Vec<TokenStream2> = param_names
            .iter()
            .zip(param_types)
            .map(|(name, ty)| lower_arg(&krate, name, ty))
            .collect();
        let lowered = quote! { #(, #lowered_args)* };
        let (proxy_ret, proxy_body) = match &method.ret {
            ReturnKind::Unit => (
                quote! { #krate::Result<()> },
                quote! {
                    unsafe { (__vtable.#method_name)(__this #lowered) };
                    ::core::result::Result::Ok(())
                },
            ),
            ReturnKind::Status => (
                quote! { #krate::Result<()> },
                quote! {
                    let __scope = #krate::hresult::FaultScope::enter();
                    let __hr = unsafe { (__vtable.#method_name)(__this #lowered) };
                    #krate::check(__hr)
                },
            ),
            ReturnKind::Out(ty) => (
                quote! { #krate::Result<#ty> },
                quote! {
                    let mut __out =
                        ::std::mem::MaybeUninit::<<#ty as #krate::Param>::Abi>::zeroed();
                    let __scope = #krate::hresult::FaultScope::enter();
                    let __hr = unsafe { (__vtable.#method_name)(__this #lowered, __out.as_mut_ptr()) };
                    #krate::check(__hr)?;
                    unsafe { <#ty as #krate::Param>::from_abi_owned(__out.assume_init()) }
                },
            ),
            ReturnKind::Value(ty) => (
                quote! { #krate::Result<#ty> },
                quote! {
                    let __ret = unsafe { (__vtable.#method_name)(__this #lowered) };
                    unsafe { <#ty as #krate::Param>::from_abi_owned(__ret) }
                },
            ),
        };
        proxy_methods.push(quote! {
            #(#method_attrs)*
            pub fn #method_name(&self #(, #param_names: #param_types)*) -> #proxy_ret {
                let __this = #krate::ComInterface::as_object(self).handle()?.as_ptr();
                let __vtable = unsafe { &**(__this as *const *const #vtable_name) };
                #proxy_body
            }
        });

        // Rust-side contract
        impl_methods.push(quote! {
            #(#method_attrs)*
            #sig;
        });

        // Shadow thunk: lift arguments, call the Rust method, lower the result
        let lift = quote! {
            #( let #param_names = <#abi_types as #krate::Param>::from_abi(#param_names)?; )*
        };
        let invoke = quote! { <__S as #impl_name>::#method_name(__obj #(, #param_names)*) };
        let thunk = match &method.ret {
            ReturnKind::Unit => quote! {
                pub unsafe extern "system" fn #thunk_name<__S: #impl_name>(
                    this: *mut #krate::c_void
                    #(, #param_names: #abi)*
                ) {
                    unsafe {
                        #krate::shadow::dispatch_value::<__S, ()>(this, #qualified, |__obj| {
                            #lift
                            #invoke;
                            ::core::result::Result::Ok(())
                        })
                    }
                }
            },
            ReturnKind::Status => quote! {
                pub unsafe extern "system" fn #thunk_name<__S: #impl_name>(
                    this: *mut #krate::c_void
                    #(, #param_names: #abi)*
                ) -> #krate::HRESULT {
                    unsafe {
                        #krate::shadow::dispatch::<__S>(this, #qualified, |__obj| {
                            #lift
                            #invoke
                        })
                    }
                }
            },
            ReturnKind::Out(ty) => quote! {
                pub unsafe extern "system" fn #thunk_name<__S: #impl_name>(
                    this: *mut #krate::c_void
                    #(, #param_names: #abi)*
                    , __out: *mut <#ty as #krate::Param>::Abi
                ) -> #krate::HRESULT {
                    if __out.is_null() {
                        return #krate::E_POINTER;
                    }
                    unsafe {
                        #krate::marshal::clear_out(__out);
                        #krate::shadow::dispatch::<__S>(this, #qualified, |__obj| {
                            #lift
                            let __value = #invoke?;
                            #krate::marshal::write_out::<#ty>(__out, __value)
                        })
                    }
                }
            },
            ReturnKind::Value(ty) => quote! {
                pub unsafe extern "system" fn #thunk_name<__S: #impl_name>(
                    this: *mut #krate::c_void
                    #(, #param_names: #abi)*
                ) -> <#ty as #krate::Param>::Abi {
                    let __value = unsafe {
                        #krate::shadow::dispatch_value::<__S, #ty>(this, #qualified, |__obj| {
                            #lift
                            ::core::result::Result::Ok(#invoke)
                        })
                    };
                    #krate::Param::into_abi(__value)
                }
            },
        };
        thunks.push(quote! {
            #[doc(hidden)]
            #thunk
        });
        thunk_slots.push(quote! { #method_name: Self::#thunk_name::<__S> });
    }

    let iid_doc = format!("Interface id of [`{}`]", name_str);
    let impl_doc = format!("Implemented by Rust types exposed to native code as [`{}`].", name_str);

    Ok(quote! {
        #[doc = #iid_doc]
        #vis const #iid_name: #krate::GUID =
            #krate::GUID::new(#data1, #data2, #data3, [#(#data4),*]);

        #[doc = concat!("Vtable of [`", #name_str, "`]")]
        #[repr(C)]
        #vis struct #vtable_name {
            /// Inherited base interface vtable
            pub base: #base_vtable,
            #(#vtable_fields,)*
        }

        #[allow(non_camel_case_types, non_snake_case)]
        impl #vtable_name {
            #(#thunks)*

            /// The slots of a shadow exposing `__S` through this interface.
            #[must_use]
            pub const fn shadow<__S: #impl_name>() -> Self {
                Self {
                    base: #base_vtable::shadow::<__S>(),
                    #(#thunk_slots,)*
                }
            }
        }

        #(#attrs)*
        #[repr(transparent)]
        #[derive(Clone, Debug, Default)]
        #vis struct #name(#krate::ComObject);

        impl #name {
            /// Get the vtable
            pub fn vtable(&self) -> #krate::Result<&#vtable_name> {
                let __this = self.0.handle()?.as_ptr();
                ::core::result::Result::Ok(unsafe { &**(__this as *const *const #vtable_name) })
            }

            #(#proxy_methods)*
        }

        impl ::core::ops::Deref for #name {
            type Target = #base;

            fn deref(&self) -> &#base {
                // Both are transparent wrappers around ComObject
                unsafe { &*(self as *const Self as *const #base) }
            }
        }

        unsafe impl #krate::ComInterface for #name {
            const IID: #krate::GUID = #iid_name;
            const NAME: &'static str = #name_str;
            const BASE_IID: ::core::option::Option<#krate::GUID> =
                ::core::option::Option::Some(<#base as #krate::ComInterface>::IID);

            fn derives_from(iid: &#krate::GUID) -> bool {
                *iid == #iid_name || <#base as #krate::ComInterface>::derives_from(iid)
            }

            fn as_object(&self) -> &#krate::ComObject {
                &self.0
            }

            unsafe fn from_object(object: #krate::ComObject) -> Self {
                Self(object)
            }
        }

        impl #krate::VTableLayout for #name {
            const SLOT_COUNT: usize = <#base as #krate::VTableLayout>::SLOT_COUNT + #own_slots;
            type VTable = #vtable_name;
        }

        const _: () = assert!(
            ::std::mem::size_of::<#vtable_name>()
                == <#name as #krate::VTableLayout>::SLOT_COUNT * ::std::mem::size_of::<usize>()
        );

        impl #krate::Param for #name {
            type Abi = *mut #krate::c_void;

            fn to_abi(&self) -> *mut #krate::c_void {
                self.0.as_raw()
            }

            unsafe fn from_abi(abi: *mut #krate::c_void) -> #krate::Result<Self> {
                unsafe { #krate::marshal::interface_from_abi(abi, false) }
            }

            fn into_abi(self) -> *mut #krate::c_void {
                #krate::marshal::interface_into_abi(self)
            }

            unsafe fn from_abi_owned(abi: *mut #krate::c_void) -> #krate::Result<Self> {
                unsafe { #krate::marshal::interface_from_abi(abi, true) }
            }
        }

        #[doc = #impl_doc]
        #vis trait #impl_name: #base_impl {
            #(#impl_methods)*
        }

        impl<__S: #impl_name> #krate::ShadowVTable<__S> for #name {
            const VTABLE: &'static #vtable_name = &#vtable_name::shadow::<__S>();
        }
    })
}

fn com_implement_internal(interface: Path, mut input: ItemImpl) -> Result<TokenStream2, syn::Error> {
    validate_impl(&input)?;

    // Trait items inherit the trait's visibility
    for item in &mut input.items {
        if let ImplItem::Fn(method) = item {
            method.vis = syn::Visibility::Inherited;
        }
    }
    input.trait_ = Some((None, sibling_path(&interface, "Impl"), Default::default()));

    Ok(quote! { #input })
}

// =============================================================================
// COM Interface Support
// =============================================================================

/// Parse a GUID string in format "xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx"
/// Returns (data1, data2, data3, data4) tuple
fn parse_guid_string(s: &str) -> Result<(u32, u16, u16, [u8; 8]), String> {
    let s = s.trim();
    let s = s
        .strip_prefix('{')
        .and_then(|inner| inner.strip_suffix('}'))
        .unwrap_or(s);
    let parts: Vec<&str> = s.split('-').collect();
    if parts.len() != 5 {
        return Err(format!(
            "Invalid GUID format: expected 'xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx', got '{}'",
            s
        ));
    }
    if parts[0].len() != 8 || parts[1].len() != 4 || parts[2].len() != 4 {
        return Err(format!(
            "Invalid GUID format: expected 'xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx', got '{}'",
            s
        ));
    }

    let data1 = u32::from_str_radix(parts[0], 16)
        .map_err(|_| format!("Invalid GUID data1: '{}'", parts[0]))?;
    let data2 = u16::from_str_radix(parts[1], 16)
        .map_err(|_| format!("Invalid GUID data2: '{}'", parts[1]))?;
    let data3 = u16::from_str_radix(parts[2], 16)
        .map_err(|_| format!("Invalid GUID data3: '{}'", parts[2]))?;

    // parts[3] is 4 hex chars (2 bytes), parts[4] is 12 hex chars (6 bytes)
    if parts[3].len() != 4 {
        return Err(format!(
            "Invalid GUID data4 first part: expected 4 hex chars, got '{}'",
            parts[3]
        ));
    }
    if parts[4].len() != 12 {
        return Err(format!(
            "Invalid GUID data4 second part: expected 12 hex chars, got '{}'",
            parts[4]
        ));
    }

    let tail = format!("{}{}", parts[3], parts[4]);
    let mut data4 = [0u8; 8];
    for (i, byte) in data4.iter_mut().enumerate() {
        let hex = tail
            .get(i * 2..i * 2 + 2)
            .ok_or_else(|| format!("Invalid GUID data4[{}]", i))?;
        *byte = u8::from_str_radix(hex, 16)
            .map_err(|_| format!("Invalid GUID data4[{}]: '{}'", i, hex))?;
    }

    Ok((data1, data2, data3, data4))
}

/// Define a COM interface.
///
/// This generates:
/// - An IID constant `IID_{NAME}` parsed from the GUID string
/// - A vtable struct `{Name}VTable` embedding the base vtable, then one slot per
///   method in declaration order
/// - A typed proxy struct `{Name}` with one method per slot, dereferencing to
///   the base proxy
/// - A trait `{Name}Impl` for Rust types exposed through shadows, and the
///   shadow vtable built from it
///
/// # Example
/// ```ignore
/// #[com_interface("12345678-1234-1234-1234-123456789abc")]
/// pub trait IMyInterface {
///     fn do_something(&self, x: i32) -> Result<()>;
///     fn count(&self) -> u32;
/// }
///
/// #[com_interface("87654321-4321-4321-4321-cba987654321", extends(IMyInterface))]
/// pub trait IMyInterface2 {
///     fn name(&self) -> Result<u64>;
/// }
/// ```
#[proc_macro_attribute]
pub fn com_interface(attr: TokenStream, item: TokenStream) -> TokenStream {
    let args = parse_macro_input!(attr as InterfaceArgs);
    let input = parse_macro_input!(item as ItemTrait);
    match com_interface_internal(args, input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

/// Implement a COM interface for a Rust type.
///
/// Rewrites `impl Type { .. }` into `impl {Interface}Impl for Type { .. }`.
/// Expose the type with `shadowed!` and wrap it in a `Callback`.
///
/// # Example
/// ```ignore
/// struct MyObject;
///
/// #[com_implement(IMyInterface)]
/// impl MyObject {
///     fn do_something(&self, x: i32) -> Result<()> { Ok(()) }
///     fn count(&self) -> u32 { 1 }
/// }
///
/// shadowed!(MyObject: IMyInterface);
/// ```
#[proc_macro_attribute]
pub fn com_implement(attr: TokenStream, item: TokenStream) -> TokenStream {
    let interface = parse_macro_input!(attr as Path);
    let input = parse_macro_input!(item as ItemImpl);
    match com_implement_internal(interface, input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}
