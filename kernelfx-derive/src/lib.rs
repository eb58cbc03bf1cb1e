//! Derive macros for the kernelfx compositing kernels.
//!
//! This crate provides one derive macro:
//!
//! - [`KernelParams`] - Generates a `Default` impl and a parameter table for a
//!   kernel's parameter block
//!
//! # Usage
//!
//! The macro is re-exported from the main `kernelfx` crate. You don't need
//! to add this crate directly:
//!
//! ```ignore
//! use kernelfx::prelude::*;
//!
//! #[derive(KernelParams, Clone)]
//! struct Glow {
//!     #[param(label = "Radius", default = 4.0)]
//!     radius: f32,
//!     #[param(label = "Use Mask", default = false)]
//!     use_mask: bool,
//! }
//! ```
//!
//! # The KernelParams Macro
//!
//! `#[derive(KernelParams)]` mirrors the host's `defineParam(field, "Label",
//! default)` declarations. It generates:
//!
//! - `impl Default` using each field's declared default
//! - `impl KernelParams` with a `PARAMS` table of `(field, label)` entries in
//!   declaration order
//!
//! Fields without a `#[param]` attribute fall back to `Default::default()` and
//! use the field name as their label.

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, Data, DeriveInput, Expr, Fields, Ident, LitStr};

/// Derive macro for kernel parameter blocks.
///
/// # Field Attributes
///
/// | Attribute | Purpose |
/// |-----------|---------|
/// | `label = "..."` | Display name shown by the host |
/// | `default = <expr>` | Value used by the generated `Default` impl |
///
/// # Example
///
/// ```ignore
/// #[derive(KernelParams, Clone, Debug)]
/// struct CameraParams {
///     #[param(label = "Focal Length", default = 50.0)]
///     focal: f32,
///     #[param(label = "Camera Matrix", default = Mat4::IDENTITY)]
///     cam_to_world: Mat4,
/// }
///
/// assert_eq!(CameraParams::default().focal, 50.0);
/// assert_eq!(CameraParams::PARAMS[0].label, "Focal Length");
/// ```
///
/// # Generated Code
///
/// For the struct above, the macro generates:
///
/// ```ignore
/// impl Default for CameraParams {
///     fn default() -> Self {
///         Self { focal: 50.0, cam_to_world: Mat4::IDENTITY }
///     }
/// }
///
/// impl ::kernelfx::params::KernelParams for CameraParams {
///     const PARAMS: &'static [::kernelfx::params::ParamInfo] = &[
///         ::kernelfx::params::ParamInfo { field: "focal", label: "Focal Length" },
///         ::kernelfx::params::ParamInfo { field: "cam_to_world", label: "Camera Matrix" },
///     ];
/// }
/// ```
///
/// # Panics
///
/// The macro panics at compile time if:
/// - Applied to an enum or union instead of a struct
/// - Struct uses tuple fields instead of named fields
#[proc_macro_derive(KernelParams, attributes(param))]
pub fn derive_kernel_params(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => panic!("KernelParams derive only supports structs with named fields"),
        },
        _ => panic!("KernelParams derive only supports structs"),
    };

    let mut default_inits: Vec<proc_macro2::TokenStream> = Vec::new();
    let mut param_entries: Vec<proc_macro2::TokenStream> = Vec::new();

    for field in fields.iter() {
        let Some(field_name) = field.ident.as_ref() else {
            continue;
        };
        let field_name_str = field_name.to_string();

        let mut label: Option<LitStr> = None;
        let mut default: Option<Expr> = None;

        for attr in &field.attrs {
            if !attr.path().is_ident("param") {
                continue;
            }
            let parsed = attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("label") {
                    label = Some(meta.value()?.parse()?);
                    Ok(())
                } else if meta.path.is_ident("default") {
                    default = Some(meta.value()?.parse()?);
                    Ok(())
                } else {
                    Err(meta.error("expected `label` or `default`"))
                }
            });
            if let Err(err) = parsed {
                return err.to_compile_error().into();
            }
        }

        default_inits.push(generate_default_init(field_name, default.as_ref()));

        let label = label
            .map(|lit| lit.value())
            .unwrap_or_else(|| field_name_str.clone());
        param_entries.push(generate_param_info(&field_name_str, &label));
    }

    let expanded = quote! {
        impl #impl_generics ::core::default::Default for #name #ty_generics #where_clause {
            fn default() -> Self {
                Self {
                    #(#default_inits),*
                }
            }
        }

        impl #impl_generics ::kernelfx::params::KernelParams for #name #ty_generics #where_clause {
            const PARAMS: &'static [::kernelfx::params::ParamInfo] = &[
                #(#param_entries),*
            ];
        }
    };

    TokenStream::from(expanded)
}

/// Field initialiser for the generated `Default` impl.
fn generate_default_init(field_name: &Ident, default: Option<&Expr>) -> proc_macro2::TokenStream {
    match default {
        Some(expr) => quote! { #field_name: #expr },
        None => quote! { #field_name: ::core::default::Default::default() },
    }
}

/// One `ParamInfo` entry of the generated table.
fn generate_param_info(field: &str, label: &str) -> proc_macro2::TokenStream {
    quote! {
        ::kernelfx::params::ParamInfo { field: #field, label: #label }
    }
}
