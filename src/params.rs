//! Kernel parameter blocks.
//!
//! Every kernel takes its parameters as a plain struct deriving
//! [`KernelParams`](kernelfx_derive::KernelParams). The derive provides the
//! defaults the host would show for a freshly created node plus a table of
//! display labels, in declaration order.
//!
//! ```ignore
//! use kernelfx::prelude::*;
//!
//! for info in CameraParams::PARAMS {
//!     println!("{:<20} {}", info.field, info.label);
//! }
//! ```

/// Description of one parameter in a kernel's parameter block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamInfo {
    /// Rust field name.
    pub field: &'static str,
    /// Display name shown by the host.
    pub label: &'static str,
}

/// Trait automatically implemented by `#[derive(KernelParams)]`.
///
/// # Do Not Implement Manually
///
/// The derive keeps `PARAMS` and the generated `Default` impl in sync with the
/// struct's fields.
pub trait KernelParams: Default {
    /// Parameter table in declaration order.
    const PARAMS: &'static [ParamInfo];

    /// Display label for a field, if the field exists.
    fn label_of(field: &str) -> Option<&'static str> {
        Self::PARAMS
            .iter()
            .find(|info| info.field == field)
            .map(|info| info.label)
    }
}
