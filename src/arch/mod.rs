//! Architecture-specific instruction sequences.
//!
//! A kernel implements [`crate::TzVmHal`] by forwarding to the functions of
//! the module matching its target.

#[cfg(target_arch = "arm")]
pub mod armv7;
