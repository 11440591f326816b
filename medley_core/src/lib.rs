//! Object-model vocabulary for the Medley open multi-method engine.
//!
//! This crate provides:
//! - Explicit class metadata ([`ClassDescriptor`], [`PolyObject`]) - no
//!   reliance on language RTTI
//! - Method and specialization descriptors ([`MethodInfo`], [`SpecInfo`])
//! - The table storage element ([`Word`])
//! - Error types for dispatch and table construction
//!
//! The dispatch engine itself lives in `medley_runtime`; this crate is the
//! shared vocabulary between the engine and whatever layer fronts it
//! (macro-generated shims, hand-written registration, tests).

#![deny(unsafe_op_in_unsafe_fn)]

pub mod class;
pub mod error;
pub mod method;
pub mod word;

// Re-export commonly used items
pub use class::{ClassDescriptor, ClassToken, DescriptorFlags, PolyObject};
pub use error::{MethodError, MethodErrorKind, UpdateError};
pub use method::{MethodInfo, MtblStrategy, NextCell, RawFn, SpecInfo};
pub use word::Word;
