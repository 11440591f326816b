//! Open multi-method dispatch engine.
//!
//! Free-standing polymorphic functions dispatched on the dynamic types of
//! one or more arguments, at virtual-call cost. The engine compiles the
//! registered methods, specializations, and participating classes into two
//! flat tables:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │ gmtbl  [ hash table | method slot rows | class mtbls ]│
//! │ gdtbl  [ per method: strides | dispatch tensor ]      │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! so that a call is O(v) indexed loads for v virtual parameters,
//! independent of hierarchy depth, specialization count, and table size.
//! Classes with identical applicable-specialization sets share tensor
//! columns, which keeps multi-parameter tables compact.
//!
//! # Example
//!
//! ```ignore
//! use medley_core::{ClassDescriptor, MethodInfo, MtblStrategy};
//! use medley_runtime::{dispatch, registry, update};
//!
//! static ANIMAL: ClassDescriptor = ClassDescriptor::class("Animal", &[]);
//! static DOG: ClassDescriptor = ClassDescriptor::class("Dog", &[&ANIMAL]);
//!
//! // Startup: register classes, methods, and specializations, then build.
//! registry().register_class(&ANIMAL);
//! registry().register_class(&DOG);
//! registry().register_method(kick_info());
//! update::update()?;
//!
//! // Per call: a zero-cost shim around the resolved entry.
//! let pf = unsafe { dispatch::resolve1(kick_info(), DOG_VALUE.class_descriptor()) };
//! ```
//!
//! Dispatch is lock-free and re-entrant after the last successful update;
//! the update pass itself is single-threaded and the caller fences in-flight
//! dispatches around it.

#![deny(unsafe_op_in_unsafe_fn)]

pub mod dispatch;
pub mod registry;
pub mod update;

// Re-exports
pub use dispatch::{mtbl_of, resolve, resolve1};
pub use registry::{
    default_method_error_handler, method_error_handler, registry, report_method_error,
    set_method_error_handler, MethodErrorHandler, MethodRegistry,
};
pub use update::{update, HashOptions, UpdateStats};

// The vocabulary crate, re-exported for shim authors.
pub use medley_core;
