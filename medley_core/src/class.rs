//! Explicit class metadata for open-method dispatch.
//!
//! The engine does not rely on language RTTI. Every class that participates
//! in dispatch (appears as a virtual parameter, a specialization parameter,
//! or derives from one that does) declares one [`ClassDescriptor`], usually a
//! `static`, and registers it at startup. The descriptor records:
//!
//! - the class name (diagnostics and deterministic layering tie-breaks),
//! - the direct bases, classes and interfaces alike,
//! - a pointer-sized *deallocator* slot mirroring the host object model's
//!   per-class deallocator field. Most classes never use it, so the engine
//!   may steal it to publish the class's method table.
//!
//! The descriptor's address doubles as the class's identity token (the
//! vtable-pointer analog) and is what the perfect-hash strategy hashes.

use std::sync::atomic::{AtomicUsize, Ordering};

// =============================================================================
// Descriptor Flags
// =============================================================================

bitflags::bitflags! {
    /// Static attributes of a class descriptor.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DescriptorFlags: u32 {
        /// The descriptor names an interface: a conformance source that is
        /// never the runtime type of a value and never owns an mtbl.
        const INTERFACE = 1 << 0;
    }
}

// =============================================================================
// Class Identity Token
// =============================================================================

/// Identity token of a participating class - the descriptor's address.
///
/// Tokens are what the perfect-hash mtbl strategy hashes, standing in for
/// the vtable pointer of object models that have one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassToken(usize);

impl ClassToken {
    /// Raw token bits.
    #[inline]
    pub const fn raw(self) -> usize {
        self.0
    }
}

// =============================================================================
// Class Descriptor
// =============================================================================

/// Per-class metadata, one `static` per participating class.
///
/// Descriptors are immutable apart from the deallocator slot, which is
/// written by the host program (when the class genuinely has a deallocator)
/// or by the engine's update pass (when stolen to publish the mtbl).
pub struct ClassDescriptor {
    /// Class name (diagnostics, deterministic ordering).
    name: &'static str,
    /// Static attributes.
    flags: DescriptorFlags,
    /// Direct bases, classes and interfaces in declaration order.
    bases: &'static [&'static ClassDescriptor],
    /// The host object model's per-class deallocator slot; zero when unused.
    deallocator: AtomicUsize,
}

impl ClassDescriptor {
    /// Create a descriptor with explicit flags.
    pub const fn new(
        name: &'static str,
        flags: DescriptorFlags,
        bases: &'static [&'static ClassDescriptor],
    ) -> Self {
        Self {
            name,
            flags,
            bases,
            deallocator: AtomicUsize::new(0),
        }
    }

    /// Create a concrete class descriptor.
    pub const fn class(
        name: &'static str,
        bases: &'static [&'static ClassDescriptor],
    ) -> Self {
        Self::new(name, DescriptorFlags::empty(), bases)
    }

    /// Create an interface descriptor.
    pub const fn interface(
        name: &'static str,
        bases: &'static [&'static ClassDescriptor],
    ) -> Self {
        Self::new(name, DescriptorFlags::INTERFACE, bases)
    }

    /// Class name.
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether this descriptor names an interface.
    #[inline]
    pub fn is_interface(&self) -> bool {
        self.flags.contains(DescriptorFlags::INTERFACE)
    }

    /// Direct bases (classes and interfaces).
    #[inline]
    pub fn bases(&self) -> &'static [&'static ClassDescriptor] {
        self.bases
    }

    /// Identity token (the descriptor's address).
    #[inline]
    pub fn token(&'static self) -> ClassToken {
        ClassToken(self as *const ClassDescriptor as usize)
    }

    /// Read the deallocator slot.
    #[inline]
    pub fn deallocator(&self) -> usize {
        self.deallocator.load(Ordering::Acquire)
    }

    /// Write the deallocator slot.
    ///
    /// Called by the host program when the class has a real deallocator, and
    /// by the engine when the slot is stolen to publish the class's mtbl.
    #[inline]
    pub fn set_deallocator(&self, value: usize) {
        self.deallocator.store(value, Ordering::Release);
    }
}

impl std::fmt::Debug for ClassDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassDescriptor")
            .field("name", &self.name)
            .field("flags", &self.flags)
            .field(
                "bases",
                &self.bases.iter().map(|b| b.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

// =============================================================================
// Object Trait
// =============================================================================

/// Trait for values that participate in open-method dispatch.
///
/// A dispatchable object exposes its concrete class descriptor. For
/// interface-typed references this is the offset fixup of the host object
/// model: the call goes through the trait-object vtable and always lands on
/// the concrete class's implementation, so the engine sees the dynamic type
/// even when the static type is an interface.
pub trait PolyObject {
    /// The concrete (dynamic) class of this value.
    fn class_descriptor(&self) -> &'static ClassDescriptor;
}

#[cfg(test)]
mod tests {
    use super::*;

    static BASE: ClassDescriptor = ClassDescriptor::class("Base", &[]);
    static IFACE: ClassDescriptor = ClassDescriptor::interface("Iface", &[]);
    static DERIVED: ClassDescriptor = ClassDescriptor::class("Derived", &[&BASE, &IFACE]);

    #[test]
    fn test_descriptor_basics() {
        assert_eq!(BASE.name(), "Base");
        assert!(!BASE.is_interface());
        assert!(IFACE.is_interface());
        assert_eq!(DERIVED.bases().len(), 2);
        assert_eq!(DERIVED.bases()[0].name(), "Base");
    }

    #[test]
    fn test_tokens_are_distinct() {
        assert_ne!(BASE.token(), DERIVED.token());
        assert_ne!(BASE.token(), IFACE.token());
        assert_eq!(BASE.token(), BASE.token());
    }

    #[test]
    fn test_deallocator_slot() {
        static SCRATCH: ClassDescriptor = ClassDescriptor::class("Scratch", &[]);
        assert_eq!(SCRATCH.deallocator(), 0);
        SCRATCH.set_deallocator(0x1000);
        assert_eq!(SCRATCH.deallocator(), 0x1000);
        SCRATCH.set_deallocator(0);
        assert_eq!(SCRATCH.deallocator(), 0);
    }

    #[test]
    fn test_poly_object_reports_concrete_class() {
        struct Thing;
        impl PolyObject for Thing {
            fn class_descriptor(&self) -> &'static ClassDescriptor {
                &DERIVED
            }
        }
        let t = Thing;
        let dyn_ref: &dyn PolyObject = &t;
        assert_eq!(dyn_ref.class_descriptor().name(), "Derived");
    }
}
