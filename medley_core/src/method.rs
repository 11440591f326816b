//! Method and specialization descriptors.
//!
//! A [`MethodInfo`] describes one open method: its virtual-parameter classes,
//! its two error thunks, and the mtbl-resolution strategy it dispatches with.
//! A [`SpecInfo`] describes one specialization of a method: the parameter
//! classes it is applicable to, the function it runs, and the next-cell the
//! engine fills with the next-most-specific entry.
//!
//! Descriptors are created by whatever layer fronts the engine (a macro
//! facility, hand-written shims, tests) and handed to the registry by
//! address; the engine never owns them. The table pointers inside
//! `MethodInfo` and the next cell inside `SpecInfo` are the only mutable
//! state, written exclusively by the update pass with release ordering and
//! read by dispatch with acquire ordering.

use crate::class::ClassDescriptor;
use crate::word::Word;
use std::sync::atomic::{AtomicPtr, Ordering};

/// Type-erased specialization entry (or error thunk).
///
/// The typed shim that fronts a method transmutes this back to the method's
/// concrete `fn` signature before calling.
pub type RawFn = *const ();

// =============================================================================
// Mtbl Resolution Strategy
// =============================================================================

/// How dispatch maps a class to its method table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MtblStrategy {
    /// Read the mtbl pointer from the class descriptor's stolen deallocator
    /// slot. One load; requires the slot to be free on every participating
    /// class.
    Deallocator,
    /// Look the mtbl up through the perfect hash of the class token. Two
    /// loads and a multiply; works even when the host program occupies the
    /// deallocator slot.
    Hash,
}

// =============================================================================
// Method Descriptor
// =============================================================================

/// Descriptor of one open method.
pub struct MethodInfo {
    /// Method name (diagnostics only).
    name: &'static str,
    /// Virtual-parameter classes, in signature order.
    vp: Vec<&'static ClassDescriptor>,
    /// Thunk selected when no specialization applies.
    not_implemented: RawFn,
    /// Thunk selected when several incomparable specializations apply.
    ambiguous: RawFn,
    /// Mtbl resolution strategy for this method's dispatch.
    strategy: MtblStrategy,
    /// Slot row inside the global method table; integer Words, one per
    /// virtual parameter. Written by update.
    slots: AtomicPtr<Word>,
    /// Stride row inside the global dispatch table; arity-1 integer Words.
    /// Null for 1-virtual methods. Written by update.
    strides: AtomicPtr<Word>,
    /// Flattened dispatch tensor inside the global dispatch table. Null for
    /// 1-virtual methods. Written by update.
    dispatch_table: AtomicPtr<Word>,
}

// The thunk pointers are immutable after construction; the table pointers
// are atomics mutated only by the single-threaded update pass.
unsafe impl Send for MethodInfo {}
unsafe impl Sync for MethodInfo {}

impl MethodInfo {
    /// Create a method descriptor.
    ///
    /// `not_implemented` and `ambiguous` must be typed to the method's
    /// signature; dispatch returns them like any specialization entry.
    pub fn new(
        name: &'static str,
        vp: Vec<&'static ClassDescriptor>,
        not_implemented: RawFn,
        ambiguous: RawFn,
        strategy: MtblStrategy,
    ) -> Self {
        debug_assert!(!vp.is_empty(), "open method needs a virtual parameter");
        Self {
            name,
            vp,
            not_implemented,
            ambiguous,
            strategy,
            slots: AtomicPtr::new(std::ptr::null_mut()),
            strides: AtomicPtr::new(std::ptr::null_mut()),
            dispatch_table: AtomicPtr::new(std::ptr::null_mut()),
        }
    }

    /// Method name.
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Virtual-parameter classes.
    #[inline]
    pub fn vp(&self) -> &[&'static ClassDescriptor] {
        &self.vp
    }

    /// Number of virtual parameters.
    #[inline]
    pub fn arity(&self) -> usize {
        self.vp.len()
    }

    /// The not-implemented error thunk.
    #[inline]
    pub fn not_implemented(&self) -> RawFn {
        self.not_implemented
    }

    /// The ambiguous-call error thunk.
    #[inline]
    pub fn ambiguous(&self) -> RawFn {
        self.ambiguous
    }

    /// Mtbl resolution strategy.
    #[inline]
    pub fn strategy(&self) -> MtblStrategy {
        self.strategy
    }

    /// The published slot row, or null before the first update.
    #[inline]
    pub fn slots_ptr(&self) -> *const Word {
        self.slots.load(Ordering::Acquire)
    }

    /// The published stride row, or null for 1-virtual methods.
    #[inline]
    pub fn strides_ptr(&self) -> *const Word {
        self.strides.load(Ordering::Acquire)
    }

    /// The published dispatch tensor, or null for 1-virtual methods.
    #[inline]
    pub fn dispatch_table_ptr(&self) -> *const Word {
        self.dispatch_table.load(Ordering::Acquire)
    }

    /// Publish the table pointers computed by an update pass.
    ///
    /// Engine use. Release stores pair with the acquire loads on the
    /// dispatch path.
    pub fn publish_tables(
        &self,
        slots: *const Word,
        strides: *const Word,
        dispatch_table: *const Word,
    ) {
        self.slots.store(slots as *mut Word, Ordering::Release);
        self.strides.store(strides as *mut Word, Ordering::Release);
        self.dispatch_table
            .store(dispatch_table as *mut Word, Ordering::Release);
    }

    /// Null the published table pointers (unregistration, table retraction).
    pub fn clear_tables(&self) {
        self.publish_tables(std::ptr::null(), std::ptr::null(), std::ptr::null());
    }
}

impl std::fmt::Debug for MethodInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodInfo")
            .field("name", &self.name)
            .field(
                "vp",
                &self.vp.iter().map(|c| c.name()).collect::<Vec<_>>(),
            )
            .field("strategy", &self.strategy)
            .finish()
    }
}

// =============================================================================
// Next Cell
// =============================================================================

/// The cell an override reads to chain to the next-most-specific entry.
///
/// The update pass stores the unique next entry's function pointer, or null
/// when none exists or several are incomparable. Reading the cell and
/// calling through it performs no re-dispatch.
pub struct NextCell(AtomicPtr<()>);

impl NextCell {
    /// Create an empty next cell.
    pub const fn new() -> Self {
        Self(AtomicPtr::new(std::ptr::null_mut()))
    }

    /// The next-most-specific entry, or null.
    #[inline]
    pub fn get(&self) -> RawFn {
        self.0.load(Ordering::Acquire) as RawFn
    }

    /// Store the next entry. Engine use.
    #[inline]
    pub fn store(&self, pf: RawFn) {
        self.0.store(pf as *mut (), Ordering::Release);
    }
}

impl Default for NextCell {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for NextCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NextCell({:p})", self.get())
    }
}

// =============================================================================
// Specialization Descriptor
// =============================================================================

/// Descriptor of one specialization of an open method.
pub struct SpecInfo {
    /// The method this specializes.
    method: &'static MethodInfo,
    /// Parameter classes, parallel to the method's virtual parameters.
    vp: Vec<&'static ClassDescriptor>,
    /// The specialization entry.
    pf: RawFn,
    /// Cell the update pass fills with the next-most-specific entry.
    next: &'static NextCell,
}

unsafe impl Send for SpecInfo {}
unsafe impl Sync for SpecInfo {}

impl SpecInfo {
    /// Create a specialization descriptor.
    pub fn new(
        method: &'static MethodInfo,
        vp: Vec<&'static ClassDescriptor>,
        pf: RawFn,
        next: &'static NextCell,
    ) -> Self {
        debug_assert_eq!(
            vp.len(),
            method.arity(),
            "specialization arity must match the method"
        );
        Self {
            method,
            vp,
            pf,
            next,
        }
    }

    /// The specialized method.
    #[inline]
    pub fn method(&self) -> &'static MethodInfo {
        self.method
    }

    /// Parameter classes.
    #[inline]
    pub fn vp(&self) -> &[&'static ClassDescriptor] {
        &self.vp
    }

    /// The specialization entry.
    #[inline]
    pub fn pf(&self) -> RawFn {
        self.pf
    }

    /// The next cell.
    #[inline]
    pub fn next(&self) -> &'static NextCell {
        self.next
    }
}

impl std::fmt::Debug for SpecInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpecInfo")
            .field("method", &self.method.name())
            .field(
                "vp",
                &self.vp.iter().map(|c| c.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::ClassDescriptor;

    static ANIMAL: ClassDescriptor = ClassDescriptor::class("Animal", &[]);
    static DOG: ClassDescriptor = ClassDescriptor::class("Dog", &[&ANIMAL]);

    fn thunk() {}

    fn erased(f: fn()) -> RawFn {
        f as RawFn
    }

    fn leak_method() -> &'static MethodInfo {
        Box::leak(Box::new(MethodInfo::new(
            "kick",
            vec![&ANIMAL],
            erased(thunk),
            erased(thunk),
            MtblStrategy::Deallocator,
        )))
    }

    #[test]
    fn test_method_info_starts_unpublished() {
        let m = leak_method();
        assert_eq!(m.name(), "kick");
        assert_eq!(m.arity(), 1);
        assert!(m.slots_ptr().is_null());
        assert!(m.strides_ptr().is_null());
        assert!(m.dispatch_table_ptr().is_null());
    }

    #[test]
    fn test_publish_and_clear_tables() {
        let m = leak_method();
        let row = [Word::from_index(3)];
        m.publish_tables(row.as_ptr(), std::ptr::null(), std::ptr::null());
        assert_eq!(m.slots_ptr(), row.as_ptr());
        m.clear_tables();
        assert!(m.slots_ptr().is_null());
    }

    #[test]
    fn test_next_cell_round_trip() {
        static NEXT: NextCell = NextCell::new();
        assert!(NEXT.get().is_null());
        NEXT.store(erased(thunk));
        assert_eq!(NEXT.get(), erased(thunk));
        NEXT.store(std::ptr::null());
        assert!(NEXT.get().is_null());
    }

    #[test]
    fn test_spec_info_accessors() {
        let m = leak_method();
        static NEXT: NextCell = NextCell::new();
        let s = SpecInfo::new(m, vec![&DOG], erased(thunk), &NEXT);
        assert_eq!(s.method().name(), "kick");
        assert_eq!(s.vp()[0].name(), "Dog");
        assert_eq!(s.pf(), erased(thunk));
    }
}
