//! The per-call dispatch path.
//!
//! After an update every call reduces to a fixed sequence of indexed loads:
//!
//! - 1-virtual: mtbl of the argument's class, indexed by the method's slot,
//!   holds the entry directly - one table load past the mtbl lookup.
//! - n-virtual: dimension 0's cell points into the method's dispatch tensor;
//!   each further argument contributes its group index times the method's
//!   stride; the final cell holds the entry.
//!
//! The mtbl itself comes from the class descriptor's stolen deallocator
//! slot, or from the perfect-hash table when the method opted into hash
//! resolution. Either way the cost is independent of hierarchy depth and of
//! how many specializations exist.
//!
//! The typed shim that fronts a method transmutes the returned [`RawFn`] to
//! the method's concrete signature and tail-calls it:
//!
//! ```ignore
//! fn kick(animal: &dyn PolyObject) -> String {
//!     unsafe {
//!         let pf = dispatch::resolve1(&KICK, animal.class_descriptor());
//!         let f: fn(&dyn PolyObject) -> String = std::mem::transmute(pf);
//!         f(animal)
//!     }
//! }
//! ```

use crate::update::HashInfo;
use medley_core::class::ClassDescriptor;
use medley_core::method::{MethodInfo, MtblStrategy, RawFn};
use medley_core::word::Word;
use std::sync::atomic::{AtomicPtr, AtomicU32, AtomicU64, Ordering};

// =============================================================================
// Published Hash Parameters
// =============================================================================

static HASH_MULT: AtomicU64 = AtomicU64::new(0);
static HASH_SHIFT: AtomicU32 = AtomicU32::new(0);
static HASH_TABLE: AtomicPtr<Word> = AtomicPtr::new(std::ptr::null_mut());

/// Publish the hash parameters of a freshly built table set.
///
/// The table store is the release edge dispatchers synchronize on.
pub(crate) fn publish_hash(info: HashInfo, table: *const Word) {
    HASH_MULT.store(info.mult, Ordering::Relaxed);
    HASH_SHIFT.store(info.shift, Ordering::Relaxed);
    HASH_TABLE.store(table as *mut Word, Ordering::Release);
}

/// Withdraw the hash parameters (table retraction).
pub(crate) fn clear_hash() {
    HASH_TABLE.store(std::ptr::null_mut(), Ordering::Release);
}

// =============================================================================
// Mtbl Resolution
// =============================================================================

/// The method table of `class`, per the method's resolution strategy.
///
/// Returns the biased mtbl pointer: indexing it with any slot in the
/// class's used range lands inside the class's region.
///
/// # Safety
/// Tables must be published (`update` succeeded since the last registration
/// change) and `class` must participate in dispatch.
#[inline]
pub unsafe fn mtbl_of(method: &MethodInfo, class: &'static ClassDescriptor) -> *const Word {
    match method.strategy() {
        MtblStrategy::Deallocator => class.deallocator() as *const Word,
        MtblStrategy::Hash => {
            let table = HASH_TABLE.load(Ordering::Acquire);
            let mult = HASH_MULT.load(Ordering::Relaxed);
            let shift = HASH_SHIFT.load(Ordering::Relaxed);
            let bucket = (mult.wrapping_mul(class.token().raw() as u64) >> shift) as usize;
            // The published table covers every participating class token.
            unsafe { (*table.wrapping_add(bucket)).word_ptr() }
        }
    }
}

// =============================================================================
// Dispatch
// =============================================================================

/// Select the entry of a 1-virtual method for the given dynamic class.
///
/// # Safety
/// `update` must have succeeded since the last registration change, and
/// `class` must conform to the method's virtual parameter.
#[inline]
pub unsafe fn resolve1(method: &MethodInfo, class: &'static ClassDescriptor) -> RawFn {
    let slots = method.slots_ptr();
    let slot = unsafe { (*slots).index() };
    let mtbl = unsafe { mtbl_of(method, class) };
    unsafe { (*mtbl.wrapping_add(slot)).ptr() }
}

/// Select the entry of a method for the given dynamic classes.
///
/// Accumulates the linearized tensor index through the method's stride row;
/// for a 1-virtual method this degenerates to [`resolve1`].
///
/// # Safety
/// `update` must have succeeded since the last registration change,
/// `classes` must have the method's arity, and each class must conform to
/// the corresponding virtual parameter.
#[inline]
pub unsafe fn resolve(method: &MethodInfo, classes: &[&'static ClassDescriptor]) -> RawFn {
    debug_assert_eq!(classes.len(), method.arity());
    if classes.len() == 1 {
        return unsafe { resolve1(method, classes[0]) };
    }
    let slots = method.slots_ptr();
    let strides = method.strides_ptr();

    let first = unsafe { mtbl_of(method, classes[0]) };
    let slot0 = unsafe { (*slots).index() };
    let mut cell = unsafe { (*first.wrapping_add(slot0)).word_ptr() };
    for k in 1..classes.len() {
        let slot = unsafe { (*slots.add(k)).index() };
        let mtbl = unsafe { mtbl_of(method, classes[k]) };
        let group = unsafe { (*mtbl.wrapping_add(slot)).index() };
        let stride = unsafe { (*strides.add(k - 1)).index() };
        cell = cell.wrapping_add(group * stride);
    }
    unsafe { (*cell).ptr() }
}
