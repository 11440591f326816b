//! Most-specific specialization selection.
//!
//! Specializations are partially ordered: `a` beats `b` when every parameter
//! of `a` equals or conforms to the corresponding parameter of `b` and at
//! least one is strictly narrower. A dispatch cell's applicable set folds
//! down to its best set; a unique survivor is the cell's entry, an empty set
//! means the method is not implemented there, and several incomparable
//! survivors make the cell ambiguous.

use super::{Class, ClassIx, Spec, UpdatePass};
use medley_core::method::RawFn;
use smallvec::SmallVec;

/// Whether specialization parameters `a` are strictly more specific than
/// `b`.
///
/// Walks the parameter tuples: a narrower parameter (one conforming to the
/// other's) votes for `a`; a wider one vetoes immediately; incomparable
/// parameters abstain.
pub(crate) fn is_more_specific(classes: &[Class], a: &[ClassIx], b: &[ClassIx]) -> bool {
    debug_assert_eq!(a.len(), b.len());
    let mut result = false;
    for i in 0..a.len() {
        if a[i] != b[i] {
            if classes[b[i]].conforming.contains(&a[i]) {
                result = true;
            } else if classes[a[i]].conforming.contains(&b[i]) {
                return false;
            }
        }
    }
    result
}

/// Fold `candidates` down to the set of undominated specializations.
pub(crate) fn best(
    classes: &[Class],
    specs: &[Spec],
    candidates: impl Iterator<Item = usize>,
) -> SmallVec<[usize; 2]> {
    let mut survivors: SmallVec<[usize; 2]> = SmallVec::new();
    'next: for s in candidates {
        let mut i = 0;
        while i < survivors.len() {
            if is_more_specific(classes, &specs[s].params, &specs[survivors[i]].params) {
                survivors.remove(i);
            } else if is_more_specific(classes, &specs[survivors[i]].params, &specs[s].params) {
                continue 'next;
            } else {
                i += 1;
            }
        }
        survivors.push(s);
    }
    survivors
}

impl UpdatePass {
    /// The entry a dispatch cell gets for the given best set: the unique
    /// survivor's function, or the method's error thunk.
    pub(crate) fn cell_entry(&self, m: usize, survivors: &[usize]) -> RawFn {
        let method = &self.methods[m];
        match survivors {
            [single] => method.specs[*single].info.pf(),
            [] => method.info.not_implemented(),
            _ => method.info.ambiguous(),
        }
    }

    /// The next-cell value of every specialization: the unique best among
    /// the strictly-less-specific ones, or null.
    ///
    /// Returned rather than stored so publication stays a separate,
    /// infallible step.
    pub(crate) fn link_nexts(&self) -> Vec<(&'static medley_core::method::NextCell, RawFn)> {
        let mut out = Vec::new();
        for method in &self.methods {
            for (si, spec) in method.specs.iter().enumerate() {
                let wider = (0..method.specs.len()).filter(|&t| {
                    t != si
                        && is_more_specific(
                            &self.classes,
                            &spec.params,
                            &method.specs[t].params,
                        )
                });
                let survivors = best(&self.classes, &method.specs, wider);
                let pf: RawFn = match survivors.as_slice() {
                    [single] => method.specs[*single].info.pf(),
                    _ => std::ptr::null(),
                };
                out.push((spec.info.next(), pf));
            }
        }
        out
    }
}
