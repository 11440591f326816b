//! Class lattice construction: seeding, scooping, edges, layering, and
//! conforming sets.
//!
//! Seeding interns every class named by a method or specialization
//! parameter. Scooping then admits every program-visible class whose
//! transitive ancestry already participates, which bounds the engine's
//! working set to the participating sublattice. Layering orders the result
//! bases-before-derived with a name-sorted tie-break so slot allocation and
//! group discovery are deterministic across runs.

use super::{Method, Spec, UpdatePass};
use medley_core::class::ClassDescriptor;
use medley_core::error::UpdateError;
use smallvec::SmallVec;

impl UpdatePass {
    /// Intern method and specialization parameter classes and record
    /// (method, virtual-parameter) appearances.
    pub(crate) fn seed(&mut self) {
        let entries = std::mem::take(&mut self.entries);
        for entry in entries {
            let mix = self.methods.len();
            let mut vp: SmallVec<[usize; 2]> = SmallVec::new();
            for (i, &desc) in entry.info.vp().iter().enumerate() {
                let ci = self.intern_class(desc);
                self.classes[ci].method_params.push((mix, i));
                vp.push(ci);
            }
            let arity = vp.len();
            let mut specs = Vec::with_capacity(entry.specs.len());
            for spec in entry.specs {
                debug_assert_eq!(spec.vp().len(), arity);
                let params = spec
                    .vp()
                    .iter()
                    .map(|&desc| self.intern_class(desc))
                    .collect();
                specs.push(Spec { info: spec, params });
            }
            self.methods.push(Method {
                info: entry.info,
                vp,
                specs,
                slots: smallvec::smallvec![usize::MAX; arity],
                groups: Vec::new(),
            });
        }
    }

    /// Admit every visible class whose transitive ancestry participates.
    pub(crate) fn scoop(&mut self) {
        let visible = self.visible.clone();
        for desc in visible {
            self.scoop_class(desc);
        }
    }

    fn scoop_class(&mut self, desc: &'static ClassDescriptor) -> bool {
        if self.class_ix(desc).is_some() {
            return true;
        }
        let mut participates = false;
        for &base in desc.bases() {
            // No short-circuit: every base subtree must be visited so that
            // siblings of a participating base are themselves scooped.
            participates |= self.scoop_class(base);
        }
        if participates {
            self.intern_class(desc);
        }
        participates
    }

    /// Record direct-base edges (and their reverses) between participating
    /// classes.
    pub(crate) fn link_edges(&mut self) {
        for ci in 0..self.classes.len() {
            for &base in self.classes[ci].desc.bases() {
                if let Some(bi) = self.class_ix(base) {
                    self.classes[ci].direct_bases.push(bi);
                    self.classes[bi].direct_derived.push(ci);
                }
            }
        }
    }

    /// Order classes so every class follows all its direct bases.
    ///
    /// Ties within a layer break on class name, which makes slot and group
    /// numbering reproducible regardless of registration order.
    pub(crate) fn layer(&mut self) -> Result<(), UpdateError> {
        let n = self.classes.len();
        let mut emitted = vec![false; n];
        let mut pending: Vec<usize> = (0..n).collect();
        let mut out = Vec::with_capacity(n);

        while !pending.is_empty() {
            let mut ready: Vec<usize> = pending
                .iter()
                .copied()
                .filter(|&c| {
                    self.classes[c]
                        .direct_bases
                        .iter()
                        .all(|&b| emitted[b])
                })
                .collect();
            if ready.is_empty() {
                return Err(UpdateError::LatticeCycle {
                    pending: pending
                        .iter()
                        .map(|&c| self.classes[c].desc.name())
                        .collect(),
                });
            }
            ready.sort_by_key(|&c| self.classes[c].desc.name());
            for &c in &ready {
                emitted[c] = true;
                out.push(c);
            }
            pending.retain(|&c| !emitted[c]);
        }
        self.layered = out;
        Ok(())
    }

    /// Compute each class's conforming set (itself plus all transitive
    /// subclasses), walking the layering in reverse so derived sets are
    /// complete before their bases consume them.
    pub(crate) fn compute_conforming(&mut self) {
        let order: Vec<usize> = self.layered.iter().rev().copied().collect();
        for c in order {
            let mut conforming = rustc_hash::FxHashSet::default();
            conforming.insert(c);
            for i in 0..self.classes[c].direct_derived.len() {
                let d = self.classes[c].direct_derived[i];
                for &x in &self.classes[d].conforming {
                    conforming.insert(x);
                }
            }
            self.classes[c].conforming = conforming;
        }
    }
}
