//! Slot allocation across the class lattice.
//!
//! Each (method, virtual-parameter) pair gets an integer slot into the
//! per-class method tables. Walking classes bases-before-derived, a class
//! takes its next free slot and the allocation is then reserved throughout
//! the conformance-connected component, so two classes sharing a descendant
//! never hand the same slot to different methods. Unrelated hierarchies
//! reuse slot numbers freely, which keeps the per-class tables short, and
//! `first_used_slot` lets every class store only the suffix it actually
//! uses.

use super::{ClassIx, UpdatePass};
use rustc_hash::FxHashSet;

impl UpdatePass {
    /// Assign slots for every (method, virtual-parameter) appearance.
    pub(crate) fn allocate_slots(&mut self) {
        let order = self.layered.clone();
        for c in order {
            let params = std::mem::take(&mut self.classes[c].method_params);
            for &(m, i) in &params {
                let slot = self.classes[c].next_slot;
                self.classes[c].next_slot = slot + 1;
                if self.classes[c].first_used_slot < 0 {
                    self.classes[c].first_used_slot = slot;
                }
                self.methods[m].slots[i] = slot as usize;
                self.reserve_in_component(c, slot);
            }
            self.classes[c].method_params = params;
        }
    }

    /// Reserve `slot` throughout the conformance-connected component around
    /// `origin`: descend through derived classes and, from every visited
    /// node, climb through bases, marking visited nodes once.
    fn reserve_in_component(&mut self, origin: ClassIx, slot: i32) {
        let mut visited: FxHashSet<ClassIx> = FxHashSet::default();
        visited.insert(origin);
        let mut stack: Vec<ClassIx> = self.classes[origin].direct_derived.clone();
        while let Some(c) = stack.pop() {
            if !visited.insert(c) {
                continue;
            }
            let class = &mut self.classes[c];
            assert!(
                slot >= class.next_slot,
                "slot reservation went backwards at '{}'",
                class.desc.name()
            );
            class.next_slot = slot + 1;
            if class.first_used_slot < 0 {
                class.first_used_slot = slot;
            }
            stack.extend(class.direct_derived.iter().copied());
            stack.extend(class.direct_bases.iter().copied());
        }
    }
}
