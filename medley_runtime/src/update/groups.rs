//! Group discovery: the dispatch-table compression unit.
//!
//! For one dimension of one method, two classes are interchangeable when
//! exactly the same specializations apply to them, i.e. they have identical
//! applicability bitmasks. Such classes are gathered into a group and share
//! a column of the dispatch tensor; the tensor's extent per dimension is the
//! group count rather than the conforming-class count, which is what keeps
//! multi-parameter tables compact. Only concrete classes enter groups -
//! interfaces are never the runtime type of a value.

use super::{Group, UpdatePass};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

// =============================================================================
// Specialization Bitmask
// =============================================================================

/// Bitmask over a method's specializations.
///
/// Methods rarely carry more than a few dozen specializations, so one inline
/// word almost always suffices; the mask spills only beyond 64.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Default)]
pub(crate) struct SpecMask {
    bits: SmallVec<[u64; 1]>,
}

impl SpecMask {
    /// Mask sized for `n` specializations, all clear.
    pub(crate) fn for_specs(n: usize) -> Self {
        Self {
            bits: smallvec::smallvec![0; n.div_ceil(64).max(1)],
        }
    }

    /// Set bit `i`.
    pub(crate) fn set(&mut self, i: usize) {
        self.bits[i / 64] |= 1 << (i % 64);
    }

    /// Whether bit `i` is set.
    pub(crate) fn get(&self, i: usize) -> bool {
        self.bits[i / 64] & (1 << (i % 64)) != 0
    }

    /// Intersection of two masks over the same specialization list.
    pub(crate) fn intersect(&self, other: &SpecMask) -> SpecMask {
        debug_assert_eq!(self.bits.len(), other.bits.len());
        Self {
            bits: self
                .bits
                .iter()
                .zip(other.bits.iter())
                .map(|(a, b)| a & b)
                .collect(),
        }
    }

    /// Indices of the set bits, ascending.
    pub(crate) fn ones(&self) -> impl Iterator<Item = usize> + '_ {
        self.bits.iter().enumerate().flat_map(|(w, &bits)| {
            (0..64usize)
                .filter(move |&b| bits & (1u64 << b) != 0)
                .map(move |b| w * 64 + b)
        })
    }
}

// =============================================================================
// Group Finder
// =============================================================================

impl UpdatePass {
    /// Partition every method's conforming classes into groups, per
    /// dimension.
    ///
    /// Classes are visited in layered order, so group numbering (and with it
    /// the tensor column layout) is deterministic.
    pub(crate) fn find_groups(&mut self) {
        for m in 0..self.methods.len() {
            let arity = self.methods[m].vp.len();
            let nspecs = self.methods[m].specs.len();
            let mut dims: Vec<Vec<Group>> = Vec::with_capacity(arity);

            for dim in 0..arity {
                let vp = self.methods[m].vp[dim];
                let mut by_mask: FxHashMap<SpecMask, usize> = FxHashMap::default();
                let mut groups: Vec<Group> = Vec::new();

                for &c in &self.layered {
                    if !self.classes[vp].conforming.contains(&c) {
                        continue;
                    }
                    if self.classes[c].desc.is_interface() {
                        continue;
                    }
                    let mut mask = SpecMask::for_specs(nspecs);
                    for (s, spec) in self.methods[m].specs.iter().enumerate() {
                        let sp = spec.params[dim];
                        if self.classes[sp].conforming.contains(&c) {
                            mask.set(s);
                        }
                    }
                    match by_mask.get(&mask) {
                        Some(&g) => groups[g].classes.push(c),
                        None => {
                            by_mask.insert(mask.clone(), groups.len());
                            groups.push(Group {
                                mask,
                                classes: vec![c],
                            });
                        }
                    }
                }
                dims.push(groups);
            }
            self.methods[m].groups = dims;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{leak_method, leak_spec, pass_for};
    use super::super::UpdatePass;
    use super::SpecMask;
    use medley_core::class::ClassDescriptor;
    use medley_core::method::MtblStrategy;

    #[test]
    fn test_mask_set_get_intersect() {
        let mut a = SpecMask::for_specs(3);
        a.set(0);
        a.set(2);
        assert!(a.get(0) && !a.get(1) && a.get(2));

        let mut b = SpecMask::for_specs(3);
        b.set(2);
        let both = a.intersect(&b);
        assert_eq!(both.ones().collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn test_mask_spills_past_64_specs() {
        let mut m = SpecMask::for_specs(130);
        m.set(0);
        m.set(64);
        m.set(129);
        assert_eq!(m.ones().collect::<Vec<_>>(), vec![0, 64, 129]);
    }

    static ANIMAL: ClassDescriptor = ClassDescriptor::class("Animal", &[]);
    static DOG: ClassDescriptor = ClassDescriptor::class("Dog", &[&ANIMAL]);
    static PITBULL: ClassDescriptor = ClassDescriptor::class("Pitbull", &[&DOG]);
    static CAT: ClassDescriptor = ClassDescriptor::class("Cat", &[&ANIMAL]);
    static DOLPHIN: ClassDescriptor = ClassDescriptor::class("Dolphin", &[&ANIMAL]);

    fn prepared(mut pass: UpdatePass) -> UpdatePass {
        pass.seed();
        pass.scoop();
        pass.link_edges();
        pass.layer().unwrap();
        pass.compute_conforming();
        pass.allocate_slots();
        pass.find_groups();
        pass
    }

    #[test]
    fn test_groups_partition_by_applicability() {
        let kick = leak_method("kick", vec![&ANIMAL], MtblStrategy::Deallocator);
        let on_dog = leak_spec(kick, vec![&DOG], std::ptr::null());
        let pass = prepared(pass_for(
            vec![&ANIMAL, &DOG, &PITBULL, &CAT, &DOLPHIN],
            vec![(kick, vec![on_dog])],
        ));

        let groups = &pass.methods[0].groups[0];
        // Two groups: {Animal, Cat, Dolphin} with empty mask and
        // {Dog, Pitbull} with the Dog specialization applicable.
        assert_eq!(groups.len(), 2);
        let sizes: Vec<usize> = groups.iter().map(|g| g.classes.len()).collect();
        assert_eq!(sizes, vec![3, 2]);
        assert_eq!(groups[0].mask.ones().count(), 0);
        assert_eq!(groups[1].mask.ones().collect::<Vec<_>>(), vec![0]);

        let dog = pass.class_ix(&DOG).unwrap();
        let pitbull = pass.class_ix(&PITBULL).unwrap();
        assert!(groups[1].classes.contains(&dog));
        assert!(groups[1].classes.contains(&pitbull));
    }

    #[test]
    fn test_interfaces_never_join_groups() {
        static SWIMMER: ClassDescriptor = ClassDescriptor::interface("Swimmer", &[]);
        static SEAL: ClassDescriptor = ClassDescriptor::class("Seal", &[&SWIMMER]);
        static OTTER: ClassDescriptor = ClassDescriptor::class("Otter", &[&SWIMMER]);

        let dive = leak_method("dive", vec![&SWIMMER], MtblStrategy::Deallocator);
        let pass = prepared(pass_for(vec![&SEAL, &OTTER], vec![(dive, vec![])]));

        let groups = &pass.methods[0].groups[0];
        let members: Vec<&str> = groups
            .iter()
            .flat_map(|g| g.classes.iter().map(|&c| pass.classes[c].desc.name()))
            .collect();
        assert!(members.contains(&"Seal"));
        assert!(members.contains(&"Otter"));
        assert!(!members.contains(&"Swimmer"));
    }

    #[test]
    fn test_group_order_is_deterministic() {
        let kick = leak_method("kick", vec![&ANIMAL], MtblStrategy::Deallocator);
        let on_dog = leak_spec(kick, vec![&DOG], std::ptr::null());
        let make = |visible: Vec<&'static ClassDescriptor>| {
            let p = prepared(pass_for(visible, vec![(kick, vec![on_dog])]));
            p.methods[0].groups[0]
                .iter()
                .map(|g| {
                    g.classes
                        .iter()
                        .map(|&c| p.classes[c].desc.name())
                        .collect::<Vec<_>>()
                })
                .collect::<Vec<_>>()
        };
        // Registration order must not affect the group layout.
        let a = make(vec![&ANIMAL, &DOG, &PITBULL, &CAT, &DOLPHIN]);
        let b = make(vec![&DOLPHIN, &CAT, &PITBULL, &DOG, &ANIMAL]);
        assert_eq!(a, b);
    }
}
