//! Table assembly and publication.
//!
//! One pass lays out two flat buffers, sized exactly once before any
//! interior address is taken:
//!
//! ```text
//! gmtbl: [ hash table (if any) | per-method slot rows | per-class mtbls ]
//! gdtbl: per multi-virtual method: [ strides (v-1) | dispatch tensor ]
//! ```
//!
//! A class's published mtbl pointer is biased by its `first_used_slot`, so
//! indexing with any slot in the used range lands inside the class's region
//! while the region stores only the suffix the class needs. Dimension-0
//! mtbl cells point directly at the method's tensor column; higher
//! dimensions store raw group indices that the dispatcher scales by the
//! stride row.
//!
//! Assembly is pure: nothing outside the pass is touched until
//! [`DispatchTables::publish`], so a failed update leaves the previous
//! tables intact.

use super::select::best;
use super::{hash, ClassIx, UpdatePass, UpdateStats};
use medley_core::class::ClassDescriptor;
use medley_core::error::UpdateError;
use medley_core::method::{MethodInfo, MtblStrategy, NextCell, RawFn};
use medley_core::word::Word;
use rustc_hash::{FxHashMap, FxHashSet};

// =============================================================================
// Assembled Tables
// =============================================================================

/// Published pointers of one method.
struct MethodPtrs {
    slots: *const Word,
    strides: *const Word,
    dispatch: *const Word,
}

/// The product of one update pass: both global tables plus everything that
/// must be published into descriptors, next cells, and the hash globals.
pub(crate) struct DispatchTables {
    gmtbl: Vec<Word>,
    gdtbl: Vec<Word>,
    hash: Option<hash::HashInfo>,
    /// Per-class mtbl publication (descriptor, biased pointer).
    class_pubs: Vec<(&'static ClassDescriptor, *const Word)>,
    method_pubs: Vec<(&'static MethodInfo, MethodPtrs)>,
    next_pubs: Vec<(&'static NextCell, RawFn)>,
    /// Whether the deallocator slots are stolen for publication.
    steal_dealloc: bool,
}

// Raw pointers reference the tables' own buffers; the struct moves as one
// unit and dispatch reads it only through published pointers.
unsafe impl Send for DispatchTables {}

impl std::fmt::Debug for DispatchTables {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchTables").finish_non_exhaustive()
    }
}

impl DispatchTables {
    /// Descriptor addresses whose deallocator slot this table set occupies.
    pub(crate) fn stolen_addresses(&self) -> FxHashSet<usize> {
        if !self.steal_dealloc {
            return FxHashSet::default();
        }
        self.class_pubs
            .iter()
            .map(|&(desc, _)| desc as *const ClassDescriptor as usize)
            .collect()
    }

    /// Store every published pointer. Runs after the previous tables'
    /// [`retract`](Self::retract); callers fence dispatches around updates.
    pub(crate) fn publish(&self) {
        if self.steal_dealloc {
            for &(desc, mtbl) in &self.class_pubs {
                desc.set_deallocator(mtbl as usize);
            }
        }
        match self.hash {
            Some(info) => crate::dispatch::publish_hash(info, self.gmtbl.as_ptr()),
            None => crate::dispatch::clear_hash(),
        }
        for (info, ptrs) in &self.method_pubs {
            info.publish_tables(ptrs.slots, ptrs.strides, ptrs.dispatch);
        }
        for &(cell, pf) in &self.next_pubs {
            cell.store(pf);
        }
    }

    /// Withdraw every published pointer before the buffers are dropped.
    pub(crate) fn retract(&self) {
        if self.steal_dealloc {
            for &(desc, _) in &self.class_pubs {
                desc.set_deallocator(0);
            }
        }
        if self.hash.is_some() {
            crate::dispatch::clear_hash();
        }
        for (info, _) in &self.method_pubs {
            info.clear_tables();
        }
        for &(cell, _) in &self.next_pubs {
            cell.store(std::ptr::null());
        }
    }
}

// =============================================================================
// Assembler
// =============================================================================

impl UpdatePass {
    /// Build both global tables from the prepared pass state.
    ///
    /// `previously_stolen` holds the descriptor addresses whose deallocator
    /// slot the outgoing tables occupy; a nonzero slot on any other
    /// descriptor belongs to the host program and fails the stolen-slot
    /// strategy.
    pub(crate) fn assemble(
        &self,
        previously_stolen: &FxHashSet<usize>,
    ) -> Result<(DispatchTables, UpdateStats), UpdateError> {
        let steal_dealloc = self
            .methods
            .iter()
            .any(|m| m.info.strategy() == MtblStrategy::Deallocator);
        let use_hash = self
            .methods
            .iter()
            .any(|m| m.info.strategy() == MtblStrategy::Hash);

        // Concrete classes in layered order; those with used slots get an
        // mtbl region.
        let actual: Vec<ClassIx> = self
            .layered
            .iter()
            .copied()
            .filter(|&c| !self.classes[c].desc.is_interface())
            .collect();
        let with_mtbl: Vec<ClassIx> = actual
            .iter()
            .copied()
            .filter(|&c| self.classes[c].first_used_slot >= 0)
            .collect();

        if steal_dealloc {
            for &c in &with_mtbl {
                let desc = self.classes[c].desc;
                let addr = desc as *const ClassDescriptor as usize;
                if desc.deallocator() != 0 && !previously_stolen.contains(&addr) {
                    return Err(UpdateError::DeallocatorInUse { class: desc.name() });
                }
            }
        }

        let hash_info = if use_hash && !actual.is_empty() {
            let tokens: Vec<usize> = actual
                .iter()
                .map(|&c| self.classes[c].desc as *const ClassDescriptor as usize)
                .collect();
            Some(hash::find_hash(&tokens, &self.options)?)
        } else {
            None
        };

        // --- sizing: both buffers reach final size before any address is
        // taken ---
        let hash_words = hash_info.map(|h| h.size).unwrap_or(0);
        let slot_row_words: usize = self.methods.iter().map(|m| m.vp.len()).sum();
        let mtbl_words: usize = with_mtbl
            .iter()
            .map(|&c| {
                (self.classes[c].next_slot - self.classes[c].first_used_slot) as usize
            })
            .sum();
        let mut gmtbl = vec![Word::NULL; hash_words + slot_row_words + mtbl_words];

        let mut gd_offsets: Vec<usize> = Vec::with_capacity(self.methods.len());
        let mut gdtbl_words = 0usize;
        for method in &self.methods {
            gd_offsets.push(gdtbl_words);
            if method.vp.len() >= 2 {
                let tensor: usize = method.groups.iter().map(|g| g.len()).product();
                gdtbl_words += method.vp.len() - 1 + tensor;
            }
        }
        let mut gdtbl = vec![Word::NULL; gdtbl_words];

        // --- layout bookkeeping ---
        let mut cursor = hash_words;
        let mut slot_rows: Vec<usize> = Vec::with_capacity(self.methods.len());
        for method in &self.methods {
            slot_rows.push(cursor);
            for (i, &slot) in method.slots.iter().enumerate() {
                gmtbl[cursor + i] = Word::from_index(slot);
            }
            cursor += method.vp.len();
        }
        let mut mtbl_offsets: FxHashMap<ClassIx, usize> = FxHashMap::default();
        for &c in &with_mtbl {
            mtbl_offsets.insert(c, cursor);
            cursor += (self.classes[c].next_slot - self.classes[c].first_used_slot) as usize;
        }
        debug_assert_eq!(cursor, gmtbl.len());

        // Index of the (class, slot) cell inside gmtbl.
        let cell_index = |c: ClassIx, slot: usize| -> usize {
            mtbl_offsets[&c] + slot - self.classes[c].first_used_slot as usize
        };

        // --- gdtbl content: strides and tensors ---
        for (m, method) in self.methods.iter().enumerate() {
            let v = method.vp.len();
            if v < 2 {
                continue;
            }
            let lens: Vec<usize> = method.groups.iter().map(|g| g.len()).collect();
            let gd_off = gd_offsets[m];
            let mut stride = 1usize;
            for k in 0..v - 1 {
                stride *= lens[k];
                gdtbl[gd_off + k] = Word::from_index(stride);
            }
            let tensor_off = gd_off + v - 1;
            let tensor_len: usize = lens.iter().product();
            let mut digits = vec![0usize; v];
            for linear in 0..tensor_len {
                let mut applicable = method.groups[0][digits[0]].mask.clone();
                for d in 1..v {
                    applicable = applicable.intersect(&method.groups[d][digits[d]].mask);
                }
                let survivors = best(&self.classes, &method.specs, applicable.ones());
                gdtbl[tensor_off + linear] =
                    Word::from_ptr(self.cell_entry(m, &survivors));
                // Mixed-radix increment, dimension 0 fastest.
                for d in 0..v {
                    digits[d] += 1;
                    if digits[d] < lens[d] {
                        break;
                    }
                    digits[d] = 0;
                }
            }
        }
        // gdtbl is complete; its base address is stable from here on.
        let gdtbl_base = gdtbl.as_ptr();

        // --- gmtbl content: per-class cells ---
        for (m, method) in self.methods.iter().enumerate() {
            let v = method.vp.len();
            if v == 1 {
                for group in &method.groups[0] {
                    let survivors = best(&self.classes, &method.specs, group.mask.ones());
                    let entry = Word::from_ptr(self.cell_entry(m, &survivors));
                    for &c in &group.classes {
                        gmtbl[cell_index(c, method.slots[0])] = entry;
                    }
                }
            } else {
                let tensor_off = gd_offsets[m] + v - 1;
                for (gi, group) in method.groups[0].iter().enumerate() {
                    let column = gdtbl_base.wrapping_add(tensor_off + gi);
                    for &c in &group.classes {
                        gmtbl[cell_index(c, method.slots[0])] = Word::from_word_ptr(column);
                    }
                }
                for d in 1..v {
                    for (gi, group) in method.groups[d].iter().enumerate() {
                        for &c in &group.classes {
                            gmtbl[cell_index(c, method.slots[d])] = Word::from_index(gi);
                        }
                    }
                }
            }
        }

        // --- publications ---
        let gmtbl_base = gmtbl.as_ptr();
        let class_pubs: Vec<(&'static ClassDescriptor, *const Word)> = with_mtbl
            .iter()
            .map(|&c| {
                let class = &self.classes[c];
                let biased = gmtbl_base
                    .wrapping_add(mtbl_offsets[&c])
                    .wrapping_sub(class.first_used_slot as usize);
                (class.desc, biased as *const Word)
            })
            .collect();

        if let Some(info) = hash_info {
            let by_ix: FxHashMap<ClassIx, *const Word> = with_mtbl
                .iter()
                .zip(class_pubs.iter())
                .map(|(&c, &(_, ptr))| (c, ptr))
                .collect();
            for &c in &actual {
                let token = self.classes[c].desc as *const ClassDescriptor as usize;
                let bucket = hash::hash_token(info.mult, info.shift, token);
                let mtbl = by_ix.get(&c).copied().unwrap_or(std::ptr::null());
                gmtbl[bucket] = Word::from_word_ptr(mtbl);
            }
        }

        let method_pubs: Vec<(&'static MethodInfo, MethodPtrs)> = self
            .methods
            .iter()
            .enumerate()
            .map(|(m, method)| {
                let v = method.vp.len();
                let ptrs = MethodPtrs {
                    slots: gmtbl_base.wrapping_add(slot_rows[m]),
                    strides: if v >= 2 {
                        gdtbl_base.wrapping_add(gd_offsets[m])
                    } else {
                        std::ptr::null()
                    },
                    dispatch: if v >= 2 {
                        gdtbl_base.wrapping_add(gd_offsets[m] + v - 1)
                    } else {
                        std::ptr::null()
                    },
                };
                (method.info, ptrs)
            })
            .collect();

        let next_pubs = self.link_nexts();

        let stats = UpdateStats {
            classes: self.classes.len(),
            methods: self.methods.len(),
            specializations: self.methods.iter().map(|m| m.specs.len()).sum(),
            groups: self
                .methods
                .iter()
                .map(|m| m.groups.iter().map(|g| g.len()).sum::<usize>())
                .sum(),
            gmtbl_words: gmtbl.len(),
            gdtbl_words: gdtbl.len(),
            hash_table_words: hash_words,
        };

        Ok((
            DispatchTables {
                gmtbl,
                gdtbl,
                hash: hash_info,
                class_pubs,
                method_pubs,
                next_pubs,
                steal_dealloc,
            },
            stats,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{leak_method, leak_spec, pass_for};
    use super::super::{hash, UpdatePass};
    use medley_core::class::ClassDescriptor;
    use medley_core::method::MtblStrategy;
    use rustc_hash::FxHashSet;

    static ANIMAL: ClassDescriptor = ClassDescriptor::class("Animal", &[]);
    static DOG: ClassDescriptor = ClassDescriptor::class("Dog", &[&ANIMAL]);
    static PITBULL: ClassDescriptor = ClassDescriptor::class("Pitbull", &[&DOG]);
    static CAT: ClassDescriptor = ClassDescriptor::class("Cat", &[&ANIMAL]);
    static DOLPHIN: ClassDescriptor = ClassDescriptor::class("Dolphin", &[&ANIMAL]);

    fn erased(f: fn()) -> *const () {
        f as *const ()
    }

    fn bark() {}
    fn ignore() {}
    fn wag() {}
    fn chase() {}

    fn prepared(mut pass: UpdatePass) -> UpdatePass {
        pass.run().unwrap();
        pass
    }

    #[test]
    fn test_single_dispatch_cells() {
        let kick = leak_method("kick", vec![&ANIMAL], MtblStrategy::Deallocator);
        let on_dog = leak_spec(kick, vec![&DOG], erased(bark));
        let pass = prepared(pass_for(
            vec![&ANIMAL, &DOG, &PITBULL, &CAT],
            vec![(kick, vec![on_dog])],
        ));
        let (tables, stats) = pass.assemble(&FxHashSet::default()).unwrap();

        // No hash; one slot-row word; four classes, one slot each.
        assert_eq!(stats.hash_table_words, 0);
        assert_eq!(stats.gmtbl_words, 1 + 4);
        assert_eq!(stats.gdtbl_words, 0);

        // Dog and Pitbull cells hold the specialization; Animal and Cat get
        // the not-implemented thunk.
        let slot = pass.methods[0].slots[0];
        let entry = |desc: &'static ClassDescriptor| -> *const () {
            let (_, mtbl) = tables
                .class_pubs
                .iter()
                .find(|&&(d, _)| std::ptr::eq(d, desc))
                .copied()
                .unwrap();
            unsafe { (*mtbl.wrapping_add(slot)).ptr() }
        };
        assert_eq!(entry(&DOG), erased(bark));
        assert_eq!(entry(&PITBULL), erased(bark));
        assert_eq!(entry(&ANIMAL), kick.not_implemented());
        assert_eq!(entry(&CAT), kick.not_implemented());
    }

    #[test]
    fn test_double_dispatch_tensor() {
        let meet = leak_method("meet", vec![&ANIMAL, &ANIMAL], MtblStrategy::Deallocator);
        let aa = leak_spec(meet, vec![&ANIMAL, &ANIMAL], erased(ignore));
        let dd = leak_spec(meet, vec![&DOG, &DOG], erased(wag));
        let dc = leak_spec(meet, vec![&DOG, &CAT], erased(chase));
        let pass = prepared(pass_for(
            vec![&ANIMAL, &DOG, &PITBULL, &CAT, &DOLPHIN],
            vec![(meet, vec![aa, dd, dc])],
        ));
        let (tables, stats) = pass.assemble(&FxHashSet::default()).unwrap();

        // Dimension 0 tells {Animal,Cat,Dolphin} from {Dog,Pitbull} (both
        // narrow specializations take a Dog first); dimension 1 adds the
        // {Cat} column. Tensor is 2x3 plus one stride word.
        let lens: Vec<usize> = pass.methods[0].groups.iter().map(|g| g.len()).collect();
        assert_eq!(lens, vec![2, 3]);
        assert_eq!(stats.gdtbl_words, 1 + 6);
        assert_eq!(unsafe { tables.gdtbl[0].index() }, 2);

        // Every tensor cell is a specialization entry or an error thunk.
        for cell in &tables.gdtbl[1..] {
            let pf = unsafe { cell.ptr() };
            assert!(
                pf == erased(ignore)
                    || pf == erased(wag)
                    || pf == erased(chase)
                    || pf == meet.not_implemented()
                    || pf == meet.ambiguous()
            );
        }
        // With an (Animal, Animal) catch-all, nothing is unimplemented.
        for cell in &tables.gdtbl[1..] {
            assert_ne!(unsafe { cell.ptr() }, meet.not_implemented());
        }
    }

    #[test]
    fn test_deallocator_conflict_detected() {
        static BUSY: ClassDescriptor = ClassDescriptor::class("Busy", &[]);
        let poke = leak_method("poke", vec![&BUSY], MtblStrategy::Deallocator);
        let pass = prepared(pass_for(vec![], vec![(poke, vec![])]));

        BUSY.set_deallocator(0xbeef);
        let err = pass.assemble(&FxHashSet::default()).unwrap_err();
        BUSY.set_deallocator(0);
        assert_eq!(
            err,
            medley_core::error::UpdateError::DeallocatorInUse { class: "Busy" }
        );
    }

    #[test]
    fn test_reclaimed_slot_is_not_a_conflict() {
        static OURS: ClassDescriptor = ClassDescriptor::class("Ours", &[]);
        let poke = leak_method("poke2", vec![&OURS], MtblStrategy::Deallocator);
        let pass = prepared(pass_for(vec![], vec![(poke, vec![])]));

        // Simulate a slot stolen by the previous pass.
        OURS.set_deallocator(0x1234);
        let mut prev = FxHashSet::default();
        prev.insert(&OURS as *const ClassDescriptor as usize);
        let result = pass.assemble(&prev);
        OURS.set_deallocator(0);
        assert!(result.is_ok());
    }

    #[test]
    fn test_hash_table_maps_every_class() {
        let kick = leak_method("hkick", vec![&ANIMAL], MtblStrategy::Hash);
        let on_dog = leak_spec(kick, vec![&DOG], erased(bark));
        let pass = prepared(pass_for(
            vec![&ANIMAL, &DOG, &PITBULL, &CAT, &DOLPHIN],
            vec![(kick, vec![on_dog])],
        ));
        let (tables, stats) = pass.assemble(&FxHashSet::default()).unwrap();
        let info = tables.hash.unwrap();
        assert!(stats.hash_table_words >= 5);
        assert!(!tables.steal_dealloc);

        for &(desc, mtbl) in &tables.class_pubs {
            let bucket = hash::hash_token(
                info.mult,
                info.shift,
                desc as *const ClassDescriptor as usize,
            );
            let looked_up = unsafe { tables.gmtbl[bucket].word_ptr() };
            assert_eq!(looked_up, mtbl, "hash bucket disagrees for {}", desc.name());
        }
    }

    #[test]
    fn test_empty_pass_produces_empty_tables() {
        let pass = prepared(pass_for(vec![&ANIMAL, &DOG], vec![]));
        let (tables, stats) = pass.assemble(&FxHashSet::default()).unwrap();
        assert_eq!(stats.classes, 0);
        assert!(tables.gmtbl.is_empty());
        assert!(tables.gdtbl.is_empty());
        assert!(tables.class_pubs.is_empty());
        assert!(tables.method_pubs.is_empty());
    }
}
