//! The update pass: rebuild every dispatch table from the registry.
//!
//! One pass runs the components in order:
//!
//! 1. **hierarchy** - seed classes from method/specialization parameters,
//!    scoop every visible class whose ancestry participates, link base and
//!    derived edges, layer bases-before-derived, compute conforming sets
//! 2. **slots** - assign each (method, virtual-parameter) pair a slot in the
//!    per-class method tables, reserving it across the conformance-connected
//!    component
//! 3. **groups** - partition each virtual parameter's conforming classes by
//!    applicable-specialization bitmask; groups share dispatch-table columns
//! 4. **hash** - when any method resolves mtbls by hash, search an injective
//!    multiplier over the class tokens
//! 5. **tables** - size the global method table and global dispatch table
//!    exactly once, select the most-specific specialization for every tensor
//!    cell, link next cells, and publish
//!
//! The pass is single-threaded; callers must fence out in-flight dispatches.
//! The previously published tables stay live until a new pass succeeds, so a
//! failed update leaves dispatch in its prior, consistent state.

mod groups;
mod hash;
mod hierarchy;
mod select;
mod slots;
mod tables;

pub use hash::HashOptions;

pub(crate) use groups::SpecMask;
pub(crate) use hash::HashInfo;
pub(crate) use tables::DispatchTables;

use crate::registry::{registry, MethodEntry, RegistrySnapshot};
use medley_core::class::ClassDescriptor;
use medley_core::error::UpdateError;
use medley_core::method::{MethodInfo, SpecInfo};
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

pub(crate) type ClassIx = usize;
pub(crate) type MethodIx = usize;

// =============================================================================
// Internal Graph Nodes (rebuilt on every pass)
// =============================================================================

/// A participating class, for the duration of one pass.
pub(crate) struct Class {
    pub(crate) desc: &'static ClassDescriptor,
    /// Direct bases that themselves participate.
    pub(crate) direct_bases: SmallVec<[ClassIx; 2]>,
    /// Reverse edges of `direct_bases`.
    pub(crate) direct_derived: Vec<ClassIx>,
    /// This class and all transitive subclasses.
    pub(crate) conforming: FxHashSet<ClassIx>,
    /// (method, virtual-parameter index) pairs declared on this class.
    pub(crate) method_params: Vec<(MethodIx, usize)>,
    /// Next free slot in this class's method table.
    pub(crate) next_slot: i32,
    /// First slot this class actually uses; -1 until one is assigned.
    pub(crate) first_used_slot: i32,
}

impl Class {
    fn new(desc: &'static ClassDescriptor) -> Self {
        Self {
            desc,
            direct_bases: SmallVec::new(),
            direct_derived: Vec::new(),
            conforming: FxHashSet::default(),
            method_params: Vec::new(),
            next_slot: 0,
            first_used_slot: -1,
        }
    }
}

/// A specialization, resolved to class indices.
pub(crate) struct Spec {
    pub(crate) info: &'static SpecInfo,
    pub(crate) params: SmallVec<[ClassIx; 2]>,
}

/// One column group: classes sharing an applicability bitmask on one
/// dimension of one method.
pub(crate) struct Group {
    pub(crate) mask: SpecMask,
    pub(crate) classes: Vec<ClassIx>,
}

/// A method, resolved to class indices.
pub(crate) struct Method {
    pub(crate) info: &'static MethodInfo,
    pub(crate) vp: SmallVec<[ClassIx; 2]>,
    pub(crate) specs: Vec<Spec>,
    /// Slot per virtual parameter, assigned by the slot allocator.
    pub(crate) slots: SmallVec<[usize; 2]>,
    /// Column groups per dimension, in deterministic first-encounter order.
    pub(crate) groups: Vec<Vec<Group>>,
}

// =============================================================================
// Update Pass
// =============================================================================

/// Working state of one table rebuild.
pub(crate) struct UpdatePass {
    pub(crate) classes: Vec<Class>,
    /// Descriptor address to class index.
    pub(crate) class_index: FxHashMap<usize, ClassIx>,
    pub(crate) methods: Vec<Method>,
    /// Classes ordered bases-before-derived, name-sorted within a layer.
    pub(crate) layered: Vec<ClassIx>,
    /// Program-visible classes, input to scooping.
    pub(crate) visible: Vec<&'static ClassDescriptor>,
    /// Method entries pending seeding.
    pub(crate) entries: Vec<MethodEntry>,
    pub(crate) options: HashOptions,
}

impl UpdatePass {
    pub(crate) fn new(snapshot: RegistrySnapshot, options: HashOptions) -> Self {
        Self {
            classes: Vec::new(),
            class_index: FxHashMap::default(),
            methods: Vec::new(),
            layered: Vec::new(),
            visible: snapshot.classes,
            entries: snapshot.methods,
            options,
        }
    }

    /// Intern a descriptor as a participating class.
    pub(crate) fn intern_class(&mut self, desc: &'static ClassDescriptor) -> ClassIx {
        let key = desc as *const ClassDescriptor as usize;
        if let Some(&ix) = self.class_index.get(&key) {
            return ix;
        }
        let ix = self.classes.len();
        self.classes.push(Class::new(desc));
        self.class_index.insert(key, ix);
        ix
    }

    /// Look up a descriptor's class index, if it participates.
    pub(crate) fn class_ix(&self, desc: &'static ClassDescriptor) -> Option<ClassIx> {
        self.class_index
            .get(&(desc as *const ClassDescriptor as usize))
            .copied()
    }

    /// Run every phase up to (not including) table assembly.
    pub(crate) fn run(&mut self) -> Result<(), UpdateError> {
        self.seed();
        self.scoop();
        self.link_edges();
        self.layer()?;
        self.compute_conforming();
        self.allocate_slots();
        self.find_groups();
        Ok(())
    }
}

// =============================================================================
// Update Statistics
// =============================================================================

/// Summary of one successful update pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateStats {
    /// Participating classes (after scooping).
    pub classes: usize,
    /// Registered methods.
    pub methods: usize,
    /// Registered specializations.
    pub specializations: usize,
    /// Column groups across all methods and dimensions.
    pub groups: usize,
    /// Words in the global method table.
    pub gmtbl_words: usize,
    /// Words in the global dispatch table.
    pub gdtbl_words: usize,
    /// Words of the perfect-hash table (0 when no method opts in).
    pub hash_table_words: usize,
}

// =============================================================================
// Live Tables and the Update Entry Point
// =============================================================================

/// The currently published tables. Holding the lock for the whole pass
/// serializes concurrent update callers.
static LIVE_TABLES: Mutex<Option<DispatchTables>> = Mutex::new(None);

/// Rebuild and publish all dispatch tables from the current registry state.
///
/// Must run before the first dispatch and after any registration change
/// (`registry().need_update()` reports staleness). On error the previously
/// published tables remain in place.
pub fn update() -> Result<UpdateStats, UpdateError> {
    let mut live = LIVE_TABLES.lock();
    let snapshot = registry().snapshot();
    tracing::debug!(
        classes = snapshot.classes.len(),
        methods = snapshot.methods.len(),
        "dispatch table update started"
    );

    let mut pass = UpdatePass::new(snapshot, HashOptions::default());
    pass.run()?;

    let previously_stolen: FxHashSet<usize> = live
        .as_ref()
        .map(|tables| tables.stolen_addresses())
        .unwrap_or_default();
    let (tables, stats) = pass.assemble(&previously_stolen)?;

    if let Some(old) = live.take() {
        old.retract();
    }
    tables.publish();
    *live = Some(tables);
    registry().clear_need_update();

    tracing::debug!(
        classes = stats.classes,
        groups = stats.groups,
        gmtbl_words = stats.gmtbl_words,
        gdtbl_words = stats.gdtbl_words,
        "dispatch table update complete"
    );
    Ok(stats)
}
