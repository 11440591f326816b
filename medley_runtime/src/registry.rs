//! Process-wide registration of methods, specializations, and classes.
//!
//! The registry only records addresses supplied by the registering units; it
//! owns no descriptors. Every mutation sets the dirty flag, and the update
//! pass consumes a snapshot of the current state. Registration normally
//! happens during program startup, before the first update; the mutex makes
//! stray late registrations safe, not fast.
//!
//! The process-wide method-error handler also lives here: a single atomic
//! function pointer, replaceable at any time, consulted by the error thunks
//! of every method.

use medley_core::class::ClassDescriptor;
use medley_core::error::MethodError;
use medley_core::method::{MethodInfo, SpecInfo};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};
use std::sync::OnceLock;

// =============================================================================
// Snapshot
// =============================================================================

/// One method with its registered specializations, in registration order.
pub struct MethodEntry {
    pub info: &'static MethodInfo,
    pub specs: Vec<&'static SpecInfo>,
}

/// A copy of the registry state consumed by one update pass.
pub struct RegistrySnapshot {
    /// Program-visible class descriptors, in registration order.
    pub classes: Vec<&'static ClassDescriptor>,
    /// Registered methods with their specializations.
    pub methods: Vec<MethodEntry>,
}

// =============================================================================
// Registry
// =============================================================================

#[derive(Default)]
struct RegistryState {
    methods: Vec<&'static MethodInfo>,
    /// Specializations per method, keyed by the method descriptor's address.
    specs: FxHashMap<usize, Vec<&'static SpecInfo>>,
    classes: Vec<&'static ClassDescriptor>,
}

/// Process-wide method registry.
pub struct MethodRegistry {
    state: Mutex<RegistryState>,
    need_update: AtomicBool,
}

impl MethodRegistry {
    fn new() -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            need_update: AtomicBool::new(false),
        }
    }

    /// Register a class descriptor as visible in the program.
    ///
    /// Classes that do not participate in any method are dropped again by
    /// the update pass's scooping step.
    pub fn register_class(&self, class: &'static ClassDescriptor) {
        let mut state = self.state.lock();
        if !state
            .classes
            .iter()
            .any(|c| std::ptr::eq(*c, class))
        {
            state.classes.push(class);
        }
        self.mark_dirty();
    }

    /// Remove a class descriptor.
    pub fn unregister_class(&self, class: &'static ClassDescriptor) {
        let mut state = self.state.lock();
        state.classes.retain(|c| !std::ptr::eq(*c, class));
        self.mark_dirty();
    }

    /// Register a method descriptor.
    pub fn register_method(&self, info: &'static MethodInfo) {
        let mut state = self.state.lock();
        if !state.methods.iter().any(|m| std::ptr::eq(*m, info)) {
            state.methods.push(info);
        }
        self.mark_dirty();
    }

    /// Remove a method descriptor together with its specializations.
    ///
    /// The method's published table pointers are nulled so no interior
    /// pointer into retired tables survives the descriptor's registration.
    pub fn unregister_method(&self, info: &'static MethodInfo) {
        let mut state = self.state.lock();
        state.methods.retain(|m| !std::ptr::eq(*m, info));
        if let Some(specs) = state.specs.remove(&(info as *const MethodInfo as usize)) {
            for spec in specs {
                spec.next().store(std::ptr::null());
            }
        }
        info.clear_tables();
        self.mark_dirty();
    }

    /// Register a specialization under its method.
    pub fn register_spec(&self, spec: &'static SpecInfo) {
        let mut state = self.state.lock();
        let key = spec.method() as *const MethodInfo as usize;
        let specs = state.specs.entry(key).or_default();
        if !specs.iter().any(|s| std::ptr::eq(*s, spec)) {
            specs.push(spec);
        }
        self.mark_dirty();
    }

    /// Remove a specialization and null its next cell.
    pub fn unregister_spec(&self, spec: &'static SpecInfo) {
        let mut state = self.state.lock();
        let key = spec.method() as *const MethodInfo as usize;
        if let Some(specs) = state.specs.get_mut(&key) {
            specs.retain(|s| !std::ptr::eq(*s, spec));
        }
        spec.next().store(std::ptr::null());
        self.mark_dirty();
    }

    /// Whether the tables are stale relative to the registrations.
    #[inline]
    pub fn need_update(&self) -> bool {
        self.need_update.load(Ordering::Acquire)
    }

    pub(crate) fn clear_need_update(&self) {
        self.need_update.store(false, Ordering::Release);
    }

    fn mark_dirty(&self) {
        self.need_update.store(true, Ordering::Release);
    }

    /// Copy the current state for an update pass.
    pub(crate) fn snapshot(&self) -> RegistrySnapshot {
        let state = self.state.lock();
        let methods = state
            .methods
            .iter()
            .map(|&info| MethodEntry {
                info,
                specs: state
                    .specs
                    .get(&(info as *const MethodInfo as usize))
                    .cloned()
                    .unwrap_or_default(),
            })
            .collect();
        RegistrySnapshot {
            classes: state.classes.clone(),
            methods,
        }
    }
}

// =============================================================================
// Global Registry Access
// =============================================================================

static REGISTRY: OnceLock<MethodRegistry> = OnceLock::new();

/// Get the process-wide method registry.
pub fn registry() -> &'static MethodRegistry {
    REGISTRY.get_or_init(MethodRegistry::new)
}

// =============================================================================
// Method-Error Handler
// =============================================================================

/// Handler invoked by a method's error thunk on a failed dispatch.
pub type MethodErrorHandler = fn(&MethodError);

/// Current handler; null means the default (print and abort).
static ERROR_HANDLER: AtomicPtr<()> = AtomicPtr::new(std::ptr::null_mut());

/// The default handler: print the failure and abort the process.
pub fn default_method_error_handler(error: &MethodError) {
    eprintln!("medley: {}", error);
    std::process::abort();
}

/// Replace the process-wide method-error handler; returns the previous one.
pub fn set_method_error_handler(handler: MethodErrorHandler) -> MethodErrorHandler {
    let prev = ERROR_HANDLER.swap(handler as *mut (), Ordering::AcqRel);
    if prev.is_null() {
        default_method_error_handler
    } else {
        // A non-null slot always holds a MethodErrorHandler stored above.
        unsafe { std::mem::transmute::<*mut (), MethodErrorHandler>(prev) }
    }
}

/// The currently installed handler.
pub fn method_error_handler() -> MethodErrorHandler {
    let current = ERROR_HANDLER.load(Ordering::Acquire);
    if current.is_null() {
        default_method_error_handler
    } else {
        unsafe { std::mem::transmute::<*mut (), MethodErrorHandler>(current) }
    }
}

/// Deliver a dispatch failure to the installed handler.
///
/// Error thunks call this, then return a zero value (or nothing) if the
/// handler returns.
pub fn report_method_error(error: &MethodError) {
    method_error_handler()(error);
}
