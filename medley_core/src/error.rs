//! Error types for dispatch and table construction.
//!
//! Call-time failures ([`MethodError`]) are routed through the process-wide
//! handler installed in the runtime crate; update-time failures
//! ([`UpdateError`]) abort the update pass and leave the previously
//! published tables in place.

use crate::class::ClassDescriptor;
use crate::method::MethodInfo;

// =============================================================================
// Call-Time Errors
// =============================================================================

/// Why a dispatched call could not select a specialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodErrorKind {
    /// No specialization applies to the dynamic argument tuple.
    NotImplemented,
    /// Several incomparable specializations apply.
    AmbiguousCall,
}

/// A dispatch failure, delivered to the process-wide handler by the
/// method's error thunk.
#[derive(Debug, Clone)]
pub struct MethodError {
    /// Failure kind.
    pub kind: MethodErrorKind,
    /// The method that failed to dispatch.
    pub method: &'static MethodInfo,
    /// Dynamic classes of the virtual arguments, when the thunk had them at
    /// hand; may be empty.
    pub args: Vec<&'static ClassDescriptor>,
}

impl std::fmt::Display for MethodError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let what = match self.kind {
            MethodErrorKind::NotImplemented => "no applicable specialization",
            MethodErrorKind::AmbiguousCall => "ambiguous call",
        };
        write!(f, "method '{}': {}", self.method.name(), what)?;
        if !self.args.is_empty() {
            write!(f, " for (")?;
            for (i, c) in self.args.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", c.name())?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

impl std::error::Error for MethodError {}

// =============================================================================
// Update-Time Errors
// =============================================================================

/// Fatal conditions detected while rebuilding the dispatch tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateError {
    /// A participating class already uses its deallocator slot, so the
    /// stolen-slot strategy cannot publish its mtbl there.
    DeallocatorInUse { class: &'static str },

    /// The perfect-hash search exhausted its attempt budget.
    HashSearchFailed { classes: usize, attempts: usize },

    /// The class lattice contains a cycle; layering cannot proceed.
    LatticeCycle { pending: Vec<&'static str> },
}

impl std::fmt::Display for UpdateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpdateError::DeallocatorInUse { class } => {
                write!(
                    f,
                    "class '{}' already uses its deallocator slot; use the hash strategy",
                    class
                )
            }
            UpdateError::HashSearchFailed { classes, attempts } => {
                write!(
                    f,
                    "no injective hash multiplier found for {} classes after {} attempts",
                    classes, attempts
                )
            }
            UpdateError::LatticeCycle { pending } => {
                write!(f, "class lattice cycle among: {}", pending.join(", "))
            }
        }
    }
}

impl std::error::Error for UpdateError {}
