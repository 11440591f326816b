//! Word: the storage element of the global dispatch tables.
//!
//! Both the global method table (per-class mtbls plus per-method slot rows)
//! and the global dispatch table (per-method stride rows plus flattened
//! dispatch tensors) are flat arrays of `Word`. A cell holds exactly one of:
//!
//! - a raw function pointer (`p`) - a specialization entry or error thunk,
//! - a pointer to another `Word` (`pw`) - a dimension-0 cell pointing into a
//!   method's dispatch tensor,
//! - an integer (`i`) - a slot index, a stride, or a group index.
//!
//! Which variant a cell holds is fixed by its position in the table layout;
//! the reader always knows statically which accessor applies.

/// One pointer-sized cell of the global method/dispatch tables.
#[derive(Clone, Copy)]
pub union Word {
    /// Raw function pointer (specialization entry or error thunk).
    p: *const (),
    /// Pointer into a method's dispatch tensor.
    pw: *const Word,
    /// Slot index, stride, or group index.
    i: usize,
}

// Words are plain pointer-sized payloads; the tables they live in are
// immutable between updates and the update pass is single-threaded.
unsafe impl Send for Word {}
unsafe impl Sync for Word {}

impl Word {
    /// The all-zero cell (null pointer / index 0).
    pub const NULL: Word = Word { i: 0 };

    /// Create a cell holding an integer.
    #[inline]
    pub const fn from_index(i: usize) -> Self {
        Word { i }
    }

    /// Create a cell holding a raw function pointer.
    #[inline]
    pub const fn from_ptr(p: *const ()) -> Self {
        Word { p }
    }

    /// Create a cell pointing at another table cell.
    #[inline]
    pub const fn from_word_ptr(pw: *const Word) -> Self {
        Word { pw }
    }

    /// Read the cell as an integer.
    ///
    /// # Safety
    /// The cell's position in the table layout must designate an integer.
    #[inline]
    pub unsafe fn index(self) -> usize {
        unsafe { self.i }
    }

    /// Read the cell as a raw function pointer.
    ///
    /// # Safety
    /// The cell's position in the table layout must designate a function
    /// pointer.
    #[inline]
    pub unsafe fn ptr(self) -> *const () {
        unsafe { self.p }
    }

    /// Read the cell as a pointer to another cell.
    ///
    /// # Safety
    /// The cell's position in the table layout must designate a table
    /// pointer.
    #[inline]
    pub unsafe fn word_ptr(self) -> *const Word {
        unsafe { self.pw }
    }
}

impl std::fmt::Debug for Word {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // All variants share one representation; print the raw bits.
        write!(f, "Word({:#x})", unsafe { self.i })
    }
}
