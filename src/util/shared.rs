//! Slice that several rayon tasks may write into at disjoint indices.

use std::marker::PhantomData;

/// Mutable slice shared between tasks that each own a disjoint set of indices.
///
/// The builder hands every work item the node slot it fills plus the two
/// child slots it allocates with an atomic `fetch_add`; the optimizer applies
/// reinsertions whose touched nodes were exclusively locked beforehand. Both
/// guarantee that no index is accessed by two tasks at once, which the borrow
/// checker cannot see through a single `&mut [T]`.
pub(crate) struct SharedSlice<'a, T> {
    ptr: *mut T,
    len: usize,
    _marker: PhantomData<&'a mut [T]>,
}

// SAFETY: access is only possible through the unsafe methods below, whose
// callers guarantee that concurrent accesses target distinct indices.
unsafe impl<T: Send> Send for SharedSlice<'_, T> {}
unsafe impl<T: Send> Sync for SharedSlice<'_, T> {}

impl<'a, T: Copy> SharedSlice<'a, T> {
    pub fn new(slice: &'a mut [T]) -> Self {
        Self {
            ptr: slice.as_mut_ptr(),
            len: slice.len(),
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// # Safety
    ///
    /// No other task may write `index` concurrently.
    #[inline]
    pub unsafe fn read(&self, index: usize) -> T {
        assert!(index < self.len);
        self.ptr.add(index).read()
    }

    /// # Safety
    ///
    /// No other task may read or write `index` concurrently.
    #[inline]
    pub unsafe fn write(&self, index: usize, value: T) {
        assert!(index < self.len);
        self.ptr.add(index).write(value);
    }
}
