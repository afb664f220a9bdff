//! Cache-line-isolated per-group storage.
//!
//! Different groups may be driven from different threads; [`GroupMatrix`] gives each group's
//! row its own cache line so that writes in one group's row never evict another group's row
//! from a shared core's cache (false sharing).

/// Typical x86-64 / AArch64 destructive-interference size. Not probed at runtime — matches
/// the common default used throughout this corpus absent a platform-specific override.
pub const CACHELINE_SIZE: usize = 64;

/// Wraps `T` so that it never shares a cache line with an adjacent value in a `Vec<CacheAligned<T>>`.
#[repr(align(64))]
#[derive(Debug, Clone, Default)]
pub struct CacheAligned<T>(pub T);

impl<T> std::ops::Deref for CacheAligned<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> std::ops::DerefMut for CacheAligned<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.0
    }
}

/// Cache-line-aligned matrix storage: `num_groups` rows of `row_len` elements each, with each
/// row padded up to a multiple of [`CACHELINE_SIZE`] bytes so adjacent groups' rows never
/// share a cache line.
#[derive(Debug, Clone)]
pub struct GroupMatrix<T> {
    storage: Vec<T>,
    row_len: usize,
    stride: usize,
    num_groups: usize,
}

impl<T: Copy + Default> GroupMatrix<T> {
    /// Builds a matrix of `num_groups` rows, each holding `row_len` elements initialized to
    /// `T::default()`.
    pub fn new(row_len: usize, num_groups: usize) -> Self {
        let elem_stride = CACHELINE_SIZE / std::mem::size_of::<T>().max(1);
        let stride = row_len.max(1).div_ceil(elem_stride.max(1)) * elem_stride.max(1);
        let stride = stride.max(row_len);
        Self {
            storage: vec![T::default(); stride * num_groups],
            row_len,
            stride,
            num_groups,
        }
    }

    /// Borrows group `grp`'s row.
    pub fn row(&self, grp: usize) -> &[T] {
        let off = grp * self.stride;
        &self.storage[off..off + self.row_len]
    }

    /// Mutably borrows group `grp`'s row.
    pub fn row_mut(&mut self, grp: usize) -> &mut [T] {
        let off = grp * self.stride;
        &mut self.storage[off..off + self.row_len]
    }

    /// Elements per row.
    pub fn row_len(&self) -> usize {
        self.row_len
    }

    /// Number of rows (groups).
    pub fn num_groups(&self) -> usize {
        self.num_groups
    }
}
