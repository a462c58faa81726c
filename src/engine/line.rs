//! Line math: pure translations between byte addresses, cache-line ids,
//! set indices and byte ranges.
//!
//! All operations here are side-effect free. The geometry of a level is
//! captured in a small copyable value so the arithmetic can be used without
//! borrowing the level itself.

/// A half-open byte range `[addr, addr + length)` describing one memory
/// reference. The last covered address is `addr + length - 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddrRange {
    /// First byte address of the reference.
    pub addr: u64,
    /// Number of bytes referenced. Always at least 1.
    pub length: u64,
}

impl AddrRange {
    /// Create a range from a start address and a length in bytes.
    #[inline]
    pub fn new(addr: u64, length: u64) -> Self {
        Self { addr, length }
    }

    /// One past the last covered address.
    #[inline]
    pub fn end(&self) -> u64 {
        self.addr + self.length
    }

    /// The last covered address.
    #[inline]
    pub fn last_addr(&self) -> u64 {
        self.addr + self.length - 1
    }
}

/// Per-level line geometry: line size, its log2, and the set count.
///
/// `cl_size` must be a power of two (validated during assembly); the set
/// count is unrestricted and the set index is taken modulo `sets`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineGeometry {
    sets: usize,
    cl_size: u64,
    cl_bits: u32,
}

impl LineGeometry {
    /// Build the geometry for `sets` sets of `cl_size`-byte lines.
    #[inline]
    pub fn new(sets: usize, cl_size: u64) -> Self {
        Self {
            sets,
            cl_size,
            cl_bits: cl_size.trailing_zeros(),
        }
    }

    /// Bytes per cache line.
    #[inline]
    pub fn cl_size(&self) -> u64 {
        self.cl_size
    }

    /// Number of address bits that select a byte within a line.
    #[inline]
    pub fn cl_bits(&self) -> u32 {
        self.cl_bits
    }

    /// Number of sets.
    #[inline]
    pub fn sets(&self) -> usize {
        self.sets
    }

    /// Id of the line containing `addr`.
    #[inline]
    pub fn cl_id(&self, addr: u64) -> u64 {
        addr >> self.cl_bits
    }

    /// Set index a line maps to.
    #[inline]
    pub fn set_id(&self, cl_id: u64) -> usize {
        (cl_id % self.sets as u64) as usize
    }

    /// Base address of a line.
    #[inline]
    pub fn base_addr(&self, cl_id: u64) -> u64 {
        cl_id << self.cl_bits
    }

    /// The whole-line byte range of `cl_id`.
    #[inline]
    pub fn line_range(&self, cl_id: u64) -> AddrRange {
        AddrRange::new(self.base_addr(cl_id), self.cl_size)
    }

    /// Ids of all lines covered by `range`, first to last inclusive.
    #[inline]
    pub fn covered_lines(&self, range: AddrRange) -> std::ops::RangeInclusive<u64> {
        self.cl_id(range.addr)..=self.cl_id(range.last_addr())
    }

    /// Clip `range` to the portion falling inside line `cl_id`.
    ///
    /// The result is always a subset of (or at most equal to) `range`; its
    /// length is the only correct byte count for downstream stores that
    /// originate from clipped write-throughs.
    pub fn clip_to_line(&self, cl_id: u64, range: AddrRange) -> AddrRange {
        let base = self.base_addr(cl_id);
        let start = range.addr.max(base);
        let end = range.end().min(base + self.cl_size);
        AddrRange::new(start, end - start)
    }
}

/// True iff `x` is a non-zero power of two.
#[inline]
pub fn is_power_of_two(x: u64) -> bool {
    x != 0 && x & (x - 1) == 0
}
