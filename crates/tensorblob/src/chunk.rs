//! Splitting a flat element range into bounded chunks.

/// Separator between a blob name and its chunk index in record keys.
pub const CHUNK_ID_SEPARATOR: &str = "#%";

/// Requested chunking for one serialize call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChunkSize {
    /// Never split: the whole tensor is one chunk.
    NoChunking,
    /// Use the configured default chunk size.
    #[default]
    Default,
    /// At most this many elements per chunk. Zero behaves like [`ChunkSize::Default`].
    Elements(usize),
}

impl ChunkSize {
    /// Resolves the request to a concrete number of elements per chunk.
    pub fn resolve(&self, numel: usize, default_chunk_size: usize) -> usize {
        let size = match self {
            ChunkSize::NoChunking => numel.saturating_add(1),
            ChunkSize::Default | ChunkSize::Elements(0) => default_chunk_size,
            ChunkSize::Elements(n) => *n,
        };
        size.max(1)
    }
}

/// One planned chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    /// Position of the chunk: `begin / chunk_size`.
    pub index: usize,
    /// First element of the chunk.
    pub begin: usize,
    /// One past the last element of the chunk.
    pub end: usize,
}

impl ChunkRange {
    /// Returns the number of planned elements.
    pub fn len(&self) -> usize {
        self.end - self.begin
    }

    /// Returns true if the chunk plans no elements.
    pub fn is_empty(&self) -> bool {
        self.end == self.begin
    }

    /// Clamps the chunk to a tensor of `numel` elements.
    ///
    /// The chunk of an empty tensor is planned as `[0, 1)` and clamps to `[0, 0)`.
    pub fn clamp(&self, numel: usize) -> (usize, usize) {
        (self.begin.min(numel), self.end.min(numel))
    }
}

/// Ordered, contiguous chunks covering `[0, max(numel, 1))`.
///
/// A zero-element tensor still gets one chunk so that its shape is recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPlan {
    numel: usize,
    chunk_size: usize,
    ranges: Vec<ChunkRange>,
}

impl ChunkPlan {
    /// Plans the chunks for a tensor of `numel` elements.
    ///
    /// # Arguments
    ///
    /// * `numel` - Number of elements in the tensor.
    /// * `chunk_size` - The requested chunking.
    /// * `default_chunk_size` - Substituted for [`ChunkSize::Default`].
    ///
    /// # Example
    ///
    /// ```
    /// use tensorblob::chunk::{ChunkPlan, ChunkSize};
    ///
    /// let plan = ChunkPlan::new(10, ChunkSize::Elements(4), 1_000_000);
    /// let bounds: Vec<_> = plan.iter().map(|c| (c.begin, c.end)).collect();
    /// assert_eq!(bounds, vec![(0, 4), (4, 8), (8, 10)]);
    /// ```
    pub fn new(numel: usize, chunk_size: ChunkSize, default_chunk_size: usize) -> Self {
        let size = chunk_size.resolve(numel, default_chunk_size);
        let total = numel.max(1);
        let ranges = (0..total)
            .step_by(size)
            .map(|begin| ChunkRange {
                index: begin / size,
                begin,
                end: begin.saturating_add(size).min(total),
            })
            .collect();
        Self {
            numel,
            chunk_size: size,
            ranges,
        }
    }

    /// Returns the resolved number of elements per chunk.
    #[inline]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Returns the number of elements of the planned tensor.
    #[inline]
    pub fn numel(&self) -> usize {
        self.numel
    }

    /// Returns the number of chunks.
    #[inline]
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// Always false: a plan has at least one chunk.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Returns the chunks in ascending order.
    pub fn ranges(&self) -> &[ChunkRange] {
        &self.ranges
    }

    /// Iterates over the chunks in ascending order.
    pub fn iter(&self) -> std::slice::Iter<'_, ChunkRange> {
        self.ranges.iter()
    }

    /// Returns the chunk starting at `begin`, if planned.
    pub fn chunk_at(&self, begin: usize) -> Option<ChunkRange> {
        let index = begin / self.chunk_size;
        self.ranges.get(index).copied().filter(|c| c.begin == begin)
    }
}

/// Builds the record key of chunk `index` of blob `name`.
pub fn chunk_key(name: &str, index: usize) -> String {
    format!("{name}{CHUNK_ID_SEPARATOR}{index}")
}

/// Splits a record key into the blob name and its chunk index, if any.
///
/// ```
/// use tensorblob::chunk::split_chunk_key;
///
/// assert_eq!(split_chunk_key("conv1_w#%3"), ("conv1_w", Some(3)));
/// assert_eq!(split_chunk_key("conv1_w"), ("conv1_w", None));
/// ```
pub fn split_chunk_key(key: &str) -> (&str, Option<usize>) {
    match key.rsplit_once(CHUNK_ID_SEPARATOR) {
        Some((name, index)) => match index.parse() {
            Ok(index) => (name, Some(index)),
            Err(_) => (key, None),
        },
        None => (key, None),
    }
}
