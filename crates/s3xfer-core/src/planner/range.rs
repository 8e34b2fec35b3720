//! Part range type and range planning.

/// Upper bound on parts in one multipart upload.
pub const MAX_UPLOAD_PARTS: u64 = 10_000;

/// Byte range [start, end) covered by one part (half-open).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartRange {
    /// Start offset (inclusive).
    pub start: u64,
    /// End offset (exclusive).
    pub end: u64,
}

impl PartRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// HTTP Range header value (inclusive end): `bytes=start-(end-1)`.
    pub fn range_header_value(&self) -> String {
        if self.start >= self.end {
            format!("bytes={}-{}", self.start, self.start)
        } else {
            format!("bytes={}-{}", self.start, self.end - 1)
        }
    }
}

/// Number of parts for an object of `size` bytes (None = unknown).
///
/// One part when the size is unknown or fits in a single part, otherwise
/// `ceil(size / part_size)`.
pub fn part_count(size: Option<u64>, part_size: u64) -> usize {
    match size {
        Some(s) if part_size > 0 && s > part_size => s.div_ceil(part_size) as usize,
        _ => 1,
    }
}

/// Contiguous, non-overlapping ranges covering exactly [0, total).
///
/// Every range is `part_size` long except possibly the last. An object that
/// fits in one part (including an empty one) yields a single range.
pub fn plan_ranges(total: u64, part_size: u64) -> Vec<PartRange> {
    let count = part_count(Some(total), part_size);
    if count == 1 {
        return vec![PartRange::new(0, total)];
    }
    let mut out = Vec::with_capacity(count);
    let mut offset = 0u64;
    while offset < total {
        let end = offset.saturating_add(part_size).min(total);
        out.push(PartRange::new(offset, end));
        offset = end;
    }
    out
}

/// Grow `part_size` so that `total` needs at most `max_parts` parts.
pub fn fit_part_size(total: u64, part_size: u64, max_parts: u64) -> u64 {
    let part_size = part_size.max(1);
    if max_parts == 0 || total.div_ceil(part_size) <= max_parts {
        return part_size;
    }
    total.div_ceil(max_parts)
}
