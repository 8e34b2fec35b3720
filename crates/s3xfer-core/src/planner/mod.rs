//! Part planning: how many parts a transfer needs and which bytes each covers.

mod range;

pub use range::{fit_part_size, part_count, plan_ranges, PartRange, MAX_UPLOAD_PARTS};
