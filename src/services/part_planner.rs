//! Multipart part layout for a payload of known size.

const MIB: u64 = 1024 * 1024;

/// Backend minimum for every part except the last.
pub const MIN_PART_SIZE: u64 = 5 * MIB;
pub const MAX_PART_SIZE: u64 = 100 * MIB;
pub const MAX_PARTS: u64 = 10_000;

/// Fixed-size parts covering `total_size`; only the last part may be shorter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartPlan {
    pub total_size: u64,
    pub part_size: u64,
    pub part_count: u64,
}

/// One part of a plan: a 1-based number and a byte range of the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartSpan {
    pub part_number: u32,
    pub offset: u64,
    pub len: u64,
}

/// `part_size = max(MIN_PART_SIZE, file_size / MAX_PARTS)`, capped at
/// `MAX_PART_SIZE` and rounded up to a whole MiB; `part_count` is the ceiling
/// of `file_size / part_size`.
pub fn plan(file_size: u64) -> PartPlan {
    let part_size = (file_size / MAX_PARTS).max(MIN_PART_SIZE).min(MAX_PART_SIZE);
    let part_size = part_size.div_ceil(MIB) * MIB;

    PartPlan {
        total_size: file_size,
        part_size,
        part_count: file_size.div_ceil(part_size),
    }
}

impl PartPlan {
    /// Whether the plan stays within the backend's part-count limit.
    pub fn within_limits(&self) -> bool {
        self.part_count <= MAX_PARTS
    }

    /// Size of a given part; the last part takes the remainder.
    pub fn part_len(&self, part_number: u32) -> u64 {
        let number = u64::from(part_number);
        if number == self.part_count {
            self.total_size - self.part_size * (self.part_count - 1)
        } else {
            self.part_size
        }
    }

    pub fn parts(&self) -> impl Iterator<Item = PartSpan> + '_ {
        (1..=self.part_count).map(move |number| {
            let part_number = number as u32;
            PartSpan {
                part_number,
                offset: (number - 1) * self.part_size,
                len: self.part_len(part_number),
            }
        })
    }
}
