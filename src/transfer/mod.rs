/*!
 * Resumable transfer engine: part planning, checkpointing, worker pool
 */

pub mod checkpoint;
pub mod download;
pub mod pool;
pub mod upload;

pub use checkpoint::CheckpointStore;
pub use download::{download_file, download_file_encrypted};
pub use pool::TaskPool;
pub use upload::{upload_file, upload_file_encrypted, UploadResult};

use crate::types::Part;

/// The service caps a multipart session at this many parts
pub const MAX_PARTS: u64 = 10_000;

/// Split an object into a dense 1..N part plan.
///
/// All parts except the last have exactly `part_size` bytes.
pub fn split_parts(total_size: u64, part_size: u64) -> Vec<Part> {
    if total_size == 0 {
        return Vec::new();
    }
    let count = total_size.div_ceil(part_size);
    (0..count)
        .map(|index| {
            let start = index * part_size;
            Part {
                part_number: index as u32 + 1,
                start,
                end: (start + part_size).min(total_size),
                etag: String::new(),
                crc64: None,
            }
        })
        .collect()
}

/// Clamp the caller's preferred part size up until the plan fits the
/// service's part-count limit
pub fn clamp_part_size(total_size: u64, preferred: u64) -> u64 {
    let floor = total_size.div_ceil(MAX_PARTS).max(1);
    preferred.max(floor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_exact_multiple() {
        let parts = split_parts(300, 100);
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].part_number, 1);
        assert_eq!((parts[2].start, parts[2].end), (200, 300));
        assert!(parts.iter().all(|p| p.size() == 100));
    }

    #[test]
    fn test_split_with_short_tail() {
        let parts = split_parts(250, 100);
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[2].size(), 50);
    }

    #[test]
    fn test_split_empty_object() {
        assert!(split_parts(0, 100).is_empty());
    }

    #[test]
    fn test_part_numbers_are_dense() {
        let parts = split_parts(1000, 7);
        for (index, part) in parts.iter().enumerate() {
            assert_eq!(part.part_number as usize, index + 1);
        }
    }

    #[test]
    fn test_clamp_respects_preference() {
        assert_eq!(clamp_part_size(1000, 100), 100);
    }

    #[test]
    fn test_clamp_raises_small_part_size() {
        // 10 GiB at 64 KiB per part would need >10,000 parts
        let total = 10 * 1024 * 1024 * 1024u64;
        let clamped = clamp_part_size(total, 64 * 1024);
        assert!(total.div_ceil(clamped) <= MAX_PARTS);
    }
}
