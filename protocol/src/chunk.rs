//! Splitting of an object into separately stored parts and joining them back.

use std::cmp::min;

/// Size of each part when `total_len` bytes are split into `n` parts.
///
/// Rounds up, so the last part may be shorter than the others. Returns 1 when there
/// are fewer bytes than parts. `n == 0` is treated as a single part.
#[must_use]
#[inline]
pub fn part_size(total_len: usize, n: usize) -> usize {
    if total_len < n {
        return 1;
    }
    total_len.div_ceil(n.max(1))
}

/// Returns `bytes[start..start + max_len]` clamped to the end of `bytes`,
/// or `None` if `start` is not within `bytes`.
#[must_use]
#[inline]
pub fn sub_array(bytes: &[u8], start: usize, max_len: usize) -> Option<&[u8]> {
    if start >= bytes.len() {
        return None;
    }
    let end = min(start.saturating_add(max_len), bytes.len());
    bytes.get(start..end)
}

/// Splits `bytes` into exactly `n` contiguous parts of [`part_size`] bytes.
///
/// Parts that start past the end of the data are empty, so every part key of an
/// object always refers to an existing store object.
#[must_use]
#[inline]
pub fn split(bytes: &[u8], n: usize) -> Vec<&[u8]> {
    let n = n.max(1);
    let size = part_size(bytes.len(), n);
    (0..n)
        .map(|index| {
            index
                .checked_mul(size)
                .and_then(|start| sub_array(bytes, start, size))
                .unwrap_or_default()
        })
        .collect()
}

/// Concatenates parts in order.
///
/// Returns `None` if any part is missing: an object is never reconstructed from a partial set.
#[must_use]
#[inline]
pub fn join<P: AsRef<[u8]>>(parts: &[Option<P>]) -> Option<Vec<u8>> {
    let mut total_len = 0_usize;
    for part in parts {
        total_len = total_len.saturating_add(part.as_ref()?.as_ref().len());
    }
    let mut output = Vec::with_capacity(total_len);
    for part in parts.iter().flatten() {
        output.extend_from_slice(part.as_ref());
    }
    Some(output)
}
