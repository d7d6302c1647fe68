//! Per-slot weighted round-robin over the URL list.

/// Rotation state for one slot: the next URL index and how many times it
/// has already been yielded at that index.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Cursor {
    pub index: usize,
    pub emitted: u32,
}

/// Yield the next URL index for this cursor.
///
/// Without weights each index is yielded once in order. With weights, index
/// `i` is yielded `weights[i]` times consecutively before the cursor
/// advances. Each slot owns its cursor, so the sequence per slot is
/// deterministic regardless of completion interleaving.
pub fn next_index(cursor: &mut Cursor, count: usize, weights: &[u32]) -> usize {
    let i = cursor.index % count;
    if weights.is_empty() {
        cursor.index = (i + 1) % count;
        return i;
    }
    cursor.emitted += 1;
    if cursor.emitted >= weights[i].max(1) {
        cursor.index = (i + 1) % count;
        cursor.emitted = 0;
    }
    i
}
