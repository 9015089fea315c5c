//! Chunk planning for instrument and field lists.
//!
//! The provider caps how many instruments and fields one request may carry,
//! so every list is cut into consecutive fixed-size chunks before any work is
//! scheduled. Planning is pure: the same input always yields the same chunks
//! in the same order.

use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChunkError {
    #[error("chunk size must be at least 1")]
    ZeroChunkSize,
}

/// Split `items` into consecutive chunks of `chunk_size` (the last one may be
/// shorter), then select a window of chunks:
///
/// 1. `chunk_limit > 0` and `skipped_chunks > 0`: chunks `skipped_chunks..chunk_limit`.
///    `chunk_limit` is an absolute stop index here, not a count.
/// 2. `chunk_limit > 0`: the first `chunk_limit` chunks.
/// 3. `skipped_chunks > 0`: everything after the first `skipped_chunks` chunks.
/// 4. otherwise: all chunks.
pub fn split_in_chunks<T: Clone>(
    items: &[T],
    chunk_size: usize,
    chunk_limit: usize,
    skipped_chunks: usize,
) -> Result<Vec<Vec<T>>, ChunkError> {
    if chunk_size == 0 {
        return Err(ChunkError::ZeroChunkSize);
    }

    let chunks: Vec<Vec<T>> = items.chunks(chunk_size).map(<[T]>::to_vec).collect();

    let selected = if chunk_limit > 0 && skipped_chunks > 0 {
        let stop = chunk_limit.min(chunks.len());
        if skipped_chunks >= stop {
            Vec::new()
        } else {
            chunks[skipped_chunks..stop].to_vec()
        }
    } else if chunk_limit > 0 {
        chunks.into_iter().take(chunk_limit).collect()
    } else if skipped_chunks > 0 {
        chunks.into_iter().skip(skipped_chunks).collect()
    } else {
        chunks
    };

    Ok(selected)
}

/// Drop repeated entries, keeping the first occurrence of each.
pub fn unique_in_order(items: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .iter()
        .filter(|item| seen.insert(item.as_str()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn letters(n: usize) -> Vec<String> {
        (0..n).map(|i| ((b'a' + i as u8) as char).to_string()).collect()
    }

    #[test]
    fn splits_into_fixed_size_chunks() {
        let chunks = split_in_chunks(&letters(7), 3, 0, 0).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], vec!["a", "b", "c"]);
        assert_eq!(chunks[2], vec!["g"]);
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        assert_eq!(
            split_in_chunks(&letters(3), 0, 0, 0),
            Err(ChunkError::ZeroChunkSize)
        );
    }

    #[test]
    fn limit_takes_first_chunks() {
        let chunks = split_in_chunks(&letters(10), 2, 2, 0).unwrap();
        assert_eq!(chunks, vec![vec!["a", "b"], vec!["c", "d"]]);
    }

    #[test]
    fn skip_drops_leading_chunks() {
        let chunks = split_in_chunks(&letters(5), 2, 0, 1).unwrap();
        assert_eq!(chunks, vec![vec!["c", "d"], vec!["e"]]);
    }

    #[test]
    fn limit_with_skip_is_an_absolute_stop_index() {
        // chunks: [ab] [cd] [ef] [gh] [ij]
        let chunks = split_in_chunks(&letters(10), 2, 3, 1).unwrap();
        assert_eq!(chunks, vec![vec!["c", "d"], vec!["e", "f"]]);
    }

    #[test]
    fn limit_with_skip_past_the_stop_is_empty() {
        assert!(split_in_chunks(&letters(10), 2, 2, 2).unwrap().is_empty());
        assert!(split_in_chunks(&letters(10), 2, 3, 7).unwrap().is_empty());
    }

    #[test]
    fn limit_beyond_chunk_count_returns_everything_after_skip() {
        let chunks = split_in_chunks(&letters(4), 2, 10, 1).unwrap();
        assert_eq!(chunks, vec![vec!["c", "d"]]);
    }

    #[test]
    fn empty_input_has_no_chunks() {
        let empty: Vec<String> = Vec::new();
        assert!(split_in_chunks(&empty, 5, 0, 0).unwrap().is_empty());
    }

    #[test]
    fn unique_in_order_keeps_first_occurrence() {
        let items: Vec<String> = ["b", "a", "b", "c", "a"].iter().map(|s| s.to_string()).collect();
        assert_eq!(unique_in_order(&items), vec!["b", "a", "c"]);
    }
}
