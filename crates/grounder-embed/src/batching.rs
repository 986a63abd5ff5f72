//! Provider-agnostic batch planning.
//!
//! Providers cap requests by item count and aggregate input size. These
//! limits are data; the planners below turn a list of input sizes into
//! request boundaries without knowing which provider will receive them.

use std::ops::Range;

use serde::{Deserialize, Serialize};

/// Per-request limits for one provider endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchLimits {
    /// Maximum number of inputs in one request.
    pub max_items: usize,
    /// Maximum total characters in one request; `None` means unbounded.
    #[serde(default)]
    pub max_chars: Option<usize>,
}

impl BatchLimits {
    #[must_use]
    pub fn items(max_items: usize) -> Self {
        Self {
            max_items,
            max_chars: None,
        }
    }

    #[must_use]
    pub fn items_and_chars(max_items: usize, max_chars: usize) -> Self {
        Self {
            max_items,
            max_chars: Some(max_chars),
        }
    }
}

/// Contextual-embedding window limits for the chunks of a single file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowLimits {
    /// Character budget for one window of chunks.
    pub max_chars: usize,
    /// Chunks repeated at the start of the next window.
    pub overlap_chunks: usize,
}

/// Split `sizes` into consecutive batches.
///
/// A batch is flushed when adding the next item would exceed either limit.
/// An item that alone exceeds `max_chars` travels in a batch of its own.
#[must_use]
pub fn plan_batches(sizes: &[usize], limits: &BatchLimits) -> Vec<Range<usize>> {
    let max_items = limits.max_items.max(1);
    let mut batches = Vec::new();
    let mut start = 0;
    let mut chars = 0usize;

    for (i, &size) in sizes.iter().enumerate() {
        let count = i - start;
        let over_items = count + 1 > max_items;
        let over_chars = limits
            .max_chars
            .is_some_and(|max| chars.saturating_add(size) > max);
        if count > 0 && (over_items || over_chars) {
            batches.push(start..i);
            start = i;
            chars = 0;
        }
        chars = chars.saturating_add(size);
    }

    if start < sizes.len() {
        batches.push(start..sizes.len());
    }
    batches
}

/// Split one file's chunks into windows that fit `limits.max_chars`, each
/// window after the first starting with the trailing `overlap_chunks` of its
/// predecessor.
#[must_use]
pub fn plan_windows(sizes: &[usize], limits: &WindowLimits) -> Vec<Range<usize>> {
    let n = sizes.len();
    if n == 0 {
        return Vec::new();
    }
    if sizes.iter().sum::<usize>() <= limits.max_chars {
        return vec![0..n];
    }

    let mut windows = Vec::new();
    let mut start = 0;
    loop {
        let mut end = start;
        let mut chars = 0usize;
        while end < n && (end == start || chars + sizes[end] <= limits.max_chars) {
            chars += sizes[end];
            end += 1;
        }
        windows.push(start..end);
        if end == n {
            break;
        }
        start = end.saturating_sub(limits.overlap_chunks).max(start + 1);
    }
    windows
}

/// For every chunk `0..n`, choose the window in which it sits closest to the
/// centre. Returns `(window index, offset within window)` per chunk; ties go
/// to the earlier window.
///
/// # Panics
///
/// Panics if some chunk is not covered by any window, which `plan_windows`
/// never produces.
#[must_use]
pub fn assign_central(windows: &[Range<usize>], n: usize) -> Vec<(usize, usize)> {
    (0..n)
        .map(|chunk| {
            windows
                .iter()
                .enumerate()
                .filter(|(_, w)| w.contains(&chunk))
                .min_by_key(|(_, w)| {
                    // Doubled distance keeps the centre of even-length windows integral.
                    let offset = chunk - w.start;
                    (2 * offset).abs_diff(w.len() - 1)
                })
                .map(|(wi, w)| (wi, chunk - w.start))
                .expect("every chunk is covered by a window")
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batches_flush_on_item_limit() {
        let batches = plan_batches(&[1, 1, 1, 1, 1], &BatchLimits::items(2));
        assert_eq!(batches, vec![0..2, 2..4, 4..5]);
    }

    #[test]
    fn batches_flush_on_char_limit() {
        let limits = BatchLimits::items_and_chars(100, 10);
        let batches = plan_batches(&[4, 4, 4, 9, 1], &limits);
        assert_eq!(batches, vec![0..2, 2..3, 3..5]);
    }

    #[test]
    fn oversized_item_gets_own_batch() {
        let limits = BatchLimits::items_and_chars(10, 5);
        let batches = plan_batches(&[2, 50, 2], &limits);
        assert_eq!(batches, vec![0..1, 1..2, 2..3]);
    }

    #[test]
    fn empty_input_no_batches() {
        assert!(plan_batches(&[], &BatchLimits::items(3)).is_empty());
        assert!(
            plan_windows(
                &[],
                &WindowLimits {
                    max_chars: 10,
                    overlap_chunks: 1
                }
            )
            .is_empty()
        );
    }

    #[test]
    fn single_window_when_file_fits() {
        let limits = WindowLimits {
            max_chars: 100,
            overlap_chunks: 2,
        };
        assert_eq!(plan_windows(&[10, 20, 30], &limits), vec![0..3]);
    }

    #[test]
    fn windows_overlap_by_trailing_chunks() {
        let limits = WindowLimits {
            max_chars: 30,
            overlap_chunks: 1,
        };
        let windows = plan_windows(&[10, 10, 10, 10, 10], &limits);
        assert_eq!(windows, vec![0..3, 2..5]);
    }

    #[test]
    fn windows_always_progress_with_large_overlap() {
        let limits = WindowLimits {
            max_chars: 10,
            overlap_chunks: 5,
        };
        let windows = plan_windows(&[10, 10, 10], &limits);
        assert_eq!(windows, vec![0..1, 1..2, 2..3]);
    }

    #[test]
    fn central_assignment_prefers_middle() {
        let windows = vec![0..3, 2..5];
        let picks = assign_central(&windows, 5);
        // chunk 2 is the last of window 0 but the first of window 1; equal
        // distance, so the earlier window wins.
        assert_eq!(picks, vec![(0, 0), (0, 1), (0, 2), (1, 1), (1, 2)]);
    }

    #[test]
    fn central_assignment_picks_more_central_window() {
        let windows = vec![0..4, 2..7];
        let picks = assign_central(&windows, 7);
        // chunk 3: offset 3 of len 4 (dist |6-3|=3) vs offset 1 of len 5 (dist |2-4|=2)
        assert_eq!(picks[3], (1, 1));
        // chunk 2: offset 2 of len 4 (|4-3|=1) vs offset 0 of len 5 (|0-4|=4)
        assert_eq!(picks[2], (0, 2));
    }

    use proptest::prelude::*;

    proptest! {
        #[test]
        fn batches_cover_input_in_order(sizes in proptest::collection::vec(0usize..50, 0..60),
                                        max_items in 1usize..10,
                                        max_chars in 1usize..120) {
            let limits = BatchLimits::items_and_chars(max_items, max_chars);
            let batches = plan_batches(&sizes, &limits);
            let mut next = 0;
            for b in &batches {
                prop_assert_eq!(b.start, next);
                prop_assert!(!b.is_empty());
                prop_assert!(b.len() <= max_items);
                let chars: usize = sizes[b.clone()].iter().sum();
                prop_assert!(b.len() == 1 || chars <= max_chars);
                next = b.end;
            }
            prop_assert_eq!(next, sizes.len());
        }

        #[test]
        fn windows_cover_every_chunk(sizes in proptest::collection::vec(1usize..40, 1..40),
                                     max_chars in 1usize..100,
                                     overlap in 0usize..4) {
            let limits = WindowLimits { max_chars, overlap_chunks: overlap };
            let windows = plan_windows(&sizes, &limits);
            let picks = assign_central(&windows, sizes.len());
            prop_assert_eq!(picks.len(), sizes.len());
            prop_assert_eq!(windows.last().map(|w| w.end), Some(sizes.len()));
        }
    }
}
