// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Message paging for chat transports with per-message length limits.

/// Appended to the last chunk when a page limit truncates the split.
pub const TRUNCATION_SUFFIX: &str = "\n... (truncated)";

/// Largest index ≤ `index` that is a char boundary of `s`.
fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Split `text` into 1..N chunks of at most `max_len` bytes.
///
/// Chunk boundaries prefer the last newline in the second half of the
/// current window (byte index ≥ `max_len / 2`, splitting *after* the
/// newline); otherwise the window is hard-cut at `max_len` (backed off
/// to a char boundary). With `max_pages == 0` the split is unlimited and
/// concatenating the chunks reproduces the input exactly. With
/// `max_pages > 0`, at most that many chunks are returned and the last
/// one is trimmed and suffixed with [`TRUNCATION_SUFFIX`], staying
/// within `max_len`.
pub fn split_message(text: &str, max_len: usize, max_pages: usize) -> Vec<String> {
    if max_len == 0 || text.len() <= max_len {
        return vec![text.to_owned()];
    }

    let mut chunks = Vec::new();
    let mut rest = text;
    while rest.len() > max_len {
        let window_end = floor_char_boundary(rest, max_len);
        let window = &rest[..window_end];
        let half = max_len / 2;
        let mut cut = match window.rfind('\n') {
            Some(idx) if idx >= half => idx + 1,
            _ => window_end,
        };
        if cut == 0 {
            // max_len smaller than the first character; take one char to
            // guarantee progress.
            cut = rest
                .char_indices()
                .nth(1)
                .map(|(i, _)| i)
                .unwrap_or(rest.len());
        }
        chunks.push(rest[..cut].to_owned());
        rest = &rest[cut..];
    }
    chunks.push(rest.to_owned());

    if max_pages > 0 && chunks.len() > max_pages {
        chunks.truncate(max_pages);
        if let Some(last) = chunks.last_mut() {
            let budget = max_len.saturating_sub(TRUNCATION_SUFFIX.len());
            let cut = floor_char_boundary(last, budget);
            last.truncate(cut);
            last.push_str(TRUNCATION_SUFFIX);
        }
    }
    chunks
}

#[cfg(test)]
#[path = "paging_tests.rs"]
mod tests;
