// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! OSC 10/11 color query round-trip.
//!
//! Vendor TUIs probe the terminal's foreground/background colors at
//! startup (`ESC ] 10 ; ? BEL`). Since the real terminal is on the other
//! side of the viewer, the PTY host answers these itself from cached
//! color strings so themes stay in sync.

/// Which color a query asks about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OscKind {
    Foreground,
    Background,
}

/// A parsed color query, remembering the terminator style so the reply
/// can mirror it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OscQuery {
    pub kind: OscKind,
    /// True when the query was ST-terminated (`ESC \`), false for BEL.
    pub st_terminated: bool,
}

/// Cached color strings used to answer queries.
#[derive(Debug, Clone)]
pub struct OscColors {
    pub foreground: String,
    pub background: String,
}

impl Default for OscColors {
    fn default() -> Self {
        Self {
            foreground: "rgb:ffff/ffff/ffff".to_owned(),
            background: "rgb:0000/0000/0000".to_owned(),
        }
    }
}

impl OscColors {
    /// Resolve colors from `H2_OSC_FG` / `H2_OSC_BG`, falling back to
    /// `H2_COLORFGBG` (a `"<fg>;<bg>"` index pair) and then defaults.
    pub fn from_env() -> Self {
        let mut colors = Self::default();
        if let Ok(pair) = std::env::var("H2_COLORFGBG") {
            // Light terminals report a high background index.
            if let Some(bg) = pair.split(';').nth(1) {
                if bg.parse::<u8>().map(|n| n >= 7).unwrap_or(false) {
                    colors.foreground = "rgb:0000/0000/0000".to_owned();
                    colors.background = "rgb:ffff/ffff/ffff".to_owned();
                }
            }
        }
        if let Ok(fg) = std::env::var("H2_OSC_FG") {
            if !fg.is_empty() {
                colors.foreground = fg;
            }
        }
        if let Ok(bg) = std::env::var("H2_OSC_BG") {
            if !bg.is_empty() {
                colors.background = bg;
            }
        }
        colors
    }

    /// Build the reply bytes for a query, mirroring its terminator.
    pub fn reply(&self, query: OscQuery) -> Vec<u8> {
        let (code, color) = match query.kind {
            OscKind::Foreground => ("10", &self.foreground),
            OscKind::Background => ("11", &self.background),
        };
        let mut out = format!("\x1b]{code};{color}").into_bytes();
        if query.st_terminated {
            out.extend_from_slice(b"\x1b\\");
        } else {
            out.push(0x07);
        }
        out
    }
}

/// The four query byte sequences the scanner recognizes.
const CANDIDATES: [(&[u8], OscQuery); 4] = [
    (b"\x1b]10;?\x07", OscQuery { kind: OscKind::Foreground, st_terminated: false }),
    (b"\x1b]10;?\x1b\\", OscQuery { kind: OscKind::Foreground, st_terminated: true }),
    (b"\x1b]11;?\x07", OscQuery { kind: OscKind::Background, st_terminated: false }),
    (b"\x1b]11;?\x1b\\", OscQuery { kind: OscKind::Background, st_terminated: true }),
];

enum QueryMatch {
    Complete(OscQuery, usize),
    /// The input ends with a strict prefix of a query; wait for more.
    Partial,
    No,
}

fn match_query(rest: &[u8]) -> QueryMatch {
    let mut partial = false;
    for (pattern, query) in CANDIDATES {
        if rest.len() >= pattern.len() {
            if &rest[..pattern.len()] == pattern {
                return QueryMatch::Complete(query, pattern.len());
            }
        } else if pattern.starts_with(rest) {
            partial = true;
        }
    }
    if partial {
        QueryMatch::Partial
    } else {
        QueryMatch::No
    }
}

/// Scans child output for OSC 10/11 color queries, carrying the tail of
/// each chunk so sequences split across PTY reads are still detected.
#[derive(Debug, Default)]
pub struct OscScanner {
    tail: Vec<u8>,
}

impl OscScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan one output chunk, returning any queries found.
    pub fn scan(&mut self, data: &[u8]) -> Vec<OscQuery> {
        let combined: Vec<u8>;
        let input: &[u8] = if self.tail.is_empty() {
            data
        } else {
            combined = [self.tail.as_slice(), data].concat();
            self.tail.clear();
            &combined
        };

        let mut queries = Vec::new();
        let mut i = 0;
        while i < input.len() {
            if input[i] != 0x1b {
                i += 1;
                continue;
            }
            match match_query(&input[i..]) {
                QueryMatch::Complete(query, consumed) => {
                    queries.push(query);
                    i += consumed;
                }
                QueryMatch::Partial => break,
                QueryMatch::No => i += 1,
            }
        }
        // On a partial match the remainder is at most one incomplete
        // query (< 8 bytes); otherwise everything was consumed.
        self.tail = input[i..].to_vec();
        queries
    }
}

#[cfg(test)]
#[path = "osc_tests.rs"]
mod tests;
