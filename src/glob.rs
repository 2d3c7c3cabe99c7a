//! Glob-Style Pattern Matching
//!
//! Used only by the `KEYS` command. Supports:
//!
//! - `*` matches any run of characters, including the empty run
//! - `?` matches exactly one character
//! - `[abc]` matches one character out of the set; `[^abc]` negates;
//!   `[a-z]` matches a range
//! - `\x` matches `x` literally
//!
//! Matching is byte-oriented and case-sensitive.

/// Returns true if `pattern` matches the whole of `candidate`.
pub fn matches(pattern: &[u8], candidate: &[u8]) -> bool {
    let mut p = pattern;
    let mut s = candidate;

    while !p.is_empty() {
        match p[0] {
            b'*' => {
                // Collapse consecutive stars
                while p.len() > 1 && p[1] == b'*' {
                    p = &p[1..];
                }
                if p.len() == 1 {
                    return true;
                }
                while !s.is_empty() {
                    if matches(&p[1..], s) {
                        return true;
                    }
                    s = &s[1..];
                }
                return matches(&p[1..], s);
            }
            b'?' => {
                if s.is_empty() {
                    return false;
                }
                s = &s[1..];
            }
            b'[' => {
                if s.is_empty() {
                    return false;
                }
                p = &p[1..];
                let negate = !p.is_empty() && p[0] == b'^';
                if negate {
                    p = &p[1..];
                }
                let mut found = false;
                loop {
                    if p.is_empty() {
                        break;
                    }
                    if p[0] == b'\\' && p.len() >= 2 {
                        p = &p[1..];
                        if p[0] == s[0] {
                            found = true;
                        }
                    } else if p[0] == b']' {
                        break;
                    } else if p.len() >= 3 && p[1] == b'-' {
                        let (mut lo, mut hi) = (p[0], p[2]);
                        if lo > hi {
                            std::mem::swap(&mut lo, &mut hi);
                        }
                        p = &p[2..];
                        if s[0] >= lo && s[0] <= hi {
                            found = true;
                        }
                    } else if p[0] == s[0] {
                        found = true;
                    }
                    p = &p[1..];
                }
                if negate {
                    found = !found;
                }
                if !found {
                    return false;
                }
                s = &s[1..];
            }
            b'\\' if p.len() >= 2 => {
                if s.is_empty() || p[1] != s[0] {
                    return false;
                }
                p = &p[1..];
                s = &s[1..];
            }
            c => {
                if s.is_empty() || c != s[0] {
                    return false;
                }
                s = &s[1..];
            }
        }
        // An unterminated class may have consumed the pattern already
        if !p.is_empty() {
            p = &p[1..];
        }

        // Trailing stars match the empty remainder
        if s.is_empty() {
            while !p.is_empty() && p[0] == b'*' {
                p = &p[1..];
            }
            break;
        }
    }

    p.is_empty() && s.is_empty()
}
