//! Glob-style key patterns
//!
//! Same dialect as `KEYS` / `SCAN MATCH`: `*` matches any run, `?` one byte,
//! `[...]` a class with ranges and `^`/`!` negation, `\` escapes.

/// Returns true if `key` matches `pattern`.
///
/// Iterative, backtracking only to the most recent `*`, so the cost is
/// bounded by `pattern.len() * key.len()`.
pub fn glob_match(pattern: &[u8], key: &[u8]) -> bool {
    let (mut p, mut k) = (0, 0);
    // pattern position after the last `*`, and the key position it is retrying from
    let mut star: Option<(usize, usize)> = None;

    while k < key.len() {
        let step = match pattern.get(p) {
            Some(b'*') => {
                p += stars_at(&pattern[p..]);
                star = Some((p, k));
                continue;
            }
            Some(b'?') => Some(1),
            Some(b'[') => {
                let (matched, consumed) = match_class(&pattern[p + 1..], key[k]);
                matched.then_some(1 + consumed)
            }
            Some(b'\\') if p + 1 < pattern.len() => (key[k] == pattern[p + 1]).then_some(2),
            Some(&c) => (key[k] == c).then_some(1),
            None => None,
        };

        match (step, star) {
            (Some(used), _) => {
                p += used;
                k += 1;
            }
            (None, Some((after_star, from))) => {
                p = after_star;
                k = from + 1;
                star = Some((after_star, from + 1));
            }
            (None, None) => return false,
        }
    }

    p += stars_at(&pattern[p..]);
    p == pattern.len()
}

fn stars_at(pat: &[u8]) -> usize {
    pat.iter().take_while(|&&b| b == b'*').count()
}

/// Match `c` against a class body (after the `[`). Returns whether it
/// matched and how many pattern bytes the class used, including the `]`.
/// An unterminated class runs to the end of the pattern.
fn match_class(body: &[u8], c: u8) -> (bool, usize) {
    let mut i = 0;
    let negate = matches!(body.first(), Some(b'^') | Some(b'!'));
    if negate {
        i += 1;
    }

    let mut matched = false;
    while i < body.len() && body[i] != b']' {
        if body[i] == b'\\' && i + 1 < body.len() {
            matched |= body[i + 1] == c;
            i += 2;
        } else if i + 2 < body.len() && body[i + 1] == b'-' && body[i + 2] != b']' {
            let (lo, hi) = if body[i] <= body[i + 2] {
                (body[i], body[i + 2])
            } else {
                (body[i + 2], body[i])
            };
            matched |= (lo..=hi).contains(&c);
            i += 3;
        } else {
            matched |= body[i] == c;
            i += 1;
        }
    }

    let consumed = if i < body.len() { i + 1 } else { i };
    (matched != negate, consumed)
}
