//! Redis-compatible glob matching for in-process pattern deletes.
//!
//! Supports `*`, `?`, `[abc]`, `[a-z]`, `[^a]` and `\` escapes.

pub fn glob_match(pattern: &str, key: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let key: Vec<char> = key.chars().collect();
    match_from(&pattern, &key)
}

fn match_from(pattern: &[char], key: &[char]) -> bool {
    let (mut p, mut k) = (0, 0);
    // Backtrack point for the most recent `*`.
    let mut star: Option<(usize, usize)> = None;

    while k < key.len() {
        if p < pattern.len() {
            match pattern[p] {
                '*' => {
                    star = Some((p, k));
                    p += 1;
                    continue;
                }
                '?' => {
                    p += 1;
                    k += 1;
                    continue;
                }
                '[' => {
                    if let Some((matched, next)) = match_class(pattern, p, key[k]) {
                        if matched {
                            p = next;
                            k += 1;
                            continue;
                        }
                    } else if key[k] == '[' {
                        p += 1;
                        k += 1;
                        continue;
                    }
                }
                '\\' if p + 1 < pattern.len() => {
                    if pattern[p + 1] == key[k] {
                        p += 2;
                        k += 1;
                        continue;
                    }
                }
                literal => {
                    if literal == key[k] {
                        p += 1;
                        k += 1;
                        continue;
                    }
                }
            }
        }

        match star {
            Some((star_p, star_k)) => {
                p = star_p + 1;
                k = star_k + 1;
                star = Some((star_p, star_k + 1));
            }
            None => return false,
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}

/// Matches `ch` against the class opening at `start`.
///
/// Returns `None` for an unterminated class, otherwise the match result and
/// the index just past the closing bracket.
fn match_class(pattern: &[char], start: usize, ch: char) -> Option<(bool, usize)> {
    let mut i = start + 1;
    let negated = matches!(pattern.get(i), Some('^') | Some('!'));
    if negated {
        i += 1;
    }

    let mut matched = false;
    let mut first = true;
    while i < pattern.len() {
        let c = pattern[i];
        if c == ']' && !first {
            return Some((matched != negated, i + 1));
        }
        first = false;

        let low = if c == '\\' && i + 1 < pattern.len() {
            i += 1;
            pattern[i]
        } else {
            c
        };

        if pattern.get(i + 1) == Some(&'-') && i + 2 < pattern.len() && pattern[i + 2] != ']' {
            let high = pattern[i + 2];
            if (low..=high).contains(&ch) {
                matched = true;
            }
            i += 3;
        } else {
            if low == ch {
                matched = true;
            }
            i += 1;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::glob_match;

    #[test]
    fn star_matches_any_suffix() {
        assert!(glob_match("faq:*", "faq:123"));
        assert!(glob_match("faq:*", "faq:"));
        assert!(glob_match("faq:category:*", "faq:category:abcd"));
        assert!(!glob_match("faq:category:*", "faq:123"));
        assert!(!glob_match("faq:*", "testimonial:1"));
    }

    #[test]
    fn star_in_the_middle_backtracks() {
        assert!(glob_match("faq:*:count", "faq:a:b:count"));
        assert!(!glob_match("faq:*:count", "faq:a:b:counts"));
    }

    #[test]
    fn question_mark_matches_one_char() {
        assert!(glob_match("faq:?", "faq:1"));
        assert!(!glob_match("faq:?", "faq:12"));
    }

    #[test]
    fn character_classes() {
        assert!(glob_match("faq:[abc]", "faq:b"));
        assert!(!glob_match("faq:[abc]", "faq:d"));
        assert!(glob_match("faq:[0-9]*", "faq:7x"));
        assert!(glob_match("faq:[^0-9]", "faq:x"));
        assert!(!glob_match("faq:[^0-9]", "faq:5"));
    }

    #[test]
    fn escapes_are_literal() {
        assert!(glob_match("faq:\\*", "faq:*"));
        assert!(!glob_match("faq:\\*", "faq:1"));
    }
}
