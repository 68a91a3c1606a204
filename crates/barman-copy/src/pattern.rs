//! rsync-style include/exclude pattern matching.
//!
//! Patterns match against a path relative to the directory item's root,
//! using `/` as the only separator. A leading `/` anchors the pattern to
//! that root (`/pg_xlog/*` matches only `pg_xlog/anything`, never
//! `tbl/pg_xlog/anything`); without one, the pattern may match starting
//! at any path component, mirroring rsync's own anchoring rule. `*`
//! matches any run of characters other than `/`, `**` matches across
//! path separators, and `?` matches exactly one non-separator character.

use regex::Regex;

#[derive(Debug, Clone)]
pub struct PatternSet {
    regexes: Vec<Regex>,
}

impl PatternSet {
    pub fn compile(patterns: &[String]) -> Self {
        let regexes = patterns.iter().map(|p| Regex::new(&translate(p)).expect("pattern translates to valid regex")).collect();
        Self { regexes }
    }

    pub fn is_match(&self, relative_path: &str) -> bool {
        self.regexes.iter().any(|re| re.is_match(relative_path))
    }

    pub fn is_empty(&self) -> bool {
        self.regexes.is_empty()
    }
}

fn translate(pattern: &str) -> String {
    let anchored = pattern.starts_with('/');
    let body = pattern.strip_prefix('/').unwrap_or(pattern);

    let mut out = String::from(if anchored { "^" } else { "^(?:.*/)?" });
    let mut chars = body.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    out.push_str(".*");
                } else {
                    out.push_str("[^/]*");
                }
            }
            '?' => out.push_str("[^/]"),
            _ => out.push_str(&regex::escape(&c.to_string())),
        }
    }
    out.push('$');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anchored_pattern_only_matches_at_root() {
        let set = PatternSet::compile(&["/pg_xlog/*".to_string()]);
        assert!(set.is_match("pg_xlog/000000010000000000000001"));
        assert!(!set.is_match("tbl/pg_xlog/000000010000000000000001"));
    }

    #[test]
    fn unanchored_pattern_matches_at_any_depth() {
        let set = PatternSet::compile(&["*.tmp".to_string()]);
        assert!(set.is_match("foo.tmp"));
        assert!(set.is_match("a/b/foo.tmp"));
    }

    #[test]
    fn double_star_crosses_separators() {
        let set = PatternSet::compile(&["pg_tblspc/**".to_string()]);
        assert!(set.is_match("pg_tblspc/16401/PG_14_202107181/16384"));
    }

    #[test]
    fn literal_path_matches_exactly() {
        let set = PatternSet::compile(&["global/pg_control".to_string()]);
        assert!(set.is_match("global/pg_control"));
        assert!(!set.is_match("global/pg_controlx"));
    }
}
