//! Tablespace descriptors as they appear in a backup's metadata and in the
//! `tablespace_map` file written during a concurrent backup.

use serde::{Deserialize, Serialize};

/// A single tablespace captured at backup time: its name, numeric OID
/// (matching `pg_tablespace.oid`), and the filesystem location it pointed
/// at when the backup started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tablespace {
    pub name: String,
    pub oid: u32,
    pub location: String,
}

impl Tablespace {
    pub fn new(name: impl Into<String>, oid: u32, location: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            oid,
            location: location.into(),
        }
    }

    /// Escapes a location the way `pg_basebackup`/barman write it into
    /// `tablespace_map`: a literal newline or carriage return is prefixed
    /// with a backslash so the file stays line-oriented. Backslashes
    /// themselves are left alone, matching `pg_basebackup`'s own
    /// `s/([\n\r])/\\\1/` substitution.
    pub fn escape_location(&self) -> String {
        let mut out = String::with_capacity(self.location.len());
        for c in self.location.chars() {
            if c == '\n' || c == '\r' {
                out.push('\\');
            }
            out.push(c);
        }
        out
    }

    /// Reverses [`Tablespace::escape_location`].
    pub fn unescape_location(escaped: &str) -> String {
        let mut out = String::with_capacity(escaped.len());
        let mut chars = escaped.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '\\' {
                match chars.peek() {
                    Some('\n') | Some('\r') => {}
                    _ => out.push('\\'),
                }
            } else {
                out.push(c);
            }
        }
        out
    }

    /// The `tablespace_map` line for this tablespace: `<oid> <location>`.
    pub fn to_map_line(&self) -> String {
        format!("{} {}", self.oid, self.escape_location())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_and_unescape_location_roundtrip() {
        let ts = Tablespace::new("data", 16401, "/srv/pg\\ts\nwith\rcontrol chars");
        let escaped = ts.escape_location();
        assert_eq!(Tablespace::unescape_location(&escaped), ts.location);
    }

    #[test]
    fn to_map_line_formats_oid_then_location() {
        let ts = Tablespace::new("data", 16401, "/srv/pg/ts1");
        assert_eq!(ts.to_map_line(), "16401 /srv/pg/ts1");
    }
}
