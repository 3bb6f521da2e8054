use std::fmt;

use crate::errors::{MapperError, Result};

/// One step of a property expression such as `a.b[k].c[0]`.
///
/// `index` is the uninterpreted bracketed content; a `.` inside brackets is
/// part of the index, so `a[b.c]` is a single segment. `rest` is the
/// unconsumed remainder of the path after this segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertySegment<'a> {
    pub name: &'a str,
    pub index: Option<&'a str>,
    pub rest: &'a str,
}

impl fmt::Display for PropertySegment<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(index) => write!(f, "{}[{}]", self.name, index),
            None => f.write_str(self.name),
        }
    }
}

/// Tokenize a property expression into a lazy sequence of segments.
///
/// The tokenizer is re-entrant; each call produces a fresh iterator over the
/// same borrowed path.
pub fn tokenize(path: &str) -> PropertyTokenizer<'_> {
    PropertyTokenizer {
        path,
        remainder: path,
        failed: false,
    }
}

/// Collect every segment of a path eagerly, failing on the first malformed
/// one.
pub fn segments(path: &str) -> Result<Vec<PropertySegment<'_>>> {
    tokenize(path).collect()
}

#[derive(Debug, Clone)]
pub struct PropertyTokenizer<'a> {
    path: &'a str,
    remainder: &'a str,
    failed: bool,
}

impl<'a> PropertyTokenizer<'a> {
    fn malformed(&mut self, detail: &str) -> MapperError {
        self.failed = true;
        MapperError::MalformedPath {
            path: self.path.to_string(),
            detail: detail.to_string(),
        }
    }
}

impl<'a> Iterator for PropertyTokenizer<'a> {
    type Item = Result<PropertySegment<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.remainder.is_empty() {
            return None;
        }

        let input = self.remainder;
        let bytes = input.as_bytes();
        let mut pos = 0;

        while pos < bytes.len() && bytes[pos] != b'.' && bytes[pos] != b'[' {
            pos += 1;
        }
        let name = &input[..pos];
        if name.is_empty() {
            return Some(Err(self.malformed("empty segment name")));
        }

        let mut index = None;
        if pos < bytes.len() && bytes[pos] == b'[' {
            let open = pos;
            pos += 1;
            while pos < bytes.len() && bytes[pos] != b']' {
                if bytes[pos] == b'[' {
                    return Some(Err(self.malformed("nested brackets are not supported")));
                }
                pos += 1;
            }
            if pos == bytes.len() {
                return Some(Err(self.malformed("unclosed bracket")));
            }
            index = Some(&input[open + 1..pos]);
            pos += 1;
        }

        let rest = match bytes.get(pos) {
            None => "",
            Some(b'.') => &input[pos + 1..],
            Some(_) => return Some(Err(self.malformed("expected '.' after ']'"))),
        };
        if rest.is_empty() && pos < bytes.len() {
            // A trailing '.' with nothing after it.
            return Some(Err(self.malformed("trailing '.'")));
        }

        self.remainder = rest;
        Some(Ok(PropertySegment { name, index, rest }))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn parts(path: &str) -> Vec<(String, Option<String>)> {
        segments(path)
            .unwrap()
            .into_iter()
            .map(|s| (s.name.to_string(), s.index.map(str::to_string)))
            .collect()
    }

    #[test]
    fn plain_dotted_path() {
        assert_eq!(
            parts("a.b.c"),
            vec![
                ("a".to_string(), None),
                ("b".to_string(), None),
                ("c".to_string(), None),
            ]
        );
    }

    #[test]
    fn indexed_segments() {
        assert_eq!(
            parts("a.b[k].c[0]"),
            vec![
                ("a".to_string(), None),
                ("b".to_string(), Some("k".to_string())),
                ("c".to_string(), Some("0".to_string())),
            ]
        );
    }

    #[test]
    fn dot_inside_brackets_is_part_of_the_index() {
        assert_eq!(parts("a[b.c]"), vec![("a".to_string(), Some("b.c".to_string()))]);
    }

    #[test]
    fn nested_brackets_fail() {
        let err = segments("a[b[c]]").unwrap_err();
        assert!(matches!(err, MapperError::MalformedPath { .. }));
    }

    #[test]
    fn unclosed_bracket_fails() {
        assert!(segments("a[b").is_err());
        assert!(segments("a.").is_err());
        assert!(segments(".a").is_err());
    }

    #[test]
    fn reassembled_path_tokenizes_identically() {
        let original = "orders[0].lines[sku.1].qty";
        let reassembled = segments(original)
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(".");
        assert_eq!(reassembled, original);
        assert_eq!(parts(original), parts(&reassembled));
    }

    #[test]
    fn rest_exposes_the_remainder() {
        let first = tokenize("a.b[1].c").next().unwrap().unwrap();
        assert_eq!(first.name, "a");
        assert_eq!(first.rest, "b[1].c");
    }
}
