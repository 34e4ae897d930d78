//! Path splitting. Both `/` and `\` separate components; an optional `N:`
//! prefix names the drive.

fn is_separator(c: char) -> bool {
    c == '/' || c == '\\'
}

/// Split `"0:/dir/file"` into `(Some("0"), "/dir/file")`.
pub(crate) fn split_drive(path: &str) -> (Option<&str>, &str) {
    match path.find(':') {
        Some(colon) if !path[..colon].contains(is_separator) => {
            (Some(&path[..colon]), &path[colon + 1..])
        }
        _ => (None, path),
    }
}

/// Split off the last component: `"/a/b/c"` gives `("/a/b", Some("c"))`.
pub(crate) fn split_last(path: &str) -> (&str, Option<&str>) {
    let trimmed = path.trim_end_matches(is_separator);
    match trimmed.rfind(is_separator) {
        Some(sep) => (&trimmed[..sep], Some(&trimmed[sep + 1..])),
        None if trimmed.is_empty() => ("", None),
        None => ("", Some(trimmed)),
    }
}

/// The non-empty components of a path.
#[derive(Debug, Clone)]
pub(crate) struct Components<'a> {
    rest: &'a str,
}

impl<'a> Components<'a> {
    pub(crate) fn new(path: &'a str) -> Self {
        Self { rest: path }
    }
}

impl<'a> Iterator for Components<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        loop {
            if self.rest.is_empty() {
                return None;
            }
            let (head, tail) = match self.rest.find(is_separator) {
                Some(sep) => (&self.rest[..sep], &self.rest[sep + 1..]),
                None => (self.rest, ""),
            };
            self.rest = tail;
            if !head.is_empty() {
                return Some(head);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn drive_prefix() {
        assert_eq!(split_drive("0:/LOG.TXT"), (Some("0"), "/LOG.TXT"));
        assert_eq!(split_drive("/LOG.TXT"), (None, "/LOG.TXT"));
        assert_eq!(split_drive("/a:b"), (None, "/a:b"));
    }

    #[test]
    fn last_component() {
        assert_eq!(split_last("/a/b/c"), ("/a/b", Some("c")));
        assert_eq!(split_last("c"), ("", Some("c")));
        assert_eq!(split_last("/c/"), ("", Some("c")));
        assert_eq!(split_last("/"), ("", None));
        assert_eq!(split_last("a\\b"), ("a", Some("b")));
    }

    #[test]
    fn components_skip_empty() {
        let parts: Vec<&str> = Components::new("//a/b\\c/").collect();
        assert_eq!(parts, vec!["a", "b", "c"]);
        assert_eq!(Components::new("").next(), None);
    }
}
