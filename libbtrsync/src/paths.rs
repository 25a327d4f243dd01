//! POSIX-style path manipulation over plain strings.
//!
//! Subvolume paths reported by `btrfs-progs` may be anchored at the
//! `<FS_TREE>` token rather than a real filesystem location, so they are
//! handled as opaque `/`-separated strings instead of `std::path` values.

/// Split a path into `(head, tail)` around the final separator. A head
/// consisting only of separators is preserved as-is.
pub fn split(p: &str) -> (&str, &str) {
    match p.rfind('/') {
        Some(idx) => {
            let (head, tail) = (&p[..idx + 1], &p[idx + 1..]);
            if head.chars().all(|c| c == '/') {
                (head, tail)
            } else {
                (head.trim_end_matches('/'), tail)
            }
        }
        None => ("", p),
    }
}

pub fn dirname(p: &str) -> &str {
    split(p).0
}

pub fn basename(p: &str) -> &str {
    split(p).1
}

pub fn is_abs(p: &str) -> bool {
    p.starts_with('/')
}

pub fn join(a: &str, b: &str) -> String {
    if is_abs(b) || a.is_empty() {
        b.to_string()
    } else if a.ends_with('/') {
        format!("{}{}", a, b)
    } else {
        format!("{}/{}", a, b)
    }
}

/// Normalize a path, collapsing repeated separators and resolving `.` and
/// `..` components. Leading `..` components are preserved.
pub fn normpath(p: &str) -> String {
    if p.is_empty() {
        return ".".to_string();
    }
    let root = if p.starts_with('/') {
        // POSIX allows exactly two leading slashes to be meaningful
        if p.starts_with("//") && !p.starts_with("///") {
            "//"
        } else {
            "/"
        }
    } else {
        ""
    };
    let mut parts: Vec<&str> = Vec::new();
    for comp in p.split('/') {
        match comp {
            "" | "." => {}
            ".." => {
                if parts.last().map_or(false, |&c| c != "..") {
                    parts.pop();
                } else if root.is_empty() {
                    parts.push("..");
                }
            }
            comp => parts.push(comp),
        }
    }
    let joined = parts.join("/");
    if root.is_empty() && joined.is_empty() {
        ".".to_string()
    } else {
        format!("{}{}", root, joined)
    }
}

fn components(p: &str) -> Vec<String> {
    normpath(p)
        .split('/')
        .filter(|c| !c.is_empty() && *c != ".")
        .map(str::to_string)
        .collect()
}

/// Compute `p` relative to `start`. Both paths must be of the same kind
/// (absolute or relative).
pub fn relpath(p: &str, start: &str) -> String {
    let pc = components(p);
    let sc = components(start);
    let common = pc.iter().zip(&sc).take_while(|(a, b)| a == b).count();
    let mut parts: Vec<&str> = Vec::new();
    parts.extend(std::iter::repeat("..").take(sc.len() - common));
    parts.extend(pc[common..].iter().map(String::as_str));
    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}

/// True iff `prefix` is a whole-component prefix of `p`. Mixed
/// absolute/relative pairs and empty prefixes never match.
fn is_path_prefix(prefix: &str, p: &str) -> bool {
    if prefix.is_empty() || is_abs(prefix) != is_abs(p) {
        return false;
    }
    let pre = components(prefix);
    let full = components(p);
    full.len() >= pre.len() && full[..pre.len()] == pre[..]
}

/// Join `a` and `b` after removing the longest prefix of `b` that is also a
/// suffix of `a`, walking `a` no further up than `root`.
pub fn path_merge(a: &str, b: &str, root: &str) -> String {
    let mut head = a;
    let mut tail = String::new();
    while !head.is_empty() && head != root {
        let (next, base) = split(head);
        if next == head {
            break;
        }
        tail = if tail.is_empty() {
            base.to_string()
        } else {
            join(base, &tail)
        };
        if is_path_prefix(&tail, b) {
            return concat(next, b);
        }
        head = next;
    }
    concat(a, b)
}

// Concatenation used by path_merge: unlike `join`, an absolute right-hand
// side is appended rather than replacing the left-hand side.
fn concat(a: &str, b: &str) -> String {
    if a.is_empty() {
        b.to_string()
    } else if is_abs(b) {
        format!("{}{}", a.trim_end_matches('/'), b)
    } else {
        join(a, b)
    }
}

/// True iff `p` is relative and its normalized form does not escape its
/// parent directory.
pub fn is_subpath(p: &str) -> bool {
    !(is_abs(p) || normpath(p).starts_with(".."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_cases() {
        assert_eq!(split("a/b"), ("a", "b"));
        assert_eq!(split("/a"), ("/", "a"));
        assert_eq!(split("//a"), ("//", "a"));
        assert_eq!(split("a"), ("", "a"));
        assert_eq!(split("a/b/"), ("a/b", ""));
        assert_eq!(split("/"), ("/", ""));
    }

    #[test]
    fn join_cases() {
        assert_eq!(join("a", "b"), "a/b");
        assert_eq!(join("a/", "b"), "a/b");
        assert_eq!(join("", "b"), "b");
        assert_eq!(join("a", "/b"), "/b");
        assert_eq!(join("a", ""), "a/");
    }

    #[test]
    fn normpath_cases() {
        assert_eq!(normpath(""), ".");
        assert_eq!(normpath("a//b/./c"), "a/b/c");
        assert_eq!(normpath("a/../b"), "b");
        assert_eq!(normpath("rel/../../path"), "../path");
        assert_eq!(normpath("/a/../.."), "/");
        assert_eq!(normpath("//a/b"), "//a/b");
    }

    #[test]
    fn relpath_cases() {
        assert_eq!(relpath("a/b/c", "a"), "b/c");
        assert_eq!(relpath("a/b", "a/b"), ".");
        assert_eq!(relpath("a/x", "a/b"), "../x");
        assert_eq!(relpath("/mnt/data/vol", "/mnt/data"), "vol");
    }

    #[test]
    fn merge_empty() {
        assert_eq!(path_merge("", "", "/"), "");
        assert_eq!(path_merge("", "v", "/"), "v");
    }

    #[test]
    fn merge_disjoint() {
        assert_eq!(path_merge("/a", "/b", "/"), "/a/b");
        assert_eq!(path_merge("a/b", "c/d", "/"), "a/b/c/d");
    }

    #[test]
    fn merge_overlap() {
        assert_eq!(path_merge("/a/b/c", "b/c/d", "/"), "/a/b/c/d");
        assert_eq!(path_merge("/a/b", "a/b", "/"), "/a/b");
    }

    #[test]
    fn merge_custom_root() {
        assert_eq!(
            path_merge("//myroot/asd", "myroot/asd/x", "//myroot"),
            "//myroot/asd/myroot/asd/x"
        );
        assert_eq!(path_merge("//myroot/asd", "myroot/asd/x", "/"), "//myroot/asd/x");
    }

    #[test]
    fn subpath_absolute() {
        assert!(!is_subpath("/"));
        assert!(!is_subpath("/abs/path"));
        assert!(!is_subpath("//abs/path"));
        assert!(!is_subpath("/abs/../../path"));
    }

    #[test]
    fn subpath_relative() {
        assert!(is_subpath(""));
        assert!(is_subpath("."));
        assert!(is_subpath("rel/path"));
        assert!(is_subpath("rel/../path"));
        assert!(is_subpath("./rel/../path"));

        assert!(!is_subpath("./../rel/path"));
        assert!(!is_subpath("../rel/../path"));
        assert!(!is_subpath("rel/../../path"));
        assert!(!is_subpath("rel/../path/../.."));
    }
}
