use std::path::{Component, Path, PathBuf};

/// Replaces every `@<path>` mention in `text` with the absolute path it
/// refers to.
///
/// Relative paths are resolved against `root` and a leading `~` against the
/// home directory. The path ends at the next whitespace.
pub fn expand_mentions(root: &Path, text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(at) = rest.find('@') {
        // Only mentions that start a word, so e-mail addresses stay intact.
        let starts_word = rest[..at]
            .chars()
            .next_back()
            .or_else(|| result.chars().next_back())
            .is_none_or(char::is_whitespace);
        result.push_str(&rest[..at]);
        rest = &rest[at + 1..];

        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        let mention = &rest[..end];
        if !starts_word || mention.is_empty() {
            result.push('@');
            continue;
        }
        result.push_str(&resolve(root, mention).to_string_lossy());
        rest = &rest[end..];
    }
    result.push_str(rest);
    result
}

fn resolve(root: &Path, mention: &str) -> PathBuf {
    let expanded = match mention.strip_prefix('~') {
        Some(tail) if tail.is_empty() || tail.starts_with('/') => {
            match std::env::var_os("HOME") {
                Some(home) => {
                    PathBuf::from(home).join(tail.trim_start_matches('/'))
                }
                None => PathBuf::from(mention),
            }
        }
        _ => PathBuf::from(mention),
    };
    normalize(&root.join(expanded))
}

/// Removes `.` and `..` components without touching the file system.
fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_mentions() {
        let root = Path::new("/work/project");
        assert_eq!(
            expand_mentions(root, "summarize @notes/today.md please"),
            "summarize /work/project/notes/today.md please"
        );
        assert_eq!(
            expand_mentions(root, "@../other/a.txt and @/etc/hosts"),
            "/work/other/a.txt and /etc/hosts"
        );
        assert_eq!(
            expand_mentions(root, "mail bob@example.com or @ nothing"),
            "mail bob@example.com or @ nothing"
        );
        assert_eq!(expand_mentions(root, "no mentions"), "no mentions");
    }
}
