/// Normalizes a client-supplied relative path so it stays under its base.
///
/// Backslashes become `/`, a leading drive prefix (`C:`) and leading slashes
/// are dropped, and empty, `.` and `..` segments are removed. Returns an empty
/// string when nothing remains.
pub fn sanitize_relative(path: &str) -> String {
    let normalized = path.replace('\\', "/");
    let mut segments = normalized
        .split('/')
        .map(str::trim)
        .filter(|seg| !seg.is_empty() && *seg != "." && *seg != "..")
        .peekable();
    if segments.peek().is_some_and(|first| is_drive_prefix(first)) {
        segments.next();
    }
    segments.collect::<Vec<_>>().join("/")
}

fn is_drive_prefix(segment: &str) -> bool {
    let bytes = segment.as_bytes();
    bytes.len() == 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn separators_and_dots_collapse() {
        assert_eq!(sanitize_relative("/docs//guide/./intro.md"), "docs/guide/intro.md");
        assert_eq!(sanitize_relative("docs\\guide\\intro.md"), "docs/guide/intro.md");
        assert_eq!(sanitize_relative(" docs / intro.md "), "docs/intro.md");
    }

    #[test]
    fn traversal_stays_inside() {
        assert_eq!(sanitize_relative("..\\..\\etc\\passwd"), "etc/passwd");
        assert_eq!(sanitize_relative("sub/../../../escape"), "sub/escape");
        assert_eq!(sanitize_relative("../.."), "");
        assert_eq!(sanitize_relative(""), "");
    }

    #[test]
    fn windows_prefixes_are_stripped() {
        assert_eq!(sanitize_relative("C:\\Users\\me\\notes.txt"), "Users/me/notes.txt");
        assert_eq!(sanitize_relative("d:/backup.zip"), "backup.zip");
        assert_eq!(sanitize_relative("\\\\server\\share\\a.txt"), "server/share/a.txt");
        assert_eq!(sanitize_relative("C:"), "");
    }

    #[test]
    fn dotfiles_and_colons_inside_names_survive() {
        assert_eq!(sanitize_relative(".config/settings.json"), ".config/settings.json");
        assert_eq!(sanitize_relative("logs/12:30.txt"), "logs/12:30.txt");
        assert_eq!(sanitize_relative("docs/C:/a.md"), "docs/C:/a.md");
    }
}
