//! Path normalization helpers
//!
//! Everything here is policy-independent. The validator runs these checks
//! before any policy rule is consulted.

use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

/// Check for parent-directory references, including percent-encoded forms
/// and NUL bytes
pub fn has_traversal(raw: &str) -> bool {
    if raw.contains('\0') || raw.contains("..") {
        return true;
    }
    let decoded = raw.to_ascii_lowercase().replace("%2e", ".");
    decoded.contains("..") || decoded.contains("%00")
}

/// Expand a leading `~` to the home directory
pub fn expand_home(raw: &str) -> PathBuf {
    if raw == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    } else if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(raw)
}

/// Make a path absolute against `root`, dropping `.` components
pub fn absolutize(path: &Path, root: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    };
    joined
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

/// Resolve a path that may not exist yet
///
/// The deepest existing ancestor is canonicalized (resolving symlinks) and
/// the missing tail is appended unchanged. Callers must reject `..` first.
pub fn resolve(path: &Path) -> PathBuf {
    let mut existing = path;
    let mut tail: Vec<OsString> = Vec::new();

    loop {
        if let Ok(canonical) = existing.canonicalize() {
            let mut resolved = canonical;
            for name in tail.iter().rev() {
                resolved.push(name);
            }
            return resolved;
        }

        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                tail.push(name.to_os_string());
                existing = parent;
            }
            _ => return path.to_path_buf(),
        }
    }
}

/// Whether the final component is a symbolic link
pub fn is_symlink(path: &Path) -> bool {
    std::fs::symlink_metadata(path)
        .map(|meta| meta.file_type().is_symlink())
        .unwrap_or(false)
}

/// Categorize a path that is always denied, whatever the policy says
///
/// Returns a category description, never the path itself.
pub fn sensitive_category(path: &Path) -> Option<&'static str> {
    if path == Path::new("/etc/shadow") || path == Path::new("/etc/gshadow") {
        return Some("system password database");
    }

    for component in path.components() {
        if let Component::Normal(name) = component {
            match name.to_str() {
                Some(".ssh") => return Some("SSH configuration"),
                Some(".git") => return Some("git internals"),
                _ => {}
            }
        }
    }

    let name = path.file_name()?.to_str()?;
    if name == ".env" || name.starts_with(".env.") {
        return Some("environment file");
    }
    if name == "credentials.json" {
        return Some("credentials file");
    }

    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("pem") || ext.eq_ignore_ascii_case("key") => {
            Some("private key material")
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_traversal_forms() {
        assert!(has_traversal("src/../../etc/passwd"));
        assert!(has_traversal(".."));
        assert!(has_traversal("src/%2e%2e/secret"));
        assert!(has_traversal("src/%2E./secret"));
        assert!(has_traversal("src/a\0b"));
        assert!(!has_traversal("src/a.py"));
        assert!(!has_traversal("./src/a.py"));
    }

    #[test]
    fn test_absolutize_drops_cur_dir() {
        let path = absolutize(Path::new("./src/./a.py"), Path::new("/project"));
        assert_eq!(path, PathBuf::from("/project/src/a.py"));
    }

    #[test]
    fn test_resolve_missing_tail() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().canonicalize().unwrap();

        let resolved = resolve(&root.join("new/dir/file.txt"));
        assert_eq!(resolved, root.join("new/dir/file.txt"));
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_follows_symlinked_parent() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().canonicalize().unwrap();
        std::fs::create_dir(root.join("real")).unwrap();
        std::os::unix::fs::symlink(root.join("real"), root.join("link")).unwrap();

        assert!(is_symlink(&root.join("link")));
        assert_eq!(resolve(&root.join("link/f.txt")), root.join("real/f.txt"));
    }

    #[test]
    fn test_sensitive_categories() {
        assert!(sensitive_category(Path::new("/p/.env")).is_some());
        assert!(sensitive_category(Path::new("/p/.env.local")).is_some());
        assert!(sensitive_category(Path::new("/home/u/.ssh/id_rsa")).is_some());
        assert!(sensitive_category(Path::new("/p/.git/config")).is_some());
        assert!(sensitive_category(Path::new("/p/tls/server.PEM")).is_some());
        assert!(sensitive_category(Path::new("/p/signing.key")).is_some());
        assert!(sensitive_category(Path::new("/p/config/credentials.json")).is_some());
        assert!(sensitive_category(Path::new("/etc/shadow")).is_some());

        assert!(sensitive_category(Path::new("/p/.envrc")).is_none());
        assert!(sensitive_category(Path::new("/p/src/keys.rs")).is_none());
        assert!(sensitive_category(Path::new("/p/.gitignore")).is_none());
    }
}
