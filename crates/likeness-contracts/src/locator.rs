use std::path::{Path, PathBuf};

const FILE_SCHEME: &str = "file://";

/// Translates opaque storage locators to local paths and back.
pub trait LocatorResolver: Send + Sync {
    /// `None` when the locator does not point at something readable locally.
    fn to_path(&self, locator: &str) -> Option<PathBuf>;
    fn to_locator(&self, path: &Path) -> String;
}

/// Handles `file://` URIs and bare filesystem paths.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileLocatorResolver;

impl LocatorResolver for FileLocatorResolver {
    fn to_path(&self, locator: &str) -> Option<PathBuf> {
        let trimmed = locator.trim();
        if trimmed.is_empty() {
            return None;
        }
        if let Some(rest) = trimmed.strip_prefix(FILE_SCHEME) {
            let rest = rest.strip_prefix("localhost").unwrap_or(rest);
            return (!rest.is_empty()).then(|| PathBuf::from(rest));
        }
        if has_foreign_scheme(trimmed) {
            return None;
        }
        Some(PathBuf::from(trimmed))
    }

    fn to_locator(&self, path: &Path) -> String {
        file_locator(path)
    }
}

/// `file://` URI for `path`, made absolute when it exists.
pub fn file_locator(path: &Path) -> String {
    let absolute = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    format!("{FILE_SCHEME}{}", absolute.to_string_lossy())
}

fn has_foreign_scheme(value: &str) -> bool {
    let Some((scheme, _)) = value.split_once("://") else {
        return value.starts_with("data:");
    };
    !scheme.is_empty()
        && scheme
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '+' | '-' | '.'))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::{FileLocatorResolver, LocatorResolver};

    #[test]
    fn file_uris_and_plain_paths_resolve() {
        let resolver = FileLocatorResolver;
        assert_eq!(
            resolver.to_path("file:///tmp/out/a.png"),
            Some(PathBuf::from("/tmp/out/a.png"))
        );
        assert_eq!(
            resolver.to_path("file://localhost/tmp/a.png"),
            Some(PathBuf::from("/tmp/a.png"))
        );
        assert_eq!(
            resolver.to_path("refs/alpha.jpg"),
            Some(PathBuf::from("refs/alpha.jpg"))
        );
    }

    #[test]
    fn remote_and_inline_locators_do_not_resolve() {
        let resolver = FileLocatorResolver;
        assert_eq!(resolver.to_path("https://example.com/a.png"), None);
        assert_eq!(resolver.to_path("stub://image/123"), None);
        assert_eq!(resolver.to_path("data:image/png;base64,AAAA"), None);
        assert_eq!(resolver.to_path("   "), None);
    }

    #[test]
    fn locator_round_trips_existing_file() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("ref.png");
        std::fs::write(&path, b"png")?;
        let resolver = FileLocatorResolver;
        let locator = resolver.to_locator(&path);
        assert!(locator.starts_with("file://"));
        assert_eq!(resolver.to_path(&locator), Some(path.canonicalize()?));
        Ok(())
    }
}
