//! Static extension to MIME type table.

use std::collections::BTreeMap;
use std::path::Path;

const DEFAULT_TYPES: &[(&str, &str)] = &[
    ("avif", "image/avif"),
    ("css", "text/css"),
    ("csv", "text/csv"),
    ("eot", "application/vnd.ms-fontobject"),
    ("gif", "image/gif"),
    ("gz", "application/gzip"),
    ("htm", "text/html"),
    ("html", "text/html"),
    ("ico", "image/vnd.microsoft.icon"),
    ("jpeg", "image/jpeg"),
    ("jpg", "image/jpeg"),
    ("js", "text/javascript"),
    ("json", "application/json"),
    ("map", "application/json"),
    ("md", "text/markdown"),
    ("mjs", "text/javascript"),
    ("mp3", "audio/mpeg"),
    ("mp4", "video/mp4"),
    ("otf", "font/otf"),
    ("pdf", "application/pdf"),
    ("png", "image/png"),
    ("sh", "application/x-sh"),
    ("svg", "image/svg+xml"),
    ("ttf", "font/ttf"),
    ("txt", "text/plain"),
    ("wasm", "application/wasm"),
    ("wav", "audio/wav"),
    ("webm", "video/webm"),
    ("webp", "image/webp"),
    ("woff", "font/woff"),
    ("woff2", "font/woff2"),
    ("xml", "application/xml"),
    ("yaml", "application/yaml"),
    ("yml", "application/yaml"),
    ("zip", "application/zip"),
];

/// Maps file extensions (case-insensitive) to content types.
#[derive(Debug, Clone)]
pub struct MimeTable {
    types: BTreeMap<String, String>,
}

impl Default for MimeTable {
    fn default() -> Self {
        Self {
            types: DEFAULT_TYPES
                .iter()
                .map(|(ext, mime)| ((*ext).to_string(), (*mime).to_string()))
                .collect(),
        }
    }
}

impl MimeTable {
    /// Creates the built-in table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the mapping for `extension`.
    #[must_use]
    pub fn with_override(mut self, extension: &str, content_type: impl Into<String>) -> Self {
        self.types.insert(
            extension.trim_start_matches('.').to_ascii_lowercase(),
            content_type.into(),
        );
        self
    }

    /// Content type for `path`, or `None` for unknown or missing extensions.
    #[must_use]
    pub fn lookup(&self, path: &Path) -> Option<&str> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        self.types.get(&ext).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_extensions() {
        let table = MimeTable::new();
        assert_eq!(table.lookup(Path::new("index.html")), Some("text/html"));
        assert_eq!(table.lookup(Path::new("img/LOGO.PNG")), Some("image/png"));
        assert_eq!(table.lookup(Path::new("app.min.js")), Some("text/javascript"));
    }

    #[test]
    fn test_unknown_extensions() {
        let table = MimeTable::new();
        assert_eq!(table.lookup(Path::new("data.bin")), None);
        assert_eq!(table.lookup(Path::new("Makefile")), None);
    }

    #[test]
    fn test_override() {
        let table = MimeTable::new().with_override(".txt", "text/plain; charset=utf-8");
        assert_eq!(
            table.lookup(Path::new("a.txt")),
            Some("text/plain; charset=utf-8")
        );
    }
}
