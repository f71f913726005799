//! Media type classification by file extension.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MediaType {
    Image,
    Gif,
    Video,
    Audio,
    Text,
    Pdf,
    Epub,
}

impl MediaType {
    pub const ALL: [MediaType; 7] = [
        MediaType::Image,
        MediaType::Gif,
        MediaType::Video,
        MediaType::Audio,
        MediaType::Text,
        MediaType::Pdf,
        MediaType::Epub,
    ];

    /// Lower-case extensions (without the dot) belonging to this type.
    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            MediaType::Image => &[
                "jpg", "jpeg", "png", "bmp", "webp", "heic", "heif", "tif", "tiff", "avif",
            ],
            MediaType::Gif => &["gif"],
            MediaType::Video => &[
                "mp4", "mkv", "avi", "mov", "wmv", "flv", "webm", "m4v", "3gp", "mpg", "mpeg", "ts",
            ],
            MediaType::Audio => &["mp3", "wav", "flac", "aac", "ogg", "m4a", "wma", "opus"],
            MediaType::Text => &["txt", "md", "log", "json", "xml", "csv"],
            MediaType::Pdf => &["pdf"],
            MediaType::Epub => &["epub"],
        }
    }
}

/// Precomputed extension → type table for a requested set of media types.
#[derive(Debug, Clone, Default)]
pub struct ExtensionSet {
    map: HashMap<&'static str, MediaType>,
}

impl ExtensionSet {
    pub fn new<I: IntoIterator<Item = MediaType>>(types: I) -> Self {
        let mut map = HashMap::new();
        for t in types {
            for ext in t.extensions() {
                map.insert(*ext, t);
            }
        }
        Self { map }
    }

    pub fn all() -> Self {
        Self::new(MediaType::ALL)
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Classify a file name; `None` if it does not belong to the set.
    pub fn classify(&self, file_name: &str) -> Option<MediaType> {
        let (_, ext) = file_name.rsplit_once('.')?;
        if ext.is_empty() {
            return None;
        }
        self.map.get(ext.to_ascii_lowercase().as_str()).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_case_insensitively() {
        let set = ExtensionSet::new([MediaType::Image]);
        assert_eq!(set.classify("IMG_001.JPG"), Some(MediaType::Image));
        assert_eq!(set.classify("clip.mp4"), None);
        assert_eq!(set.classify("noext"), None);
        assert_eq!(set.classify("trailing."), None);
    }

    #[test]
    fn gif_is_its_own_type() {
        let set = ExtensionSet::all();
        assert_eq!(set.classify("a.gif"), Some(MediaType::Gif));
        assert_eq!(set.classify("b.epub"), Some(MediaType::Epub));
    }
}
