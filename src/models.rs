use serde::{Deserialize, Serialize};

/// Composite identity of a book on the remote shelf.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BookKey {
    pub author: String,
    pub name: String,
}

/// A book as listed by the content service. Immutable once received.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Book {
    pub name: String,
    pub author: String,
    pub book_url: String,
    pub dur_chapter_index: usize,
    pub dur_chapter_pos: usize,
    pub dur_chapter_title: Option<String>,
    pub latest_chapter_title: Option<String>,
}

impl Book {
    pub fn key(&self) -> BookKey {
        BookKey {
            author: self.author.clone(),
            name: self.name.clone(),
        }
    }

    pub fn title(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChapterRef {
    pub index: usize,
    pub title: String,
    pub url: String,
}

/// Why a chapter was loaded. Surfaces pick their initial page from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChapterDirection {
    #[default]
    Jump,
    Next,
    Previous,
}

/// A window over the current chapter text, in character offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub index: usize,
    pub start: usize,
    pub end: usize,
}

impl Page {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Slice the page out of `text`, counting offsets in chars.
    pub fn slice<'a>(&self, text: &'a str) -> &'a str {
        let mut indices = text.char_indices().map(|(i, _)| i);
        let start = indices.nth(self.start).unwrap_or(text.len());
        let end = if self.end > self.start {
            text[start..]
                .char_indices()
                .map(|(i, _)| start + i)
                .nth(self.len())
                .unwrap_or(text.len())
        } else {
            start
        };
        &text[start..end]
    }
}

/// Reading progress as persisted through the content service.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressRecord {
    pub book: Book,
    pub chapter_index: usize,
    pub chapter_title: String,
    pub position: usize,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}
