use eyre::Result;

use crate::events::{
    PaginationEvent, PaginationHandler, ReadingEvent, ReadingLifecycleHandler,
    SettingsChangedEvent, SettingsHandler,
};
use crate::logging;
use crate::models::Book;
use crate::settings::TextStyle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PanelMode {
    Bookshelf,
    Loading { label: String },
    Content,
    Error { message: String },
}

/// The dedicated reading panel: a bookshelf, or one chapter shown as
/// `title\ncontent` with a caret kept on the current page.
pub struct PanelView {
    mode: PanelMode,
    visible: bool,
    books: Vec<Book>,
    title_chars: usize,
    text: String,
    caret: usize,
    style: TextStyle,
}

impl PanelView {
    pub fn new(style: TextStyle) -> Self {
        Self {
            mode: PanelMode::Bookshelf,
            visible: true,
            books: Vec::new(),
            title_chars: 0,
            text: String::new(),
            caret: 0,
            style,
        }
    }

    pub fn mode(&self) -> &PanelMode {
        &self.mode
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    pub fn show_bookshelf(&mut self, books: Vec<Book>) {
        self.books = books;
        self.mode = PanelMode::Bookshelf;
    }

    pub fn books(&self) -> &[Book] {
        &self.books
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Caret position in chars of [`text`](Self::text).
    pub fn caret(&self) -> usize {
        self.caret
    }

    pub fn style(&self) -> &TextStyle {
        &self.style
    }

    fn content_visible(&self) -> bool {
        self.visible && self.mode == PanelMode::Content
    }

    fn place_caret(&mut self, offset: usize) {
        self.caret = (self.title_chars + offset).min(self.text.chars().count());
    }
}

impl ReadingLifecycleHandler for PanelView {
    fn on_reading_event(&mut self, event: &ReadingEvent) -> Result<()> {
        match event {
            ReadingEvent::ChapterLoading { book, chapter, .. } => {
                let label = chapter
                    .as_ref()
                    .map(|chapter| chapter.title.clone())
                    .filter(|title| !title.is_empty())
                    .unwrap_or_else(|| book.title().to_string());
                self.mode = PanelMode::Loading { label };
            }
            ReadingEvent::ChapterLoaded {
                chapter,
                content,
                position,
                ..
            } => {
                if chapter.title.is_empty() {
                    self.title_chars = 0;
                    self.text = content.to_string();
                } else {
                    // Title plus the newline that separates it from the body.
                    self.title_chars = chapter.title.chars().count() + 1;
                    self.text = format!("{}\n{}", chapter.title, content);
                }
                self.mode = PanelMode::Content;
                self.place_caret(*position);
            }
            ReadingEvent::ChapterLoadFailed {
                chapter_index,
                error,
                ..
            } => {
                self.mode = PanelMode::Error {
                    message: format!("Chapter {} failed to load: {}", chapter_index + 1, error),
                };
            }
            ReadingEvent::SessionEnded => {
                self.text.clear();
                self.title_chars = 0;
                self.caret = 0;
                self.mode = PanelMode::Bookshelf;
            }
        }
        Ok(())
    }
}

impl PaginationHandler for PanelView {
    fn on_pagination_event(&mut self, event: &PaginationEvent) -> Result<()> {
        let PaginationEvent::PageChanged {
            current_page,
            total_pages,
            start_offset,
        } = *event;
        if !self.content_visible() {
            logging::debug("Panel hidden; caret not synced");
            return Ok(());
        }
        self.place_caret(start_offset);
        logging::debug(format!(
            "Panel caret at {} for page {}/{}",
            self.caret,
            current_page + 1,
            total_pages
        ));
        Ok(())
    }
}

impl SettingsHandler for PanelView {
    fn on_settings_changed(&mut self, event: &SettingsChangedEvent) -> Result<()> {
        if !event.kind.touches_font() {
            return Ok(());
        }
        if let Some(style) = &event.style {
            self.style = style.clone();
        }
        Ok(())
    }
}
