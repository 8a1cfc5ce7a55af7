//! Event records broadcast by the [`EventBus`](crate::event_bus::EventBus)
//! and the handler capabilities subscribers implement.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use eyre::Result;
use uuid::Uuid;

use crate::error::ReaderError;
use crate::models::{Book, ChapterDirection, ChapterRef};
use crate::settings::TextStyle;

/// Immutable envelope around one broadcast.
#[derive(Debug, Clone)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(payload: impl Into<EventPayload>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            payload: payload.into(),
        }
    }

    pub fn family(&self) -> EventFamily {
        self.payload.family()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventFamily {
    Reading,
    Pagination,
    Settings,
}

#[derive(Debug, Clone)]
pub enum EventPayload {
    Reading(ReadingEvent),
    Pagination(PaginationEvent),
    Settings(SettingsChangedEvent),
}

impl EventPayload {
    pub fn family(&self) -> EventFamily {
        match self {
            EventPayload::Reading(_) => EventFamily::Reading,
            EventPayload::Pagination(_) => EventFamily::Pagination,
            EventPayload::Settings(_) => EventFamily::Settings,
        }
    }
}

impl From<ReadingEvent> for EventPayload {
    fn from(event: ReadingEvent) -> Self {
        EventPayload::Reading(event)
    }
}

impl From<PaginationEvent> for EventPayload {
    fn from(event: PaginationEvent) -> Self {
        EventPayload::Pagination(event)
    }
}

impl From<SettingsChangedEvent> for EventPayload {
    fn from(event: SettingsChangedEvent) -> Self {
        EventPayload::Settings(event)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadingEventType {
    ChapterLoading,
    ChapterLoaded,
    ChapterLoadFailed,
    SessionEnded,
}

impl fmt::Display for ReadingEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReadingEventType::ChapterLoading => "CHAPTER_LOADING",
            ReadingEventType::ChapterLoaded => "CHAPTER_LOADED",
            ReadingEventType::ChapterLoadFailed => "CHAPTER_LOAD_FAILED",
            ReadingEventType::SessionEnded => "SESSION_ENDED",
        };
        f.write_str(name)
    }
}

/// Reading session lifecycle.
#[derive(Debug, Clone)]
pub enum ReadingEvent {
    ChapterLoading {
        book: Arc<Book>,
        chapter_index: usize,
        chapter: Option<ChapterRef>,
    },
    ChapterLoaded {
        book: Arc<Book>,
        chapter: ChapterRef,
        content: Arc<str>,
        /// Character position to restore inside the chapter.
        position: usize,
        direction: ChapterDirection,
    },
    ChapterLoadFailed {
        book: Arc<Book>,
        chapter_index: usize,
        error: Arc<ReaderError>,
    },
    SessionEnded,
}

impl ReadingEvent {
    pub fn kind(&self) -> ReadingEventType {
        match self {
            ReadingEvent::ChapterLoading { .. } => ReadingEventType::ChapterLoading,
            ReadingEvent::ChapterLoaded { .. } => ReadingEventType::ChapterLoaded,
            ReadingEvent::ChapterLoadFailed { .. } => ReadingEventType::ChapterLoadFailed,
            ReadingEvent::SessionEnded => ReadingEventType::SessionEnded,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaginationEvent {
    PageChanged {
        current_page: usize,
        total_pages: usize,
        start_offset: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsChangeKind {
    FontSettings,
    DisplaySettings,
    AllSettings,
}

impl SettingsChangeKind {
    pub fn touches_font(self) -> bool {
        matches!(
            self,
            SettingsChangeKind::FontSettings | SettingsChangeKind::AllSettings
        )
    }

    pub fn touches_display(self) -> bool {
        matches!(
            self,
            SettingsChangeKind::DisplaySettings | SettingsChangeKind::AllSettings
        )
    }
}

/// One settings update. Fields not covered by `kind` are `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct SettingsChangedEvent {
    pub kind: SettingsChangeKind,
    pub style: Option<TextStyle>,
    pub show_body_in_line: Option<bool>,
}

impl SettingsChangedEvent {
    pub fn font(style: TextStyle) -> Self {
        Self {
            kind: SettingsChangeKind::FontSettings,
            style: Some(style),
            show_body_in_line: None,
        }
    }

    pub fn display(show_body_in_line: bool) -> Self {
        Self {
            kind: SettingsChangeKind::DisplaySettings,
            style: None,
            show_body_in_line: Some(show_body_in_line),
        }
    }

    pub fn all(style: TextStyle, show_body_in_line: bool) -> Self {
        Self {
            kind: SettingsChangeKind::AllSettings,
            style: Some(style),
            show_body_in_line: Some(show_body_in_line),
        }
    }
}

pub trait ReadingLifecycleHandler {
    fn on_reading_event(&mut self, event: &ReadingEvent) -> Result<()>;
}

pub trait PaginationHandler {
    fn on_pagination_event(&mut self, event: &PaginationEvent) -> Result<()>;
}

pub trait SettingsHandler {
    fn on_settings_changed(&mut self, event: &SettingsChangedEvent) -> Result<()>;
}
