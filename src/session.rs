//! The single active reading session and the commands that drive it.
//!
//! All session state sits behind one mutex. Every navigation bumps a
//! generation counter under that lock, and a fetch result is applied only
//! if the generation it captured is still current. Superseded results are
//! dropped on arrival; the transport is never cancelled.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use uuid::Uuid;

use crate::commands::{Command, CommandBus, CommandHandler, CommandPayload, CommandType};
use crate::error::ReaderError;
use crate::event_bus::EventPublisher;
use crate::events::ReadingEvent;
use crate::gateway::ContentGateway;
use crate::logging;
use crate::models::{Book, ChapterDirection, ChapterRef, ProgressRecord};
use crate::settings::SettingsStore;
use crate::worker::WorkerPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No session, or a session whose first chapter never loaded.
    Idle,
    Loading,
    Loaded,
}

/// Read-only copy of the session, safe to hand to any thread.
#[derive(Debug, Clone)]
pub struct ReadingSession {
    pub id: Uuid,
    pub book: Arc<Book>,
    pub chapters: Arc<[ChapterRef]>,
    pub chapter_index: usize,
    /// `None` until the current chapter has loaded.
    pub content: Option<Arc<str>>,
    pub position: usize,
    pub phase: SessionPhase,
}

#[derive(Debug, Clone, Copy)]
struct Target {
    index: usize,
    position: usize,
    direction: ChapterDirection,
}

#[derive(Debug, Clone)]
struct LoadedChapter {
    index: usize,
    content: Arc<str>,
    position: usize,
}

struct SessionState {
    id: Uuid,
    book: Arc<Book>,
    chapters: Arc<[ChapterRef]>,
    phase: SessionPhase,
    target: Target,
    loaded: Option<LoadedChapter>,
    failed: Option<Target>,
}

impl SessionState {
    fn snapshot(&self) -> ReadingSession {
        let current = self
            .loaded
            .as_ref()
            .filter(|loaded| self.phase == SessionPhase::Loaded && loaded.index == self.target.index);
        ReadingSession {
            id: self.id,
            book: Arc::clone(&self.book),
            chapters: Arc::clone(&self.chapters),
            chapter_index: self.target.index,
            content: current.map(|loaded| Arc::clone(&loaded.content)),
            position: current.map_or(self.target.position, |loaded| loaded.position),
            phase: self.phase,
        }
    }

    fn chapter(&self, index: usize) -> ChapterRef {
        self.chapters.get(index).cloned().unwrap_or_else(|| ChapterRef {
            index,
            ..Default::default()
        })
    }
}

#[derive(Default)]
struct Inner {
    generation: u64,
    session: Option<SessionState>,
}

impl Inner {
    fn advance(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }
}

/// Owns the one active session. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ReadingSessionManager {
    inner: Arc<Mutex<Inner>>,
    gateway: Arc<dyn ContentGateway>,
    pool: Arc<WorkerPool>,
    publisher: EventPublisher,
    settings: SettingsStore,
}

impl ReadingSessionManager {
    pub fn new(
        gateway: Arc<dyn ContentGateway>,
        pool: Arc<WorkerPool>,
        publisher: EventPublisher,
        settings: SettingsStore,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            gateway,
            pool,
            publisher,
            settings,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn snapshot(&self) -> Option<ReadingSession> {
        self.lock().session.as_ref().map(SessionState::snapshot)
    }

    pub fn phase(&self) -> SessionPhase {
        self.lock()
            .session
            .as_ref()
            .map_or(SessionPhase::Idle, |session| session.phase)
    }

    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Start a session on `book` at `start_chapter`, superseding any
    /// current one. The chapter list is fetched unless the active session
    /// already holds it for this book.
    ///
    /// The previous session is invalidated before any network call, so its
    /// in-flight fetches are dropped even while the new list is loading.
    pub fn select_book(&self, book: Book, start_chapter: usize) -> Result<(), ReaderError> {
        let book = Arc::new(book);
        let position = if start_chapter == book.dur_chapter_index {
            book.dur_chapter_pos
        } else {
            0
        };

        let (generation, listed) = {
            let mut inner = self.lock();
            let known = inner
                .session
                .as_ref()
                .filter(|session| session.book.key() == book.key() && !session.chapters.is_empty())
                .map(|session| Arc::clone(&session.chapters));
            if let Some(chapters) = &known {
                check_index(start_chapter, chapters.len())?;
            }
            if let Some(previous) = inner.session.as_ref() {
                logging::debug(format!(
                    "Session {} superseded by '{}'",
                    previous.id,
                    book.title()
                ));
            }

            let generation = inner.advance();
            let listed = known.is_some();
            let session = SessionState {
                id: Uuid::new_v4(),
                book: Arc::clone(&book),
                chapters: known.unwrap_or_else(|| Arc::from(Vec::new())),
                phase: SessionPhase::Loading,
                target: Target {
                    index: start_chapter,
                    position,
                    direction: ChapterDirection::Jump,
                },
                loaded: None,
                failed: None,
            };
            self.publisher.publish(ReadingEvent::ChapterLoading {
                book: Arc::clone(&book),
                chapter_index: start_chapter,
                chapter: listed.then(|| session.chapter(start_chapter)),
            });
            logging::info(format!(
                "Opened '{}' at chapter {} (session {})",
                book.title(),
                start_chapter,
                session.id
            ));
            inner.session = Some(session);
            (generation, listed)
        };

        if !listed {
            let chapters = self.gateway.list_chapters(&book);
            if !self.install_chapters(generation, &book, start_chapter, chapters)? {
                return Ok(());
            }
        }
        self.spawn_fetch(generation, book, start_chapter);
        Ok(())
    }

    // Returns whether the chapter fetch should go ahead.
    fn install_chapters(
        &self,
        generation: u64,
        book: &Arc<Book>,
        start_chapter: usize,
        chapters: Result<Vec<ChapterRef>, ReaderError>,
    ) -> Result<bool, ReaderError> {
        let mut inner = self.lock();
        if generation != inner.generation {
            let stale = ReaderError::StaleResult {
                generation,
                current: inner.generation,
            };
            logging::debug(format!("Discarding chapter list: {stale}"));
            return Ok(false);
        }

        let chapters: Arc<[ChapterRef]> = match chapters {
            Ok(chapters) => chapters.into(),
            Err(err) => {
                inner.session = None;
                self.report_failure(book, start_chapter, err);
                return Ok(false);
            }
        };
        if let Err(err) = check_index(start_chapter, chapters.len()) {
            // CHAPTER_LOADING is already out, so close it before failing.
            inner.session = None;
            self.publisher.publish(ReadingEvent::ChapterLoadFailed {
                book: Arc::clone(book),
                chapter_index: start_chapter,
                error: Arc::new(ReaderError::InvalidChapterIndex {
                    index: start_chapter,
                    len: chapters.len(),
                }),
            });
            return Err(err);
        }
        if let Some(session) = inner.session.as_mut() {
            session.chapters = chapters;
        }
        Ok(true)
    }

    pub fn next_chapter(&self) {
        self.navigate(ChapterDirection::Next);
    }

    pub fn previous_chapter(&self) {
        self.navigate(ChapterDirection::Previous);
    }

    // Moves relative to the chapter being shown or already requested, so
    // repeated presses walk ahead of a slow fetch. Boundaries are no-ops.
    fn navigate(&self, direction: ChapterDirection) {
        let (generation, book, index) = {
            let mut inner = self.lock();
            let Some(session) = inner.session.as_mut() else {
                logging::debug(format!("{direction:?} ignored: no active session"));
                return;
            };
            if session.chapters.is_empty() {
                logging::debug(format!("{direction:?} ignored: chapter list still loading"));
                return;
            }
            let target = match direction {
                ChapterDirection::Previous => session.target.index.checked_sub(1),
                _ => Some(session.target.index + 1).filter(|i| *i < session.chapters.len()),
            };
            let Some(index) = target else {
                logging::debug(format!(
                    "{direction:?} ignored at chapter {} of {}",
                    session.target.index,
                    session.chapters.len()
                ));
                return;
            };

            session.target = Target {
                index,
                position: 0,
                direction,
            };
            session.phase = SessionPhase::Loading;
            session.failed = None;
            let book = Arc::clone(&session.book);
            let chapter = session.chapter(index);
            let generation = inner.advance();
            self.publisher.publish(ReadingEvent::ChapterLoading {
                book: Arc::clone(&book),
                chapter_index: index,
                chapter: Some(chapter),
            });
            (generation, book, index)
        };
        self.spawn_fetch(generation, book, index);
    }

    /// Reload the chapter whose last fetch failed, or the current chapter.
    pub fn retry_chapter(&self) {
        let (generation, book, index) = {
            let mut inner = self.lock();
            let Some(session) = inner.session.as_mut() else {
                logging::debug("Retry ignored: no active session");
                return;
            };
            if session.chapters.is_empty() {
                logging::debug("Retry ignored: chapter list still loading");
                return;
            }
            let target = session.failed.take().unwrap_or(session.target);
            session.target = target;
            session.phase = SessionPhase::Loading;
            let book = Arc::clone(&session.book);
            let chapter = session.chapter(target.index);
            let generation = inner.advance();
            self.publisher.publish(ReadingEvent::ChapterLoading {
                book: Arc::clone(&book),
                chapter_index: target.index,
                chapter: Some(chapter),
            });
            (generation, book, target.index)
        };
        self.spawn_fetch(generation, book, index);
    }

    /// Record where the reader is inside the loaded chapter.
    pub fn update_position(&self, position: usize) -> bool {
        let mut inner = self.lock();
        let Some(session) = inner.session.as_mut() else {
            return false;
        };
        let Some(loaded) = session.loaded.as_mut() else {
            return false;
        };
        let position = position.min(loaded.content.chars().count());
        loaded.position = position;
        if session.target.index == loaded.index {
            session.target.position = position;
        }
        true
    }

    /// Drop the active session. Calling it again is a no-op.
    pub fn end_session(&self) {
        let mut inner = self.lock();
        let Some(session) = inner.session.take() else {
            return;
        };
        inner.advance();
        logging::info(format!("Session {} ended", session.id));
        self.publisher.publish(ReadingEvent::SessionEnded);
    }

    fn spawn_fetch(&self, generation: u64, book: Arc<Book>, index: usize) {
        let manager = self.clone();
        let queued = self.pool.execute(move || {
            let result = manager.gateway.fetch_chapter_text(&book, index);
            manager.apply_fetch(generation, result);
        });
        if !queued {
            self.apply_fetch(
                generation,
                Err(ReaderError::gateway(
                    "queueing chapter fetch",
                    "worker pool is shut down",
                )),
            );
        }
    }

    fn apply_fetch(&self, generation: u64, result: Result<String, ReaderError>) {
        let mut inner = self.lock();
        if generation != inner.generation {
            let stale = ReaderError::StaleResult {
                generation,
                current: inner.generation,
            };
            logging::debug(format!("Discarding chapter fetch: {stale}"));
            return;
        }
        let Some(session) = inner.session.as_mut() else {
            return;
        };
        let book = Arc::clone(&session.book);
        let target = session.target;

        match result {
            Ok(text) => {
                let content: Arc<str> = Arc::from(text);
                let chapter = session.chapter(target.index);
                session.loaded = Some(LoadedChapter {
                    index: target.index,
                    content: Arc::clone(&content),
                    position: target.position,
                });
                session.phase = SessionPhase::Loaded;
                let progress = ProgressRecord {
                    book: (*book).clone(),
                    chapter_index: target.index,
                    chapter_title: chapter.title.clone(),
                    position: target.position,
                    timestamp: Utc::now().timestamp_millis(),
                };
                self.publisher.publish(ReadingEvent::ChapterLoaded {
                    book,
                    chapter,
                    content,
                    position: target.position,
                    direction: target.direction,
                });
                drop(inner);
                self.save_progress(progress);
            }
            Err(err) => {
                session.failed = Some(target);
                match session.loaded.as_ref() {
                    Some(loaded) => {
                        session.target = Target {
                            index: loaded.index,
                            position: loaded.position,
                            direction: ChapterDirection::Jump,
                        };
                        session.phase = SessionPhase::Loaded;
                    }
                    None => session.phase = SessionPhase::Idle,
                }
                self.report_failure(&book, target.index, err);
            }
        }
    }

    fn report_failure(&self, book: &Arc<Book>, chapter_index: usize, err: ReaderError) {
        if self.settings.enable_error_log() {
            logging::error(format!(
                "Loading chapter {chapter_index} of '{}' failed: {}",
                book.title(),
                err.chain()
            ));
        } else {
            logging::warn(format!(
                "Loading chapter {chapter_index} of '{}' failed: {err}",
                book.title()
            ));
        }
        self.publisher.publish(ReadingEvent::ChapterLoadFailed {
            book: Arc::clone(book),
            chapter_index,
            error: Arc::new(err),
        });
    }

    // Best effort: a failed save never reaches the reading flow.
    fn save_progress(&self, progress: ProgressRecord) {
        let gateway = Arc::clone(&self.gateway);
        let queued = self.pool.execute(move || {
            if let Err(err) = gateway.save_progress(&progress) {
                logging::warn(format!(
                    "Saving progress for '{}' failed: {}",
                    progress.book.title(),
                    err.chain()
                ));
            }
        });
        if !queued {
            logging::warn("Progress not saved: worker pool is shut down");
        }
    }
}

fn check_index(index: usize, len: usize) -> Result<(), ReaderError> {
    if index < len {
        Ok(())
    } else {
        Err(ReaderError::InvalidChapterIndex { index, len })
    }
}

/// Routes the session command types to a [`ReadingSessionManager`].
pub struct SessionCommandHandler {
    manager: ReadingSessionManager,
}

impl SessionCommandHandler {
    pub fn new(manager: ReadingSessionManager) -> Self {
        Self { manager }
    }

    /// Register one handler for every session command type.
    pub fn register_all(bus: &CommandBus, manager: &ReadingSessionManager) {
        let handler: Arc<dyn CommandHandler> = Arc::new(Self::new(manager.clone()));
        for command_type in CommandType::ALL {
            bus.register(command_type, Arc::clone(&handler));
        }
    }
}

impl CommandHandler for SessionCommandHandler {
    fn handle(&self, command: Command) -> Result<(), ReaderError> {
        match command.payload {
            CommandPayload::SelectBook {
                book,
                start_chapter,
            } => self.manager.select_book(book, start_chapter),
            CommandPayload::NextChapter => {
                self.manager.next_chapter();
                Ok(())
            }
            CommandPayload::PreviousChapter => {
                self.manager.previous_chapter();
                Ok(())
            }
            CommandPayload::EndSession => {
                self.manager.end_session();
                Ok(())
            }
            CommandPayload::RetryChapter => {
                self.manager.retry_chapter();
                Ok(())
            }
        }
    }
}
