use std::cell::RefCell;
use std::rc::Rc;

use eyre::{Result, eyre};

use crate::events::{ReadingEvent, ReadingLifecycleHandler, SettingsChangedEvent, SettingsHandler};
use crate::logging;
use crate::models::ChapterDirection;
use crate::pagination::PaginationEngine;
use crate::settings::SettingsStore;

/// One-page-at-a-time overlay. Owns the layout of the pagination engine:
/// it paginates each loaded chapter and picks the landing page.
pub struct InlineView {
    engine: Rc<RefCell<PaginationEngine>>,
    settings: SettingsStore,
    enabled: bool,
    chapter_title: Option<String>,
}

impl InlineView {
    pub fn new(engine: Rc<RefCell<PaginationEngine>>, settings: SettingsStore) -> Self {
        let enabled = settings.snapshot().enable_show_body_in_line;
        Self {
            engine,
            settings,
            enabled,
            chapter_title: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn chapter_title(&self) -> Option<&str> {
        self.chapter_title.as_deref()
    }

    /// Text of the current page, or `None` when hidden or nothing is loaded.
    pub fn current_text(&self) -> Option<String> {
        if !self.enabled {
            return None;
        }
        self.engine.borrow().page_text().map(str::to_string)
    }

    /// `Title  3/12`, for a status line.
    pub fn status(&self) -> Option<String> {
        let engine = self.engine.borrow();
        let index = engine.current_index()?;
        let title = self.chapter_title.as_deref().unwrap_or_default();
        Some(format!("{title}  {}/{}", index + 1, engine.total_pages()))
    }

    fn engine_mut(&self) -> Result<std::cell::RefMut<'_, PaginationEngine>> {
        self.engine
            .try_borrow_mut()
            .map_err(|_| eyre!("pagination engine is busy"))
    }
}

impl ReadingLifecycleHandler for InlineView {
    fn on_reading_event(&mut self, event: &ReadingEvent) -> Result<()> {
        match event {
            ReadingEvent::ChapterLoaded {
                chapter,
                content,
                direction,
                ..
            } => {
                let budget = self.settings.page_budget();
                let mut engine = self.engine_mut()?;
                let landing = match direction {
                    ChapterDirection::Previous => usize::MAX,
                    ChapterDirection::Next | ChapterDirection::Jump => 0,
                };
                engine.paginate_at(content.clone(), budget, landing);
                logging::debug(format!(
                    "Inline view on page {:?} of '{}' ({direction:?})",
                    engine.current_index(),
                    chapter.title
                ));
                drop(engine);
                self.chapter_title = Some(chapter.title.clone());
            }
            ReadingEvent::SessionEnded => {
                self.engine_mut()?.clear();
                self.chapter_title = None;
            }
            ReadingEvent::ChapterLoading { .. } | ReadingEvent::ChapterLoadFailed { .. } => {}
        }
        Ok(())
    }
}

impl SettingsHandler for InlineView {
    fn on_settings_changed(&mut self, event: &SettingsChangedEvent) -> Result<()> {
        if let Some(show) = event.show_body_in_line {
            self.enabled = show;
        }
        if event.kind.touches_font() {
            let budget = self.settings.page_budget();
            self.engine_mut()?.repaginate(budget);
        }
        Ok(())
    }
}
