//! Splits chapter text into pages and tracks the reader's page.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use crate::commands::{Command, CommandBus};
use crate::error::ReaderError;
use crate::event_bus::EventPublisher;
use crate::events::PaginationEvent;
use crate::logging;
use crate::models::Page;

/// Partition `text` into pages of at most `budget` characters.
///
/// A break prefers the last newline, then the last whitespace, in the back
/// half of the window, and falls back to a hard cut. Empty text yields a
/// single empty page. Offsets count chars, not bytes.
pub fn paginate(text: &str, budget: usize) -> Vec<Page> {
    let budget = budget.max(1);
    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();
    if len == 0 {
        return vec![Page {
            index: 0,
            start: 0,
            end: 0,
        }];
    }

    let mut pages = Vec::with_capacity(len / budget + 1);
    let mut start = 0;
    while start < len {
        let limit = (start + budget).min(len);
        let end = if limit == len {
            len
        } else {
            break_before(&chars, start, limit)
        };
        pages.push(Page {
            index: pages.len(),
            start,
            end,
        });
        start = end;
    }
    pages
}

fn break_before(chars: &[char], start: usize, limit: usize) -> usize {
    let floor = start + (limit - start) / 2;
    let window = &chars[floor..limit];
    if let Some(i) = window.iter().rposition(|c| *c == '\n') {
        return floor + i + 1;
    }
    if let Some(i) = window.iter().rposition(|c| c.is_whitespace()) {
        return floor + i + 1;
    }
    limit
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageMove {
    Moved(usize),
    /// Already on the first (or last) page; nothing changed.
    AtBoundary,
    Unpaginated,
}

/// Current chapter's pages and the page being read.
///
/// Every change of the current page is announced as `PAGE_CHANGED`. Events
/// go out through an [`EventPublisher`], so they reach subscribers on the
/// next pump rather than inside the call that moved the page.
pub struct PaginationEngine {
    publisher: EventPublisher,
    text: Arc<str>,
    budget: usize,
    pages: Vec<Page>,
    current: Option<usize>,
}

impl PaginationEngine {
    pub fn new(publisher: EventPublisher) -> Self {
        Self {
            publisher,
            text: Arc::from(""),
            budget: 0,
            pages: Vec::new(),
            current: None,
        }
    }

    /// Replace the text and land on the first page. Returns the page count.
    pub fn paginate(&mut self, text: impl Into<Arc<str>>, budget: usize) -> usize {
        self.paginate_at(text, budget, 0)
    }

    /// Replace the text and land on page `landing`, saturating at the last
    /// page. Only the landing page is announced.
    pub fn paginate_at(&mut self, text: impl Into<Arc<str>>, budget: usize, landing: usize) -> usize {
        self.text = text.into();
        self.budget = budget.max(1);
        self.pages = paginate(&self.text, self.budget);
        self.current = Some(landing.min(self.pages.len().saturating_sub(1)));
        logging::debug(format!(
            "Paginated {} chars into {} pages (budget {})",
            self.text.chars().count(),
            self.pages.len(),
            self.budget
        ));
        self.announce();
        self.pages.len()
    }

    /// Re-split the same text under a new budget, staying on the page that
    /// holds the current page's first character.
    pub fn repaginate(&mut self, budget: usize) {
        let Some(anchor) = self.current_page().map(|page| page.start) else {
            return;
        };
        let budget = budget.max(1);
        if budget == self.budget {
            return;
        }
        self.budget = budget;
        self.pages = paginate(&self.text, budget);
        self.current = self.page_for_offset(anchor);
        self.announce();
    }

    pub fn clear(&mut self) {
        self.text = Arc::from("");
        self.pages.clear();
        self.current = None;
    }

    pub fn is_paginated(&self) -> bool {
        self.current.is_some()
    }

    pub fn current_page(&self) -> Option<Page> {
        self.current.and_then(|index| self.pages.get(index).copied())
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    pub fn total_pages(&self) -> usize {
        self.pages.len()
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn page_text(&self) -> Option<&str> {
        self.current_page().map(|page| page.slice(&self.text))
    }

    /// Index of the page containing char `offset`. Offsets past the end
    /// map to the last page.
    pub fn page_for_offset(&self, offset: usize) -> Option<usize> {
        let last = self.pages.len().checked_sub(1)?;
        Some(
            self.pages
                .iter()
                .position(|page| offset < page.end)
                .unwrap_or(last),
        )
    }

    /// Jump to page `index`, saturating at either end.
    pub fn go_to_page(&mut self, index: usize) -> Option<Page> {
        let last = self.pages.len().checked_sub(1)?;
        self.move_to(index.min(last));
        self.current_page()
    }

    pub fn go_to_first_page(&mut self) -> Option<Page> {
        self.go_to_page(0)
    }

    pub fn go_to_last_page(&mut self) -> Option<Page> {
        self.go_to_page(usize::MAX)
    }

    pub fn next_page(&mut self) -> PageMove {
        let Some(current) = self.current else {
            return PageMove::Unpaginated;
        };
        if current + 1 >= self.pages.len() {
            return PageMove::AtBoundary;
        }
        self.move_to(current + 1);
        PageMove::Moved(current + 1)
    }

    pub fn previous_page(&mut self) -> PageMove {
        let Some(current) = self.current else {
            return PageMove::Unpaginated;
        };
        let Some(previous) = current.checked_sub(1) else {
            return PageMove::AtBoundary;
        };
        self.move_to(previous);
        PageMove::Moved(previous)
    }

    fn move_to(&mut self, index: usize) -> bool {
        if self.current == Some(index) {
            return false;
        }
        self.current = Some(index);
        self.announce();
        true
    }

    fn announce(&self) {
        let Some(page) = self.current_page() else {
            return;
        };
        self.publisher.publish(PaginationEvent::PageChanged {
            current_page: page.index,
            total_pages: self.pages.len(),
            start_offset: page.start,
        });
    }
}

/// What paging past either end of a chapter does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BoundaryPolicy {
    /// Stay on the boundary page.
    #[default]
    Clamp,
    /// Ask the session for the adjacent chapter.
    CrossChapter,
}

impl BoundaryPolicy {
    pub fn from_setting(cross_chapter_paging: bool) -> Self {
        if cross_chapter_paging {
            BoundaryPolicy::CrossChapter
        } else {
            BoundaryPolicy::Clamp
        }
    }
}

/// Page keys for a front end. Moves the engine and, under
/// [`BoundaryPolicy::CrossChapter`], turns a boundary clamp into a chapter
/// command.
pub struct PageTurner {
    engine: Rc<RefCell<PaginationEngine>>,
    commands: Arc<CommandBus>,
    policy: BoundaryPolicy,
}

impl PageTurner {
    pub fn new(
        engine: Rc<RefCell<PaginationEngine>>,
        commands: Arc<CommandBus>,
        policy: BoundaryPolicy,
    ) -> Self {
        Self {
            engine,
            commands,
            policy,
        }
    }

    pub fn policy(&self) -> BoundaryPolicy {
        self.policy
    }

    pub fn next_page(&self) -> Result<PageMove, ReaderError> {
        let outcome = self.engine.borrow_mut().next_page();
        if outcome == PageMove::AtBoundary && self.policy == BoundaryPolicy::CrossChapter {
            self.commands.dispatch_async(Command::next_chapter())?;
        }
        Ok(outcome)
    }

    pub fn previous_page(&self) -> Result<PageMove, ReaderError> {
        let outcome = self.engine.borrow_mut().previous_page();
        if outcome == PageMove::AtBoundary && self.policy == BoundaryPolicy::CrossChapter {
            self.commands.dispatch_async(Command::previous_chapter())?;
        }
        Ok(outcome)
    }
}
