use std::collections::HashSet;
use std::sync::{Arc, RwLock, RwLockReadGuard};

use serde::{Deserialize, Serialize};

use crate::error::ReaderError;
use crate::event_bus::EventPublisher;
use crate::events::{SettingsChangeKind, SettingsChangedEvent};
use crate::logging;

/// Font size used when `font_size` is 0 ("host default").
pub const DEFAULT_FONT_SIZE: u16 = 14;
pub const MAX_FONT_SIZE: u16 = 100;

const PARAM_SEPARATOR: &str = ":@";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub font_family: String,
    pub font_size: u16,
    pub font_color: String,
    pub line_height: f64,
    /// One `name:@value` pair per line, sent with every request.
    pub api_custom_params: String,
    pub enable_error_log: bool,
    pub enable_show_body_in_line: bool,
    /// Characters per page. 0 derives the budget from the font size.
    pub page_size: usize,
    /// Paging past either end of a chapter moves to the adjacent chapter.
    pub cross_chapter_paging: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            font_family: "monospace".to_string(),
            font_size: 0,
            font_color: "#00ff00".to_string(),
            line_height: 1.5,
            api_custom_params: "source:@legado-reader\naccessToken:@nanchueng".to_string(),
            enable_error_log: false,
            enable_show_body_in_line: false,
            page_size: 0,
            cross_chapter_paging: false,
        }
    }
}

impl Settings {
    pub fn merge(&mut self, other: Self) {
        self.font_family = other.font_family;
        self.font_size = other.font_size;
        self.font_color = other.font_color;
        self.line_height = other.line_height;
        if !other.api_custom_params.trim().is_empty() {
            self.api_custom_params = other.api_custom_params;
        }
        self.enable_error_log = other.enable_error_log;
        self.enable_show_body_in_line = other.enable_show_body_in_line;
        self.page_size = other.page_size;
        self.cross_chapter_paging = other.cross_chapter_paging;
    }

    pub fn effective_font_size(&self) -> u16 {
        if self.font_size == 0 {
            DEFAULT_FONT_SIZE
        } else {
            self.font_size
        }
    }

    /// Page size budget handed to the pagination engine.
    pub fn page_budget(&self) -> usize {
        if self.page_size > 0 {
            self.page_size
        } else {
            usize::from(self.effective_font_size()) * 2
        }
    }

    pub fn text_style(&self) -> TextStyle {
        TextStyle {
            font_family: self.font_family.clone(),
            font_size: self.effective_font_size(),
            font_color: self.font_color.clone(),
            line_height: self.line_height,
        }
    }

    pub fn custom_params(&self) -> Vec<(String, String)> {
        parse_custom_params(&self.api_custom_params)
    }

    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = validate_custom_params(&self.api_custom_params);
        errors.extend(validate_font_size(self.font_size));
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Everything a surface needs to style chapter text.
#[derive(Debug, Clone, PartialEq)]
pub struct TextStyle {
    pub font_family: String,
    pub font_size: u16,
    pub font_color: String,
    pub line_height: f64,
}

impl Default for TextStyle {
    fn default() -> Self {
        Settings::default().text_style()
    }
}

/// Parse `name:@value` lines. Lines without the separator are skipped and
/// a later duplicate name overrides an earlier one.
pub fn parse_custom_params(raw: &str) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = Vec::new();
    for line in raw.lines() {
        let Some((name, value)) = line.split_once(PARAM_SEPARATOR) else {
            continue;
        };
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        let value = value.trim().to_string();
        match params.iter_mut().find(|(existing, _)| existing == name) {
            Some(entry) => entry.1 = value,
            None => params.push((name.to_string(), value)),
        }
    }
    params
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationErrorType {
    EmptyParamName,
    DuplicateParamName,
    InvalidFontSize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub kind: ValidationErrorType,
    /// Line of `api_custom_params` the error refers to, if any.
    pub row: Option<usize>,
    pub message: String,
}

pub fn validate_custom_params(raw: &str) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();
    for (row, line) in raw.lines().enumerate() {
        let Some((name, _)) = line.split_once(PARAM_SEPARATOR) else {
            continue;
        };
        let name = name.trim();
        if name.is_empty() {
            errors.push(ValidationError {
                kind: ValidationErrorType::EmptyParamName,
                row: Some(row),
                message: format!("parameter name on line {} is empty", row + 1),
            });
            continue;
        }
        if !seen.insert(name.to_string()) {
            errors.push(ValidationError {
                kind: ValidationErrorType::DuplicateParamName,
                row: Some(row),
                message: format!("duplicate parameter name: {name}"),
            });
        }
    }
    errors
}

pub fn validate_font_size(size: u16) -> Option<ValidationError> {
    (size > MAX_FONT_SIZE).then(|| ValidationError {
        kind: ValidationErrorType::InvalidFontSize,
        row: None,
        message: format!("font size must be between 0 and {MAX_FONT_SIZE} (0 uses the default)"),
    })
}

/// Thread-safe settings accessor. Every accepted update is published as a
/// single [`SettingsChangedEvent`].
#[derive(Clone)]
pub struct SettingsStore {
    inner: Arc<RwLock<Settings>>,
    publisher: EventPublisher,
}

impl SettingsStore {
    pub fn new(settings: Settings, publisher: EventPublisher) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings)),
            publisher,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Settings> {
        // A writer never panics while holding the lock, but don't lose
        // settings if one did.
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn snapshot(&self) -> Settings {
        self.read().clone()
    }

    pub fn custom_params(&self) -> Vec<(String, String)> {
        self.read().custom_params()
    }

    pub fn page_budget(&self) -> usize {
        self.read().page_budget()
    }

    pub fn text_style(&self) -> TextStyle {
        self.read().text_style()
    }

    pub fn enable_error_log(&self) -> bool {
        self.read().enable_error_log
    }

    /// Apply `change`, validate the result, then publish one event of
    /// `kind`. Rejected updates leave settings untouched.
    pub fn update(
        &self,
        kind: SettingsChangeKind,
        change: impl FnOnce(&mut Settings),
    ) -> Result<Settings, ReaderError> {
        let mut guard = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut next = guard.clone();
        change(&mut next);
        next.validate().map_err(ReaderError::InvalidSettings)?;

        *guard = next.clone();
        // Published under the write lock so event order follows write order.
        self.publisher.publish(Self::event_for(kind, &next));
        logging::debug(format!("Settings updated ({kind:?})"));
        Ok(next)
    }

    pub fn replace(&self, settings: Settings) -> Result<Settings, ReaderError> {
        self.update(SettingsChangeKind::AllSettings, |current| *current = settings)
    }

    /// Flip inline reading on or off, returning the new state.
    pub fn toggle_reading_mode(&self) -> Result<bool, ReaderError> {
        let settings = self.update(SettingsChangeKind::DisplaySettings, |s| {
            s.enable_show_body_in_line = !s.enable_show_body_in_line;
        })?;
        Ok(settings.enable_show_body_in_line)
    }

    fn event_for(kind: SettingsChangeKind, settings: &Settings) -> SettingsChangedEvent {
        match kind {
            SettingsChangeKind::FontSettings => SettingsChangedEvent::font(settings.text_style()),
            SettingsChangeKind::DisplaySettings => {
                SettingsChangedEvent::display(settings.enable_show_body_in_line)
            }
            SettingsChangeKind::AllSettings => SettingsChangedEvent::all(
                settings.text_style(),
                settings.enable_show_body_in_line,
            ),
        }
    }
}
