use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ReaderError;
use crate::logging;
use crate::models::{Book, ChapterRef, ProgressRecord};
use crate::settings::SettingsStore;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

const BOOKSHELF: &str = "/getBookshelf";
const CHAPTER_LIST: &str = "/getChapterList";
const BOOK_CONTENT: &str = "/getBookContent";
const SAVE_PROGRESS: &str = "/saveBookProgress";

/// Request/response access to the remote content service. Calls block, so
/// they belong on a worker thread.
pub trait ContentGateway: Send + Sync {
    fn list_books(&self) -> Result<Vec<Book>, ReaderError>;
    fn list_chapters(&self, book: &Book) -> Result<Vec<ChapterRef>, ReaderError>;
    fn fetch_chapter_text(&self, book: &Book, chapter_index: usize)
    -> Result<String, ReaderError>;
    fn save_progress(&self, progress: &ProgressRecord) -> Result<(), ReaderError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiResponse<T> {
    #[serde(default)]
    is_success: bool,
    #[serde(default)]
    error_msg: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProgressBody<'a> {
    name: &'a str,
    author: &'a str,
    dur_chapter_index: usize,
    dur_chapter_title: &'a str,
    dur_chapter_time: i64,
    dur_chapter_pos: usize,
    url: &'a str,
    index: usize,
}

impl<'a> From<&'a ProgressRecord> for ProgressBody<'a> {
    fn from(progress: &'a ProgressRecord) -> Self {
        Self {
            name: &progress.book.name,
            author: &progress.book.author,
            dur_chapter_index: progress.chapter_index,
            dur_chapter_title: &progress.chapter_title,
            dur_chapter_time: progress.timestamp,
            dur_chapter_pos: progress.position,
            url: &progress.book.book_url,
            index: progress.chapter_index,
        }
    }
}

/// [`ContentGateway`] over the Legado web service API.
pub struct HttpGateway {
    client: Client,
    base: String,
    settings: SettingsStore,
}

impl HttpGateway {
    pub fn new(address: &str, settings: SettingsStore) -> Result<Self, ReaderError> {
        Self::with_timeout(address, settings, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        address: &str,
        settings: SettingsStore,
        timeout: Duration,
    ) -> Result<Self, ReaderError> {
        let base = normalize_base(address);
        let mut builder = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("legado-reader/", env!("CARGO_PKG_VERSION")));
        if base.starts_with("http://127.0.0.1") || base.starts_with("http://localhost") {
            builder = builder.no_proxy();
        }
        let client = builder
            .build()
            .map_err(|err| ReaderError::gateway("building HTTP client", err))?;
        Ok(Self {
            client,
            base,
            settings,
        })
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base, endpoint)
    }

    // Custom parameters are re-read on every call so edits apply at once.
    fn with_custom_params(&self, request: RequestBuilder) -> RequestBuilder {
        let params = self.settings.custom_params();
        if params.is_empty() {
            request
        } else {
            request.query(&params)
        }
    }

    fn send<T: DeserializeOwned>(
        &self,
        context: String,
        request: RequestBuilder,
    ) -> Result<Option<T>, ReaderError> {
        logging::debug(format!("Calling {context}"));
        let response = self
            .with_custom_params(request)
            .send()
            .and_then(|response| response.error_for_status())
            .map_err(|err| ReaderError::gateway(context.clone(), err))?;
        let body: ApiResponse<T> = response
            .json()
            .map_err(|err| ReaderError::gateway(context.clone(), err))?;
        if !body.is_success {
            let message = body
                .error_msg
                .filter(|msg| !msg.trim().is_empty())
                .unwrap_or_else(|| "service reported failure".to_string());
            return Err(ReaderError::gateway(context, message));
        }
        Ok(body.data)
    }
}

impl ContentGateway for HttpGateway {
    fn list_books(&self) -> Result<Vec<Book>, ReaderError> {
        let request = self.client.get(self.url(BOOKSHELF));
        let books: Option<Vec<Book>> = self.send(format!("GET {BOOKSHELF}"), request)?;
        Ok(books.unwrap_or_default())
    }

    fn list_chapters(&self, book: &Book) -> Result<Vec<ChapterRef>, ReaderError> {
        let request = self
            .client
            .get(self.url(CHAPTER_LIST))
            .query(&[("url", book.book_url.as_str())]);
        let chapters: Option<Vec<ChapterRef>> =
            self.send(format!("GET {CHAPTER_LIST}"), request)?;
        Ok(chapters.unwrap_or_default())
    }

    fn fetch_chapter_text(
        &self,
        book: &Book,
        chapter_index: usize,
    ) -> Result<String, ReaderError> {
        let index = chapter_index.to_string();
        let request = self
            .client
            .get(self.url(BOOK_CONTENT))
            .query(&[("url", book.book_url.as_str()), ("index", index.as_str())]);
        let text: Option<String> = self.send(format!("GET {BOOK_CONTENT}"), request)?;
        Ok(text.unwrap_or_default())
    }

    fn save_progress(&self, progress: &ProgressRecord) -> Result<(), ReaderError> {
        let request = self
            .client
            .post(self.url(SAVE_PROGRESS))
            .json(&ProgressBody::from(progress));
        let _: Option<serde_json::Value> = self.send(format!("POST {SAVE_PROGRESS}"), request)?;
        Ok(())
    }
}

/// `host:port` becomes `http://host:port`; trailing slashes are dropped.
pub fn normalize_base(address: &str) -> String {
    let trimmed = address.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    }
}
