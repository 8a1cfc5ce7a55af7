#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::sync::Mutex;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::{Duration, Instant};

use legado_reader::error::ReaderError;
use legado_reader::event_bus::EventBus;
use legado_reader::events::{
    PaginationEvent, PaginationHandler, ReadingEvent, ReadingEventType, ReadingLifecycleHandler,
    SettingsChangedEvent, SettingsHandler,
};
use legado_reader::gateway::ContentGateway;
use legado_reader::models::{Book, ChapterRef, ProgressRecord};

/// In-memory content service. A fetch can be held back with [`gate`], and a
/// chapter list with [`gate_list`], until the test releases it.
///
/// [`gate`]: ScriptedGateway::gate
/// [`gate_list`]: ScriptedGateway::gate_list
pub struct ScriptedGateway {
    chapters: usize,
    chapter_len: usize,
    gates: Mutex<HashMap<(String, usize), Receiver<()>>>,
    list_gates: Mutex<HashMap<String, Receiver<()>>>,
    failing: Mutex<HashSet<usize>>,
    failing_lists: Mutex<HashSet<String>>,
    listing: Mutex<Option<Sender<String>>>,
    started: Mutex<Option<Sender<(String, usize)>>>,
    returned: Mutex<Option<Sender<(String, usize)>>>,
    pub saves: Mutex<Vec<ProgressRecord>>,
}

impl ScriptedGateway {
    pub fn new(chapters: usize, chapter_len: usize) -> Self {
        Self {
            chapters,
            chapter_len,
            gates: Mutex::new(HashMap::new()),
            list_gates: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            failing_lists: Mutex::new(HashSet::new()),
            listing: Mutex::new(None),
            started: Mutex::new(None),
            returned: Mutex::new(None),
            saves: Mutex::new(Vec::new()),
        }
    }

    /// Hold the next fetch of `(book, index)` until the sender fires.
    pub fn gate(&self, book: &str, index: usize) -> Sender<()> {
        let (tx, rx) = mpsc::channel();
        self.gates
            .lock()
            .unwrap()
            .insert((book.to_string(), index), rx);
        tx
    }

    /// Hold the next chapter list of `book` until the sender fires.
    pub fn gate_list(&self, book: &str) -> Sender<()> {
        let (tx, rx) = mpsc::channel();
        self.list_gates.lock().unwrap().insert(book.to_string(), rx);
        tx
    }

    /// Reports every chapter list request once it has claimed its gate.
    pub fn watch_lists(&self) -> Receiver<String> {
        let (tx, rx) = mpsc::channel();
        *self.listing.lock().unwrap() = Some(tx);
        rx
    }

    pub fn fail_list(&self, book: &str) {
        self.failing_lists.lock().unwrap().insert(book.to_string());
    }

    /// Reports every fetch once it has claimed its gate, if any.
    pub fn watch_starts(&self) -> Receiver<(String, usize)> {
        let (tx, rx) = mpsc::channel();
        *self.started.lock().unwrap() = Some(tx);
        rx
    }

    /// Reports every fetch as it returns.
    pub fn watch_returns(&self) -> Receiver<(String, usize)> {
        let (tx, rx) = mpsc::channel();
        *self.returned.lock().unwrap() = Some(tx);
        rx
    }

    pub fn fail(&self, index: usize) {
        self.failing.lock().unwrap().insert(index);
    }

    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }

    pub fn text_for(&self, book: &str, index: usize) -> String {
        let head = format!("{book}#{index} ");
        let pad = self.chapter_len.saturating_sub(head.chars().count());
        format!("{head}{}", "x".repeat(pad))
    }

    pub fn wait_for_saves(&self, count: usize) -> Vec<ProgressRecord> {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let saves = self.saves.lock().unwrap().clone();
            if saves.len() >= count || Instant::now() > deadline {
                return saves;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }
}

impl ContentGateway for ScriptedGateway {
    fn list_books(&self) -> Result<Vec<Book>, ReaderError> {
        Ok(vec![book("Dream", 0, 0), book("Journey", 0, 0)])
    }

    fn list_chapters(&self, book: &Book) -> Result<Vec<ChapterRef>, ReaderError> {
        let gate = self.list_gates.lock().unwrap().remove(&book.name);
        if let Some(listing) = self.listing.lock().unwrap().as_ref() {
            let _ = listing.send(book.name.clone());
        }
        if let Some(gate) = gate {
            let _ = gate.recv_timeout(Duration::from_secs(5));
        }
        if self.failing_lists.lock().unwrap().contains(&book.name) {
            return Err(ReaderError::gateway("GET /getChapterList", "book not found"));
        }
        Ok((0..self.chapters)
            .map(|index| ChapterRef {
                index,
                title: format!("Chapter {}", index + 1),
                url: format!("chapter-{index}"),
            })
            .collect())
    }

    fn fetch_chapter_text(&self, book: &Book, index: usize) -> Result<String, ReaderError> {
        let gate = self
            .gates
            .lock()
            .unwrap()
            .remove(&(book.name.clone(), index));
        if let Some(started) = self.started.lock().unwrap().as_ref() {
            let _ = started.send((book.name.clone(), index));
        }
        if let Some(gate) = gate {
            let _ = gate.recv_timeout(Duration::from_secs(5));
        }
        let result = if self.failing.lock().unwrap().contains(&index) {
            Err(ReaderError::gateway("GET /getBookContent", "connection reset"))
        } else {
            Ok(self.text_for(&book.name, index))
        };
        if let Some(returned) = self.returned.lock().unwrap().as_ref() {
            let _ = returned.send((book.name.clone(), index));
        }
        result
    }

    fn save_progress(&self, progress: &ProgressRecord) -> Result<(), ReaderError> {
        self.saves.lock().unwrap().push(progress.clone());
        Ok(())
    }
}

pub fn book(name: &str, chapter: usize, position: usize) -> Book {
    Book {
        name: name.to_string(),
        author: "Anon".to_string(),
        book_url: format!("https://books.example/{name}"),
        dur_chapter_index: chapter,
        dur_chapter_pos: position,
        ..Default::default()
    }
}

/// Records everything the bus delivers to it.
#[derive(Default)]
pub struct Recorder {
    pub reading: Vec<ReadingEvent>,
    pub pages: Vec<PaginationEvent>,
    pub settings: Vec<SettingsChangedEvent>,
}

impl Recorder {
    pub fn kinds(&self) -> Vec<ReadingEventType> {
        self.reading.iter().map(ReadingEvent::kind).collect()
    }

    pub fn count(&self, kind: ReadingEventType) -> usize {
        self.reading.iter().filter(|e| e.kind() == kind).count()
    }
}

impl ReadingLifecycleHandler for Recorder {
    fn on_reading_event(&mut self, event: &ReadingEvent) -> eyre::Result<()> {
        self.reading.push(event.clone());
        Ok(())
    }
}

impl PaginationHandler for Recorder {
    fn on_pagination_event(&mut self, event: &PaginationEvent) -> eyre::Result<()> {
        self.pages.push(*event);
        Ok(())
    }
}

impl SettingsHandler for Recorder {
    fn on_settings_changed(&mut self, event: &SettingsChangedEvent) -> eyre::Result<()> {
        self.settings.push(event.clone());
        Ok(())
    }
}

/// Pump `bus` until `recorder` has seen `count` events of `kind`.
pub fn pump_until(
    bus: &EventBus,
    recorder: &Rc<RefCell<Recorder>>,
    kind: ReadingEventType,
    count: usize,
) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while recorder.borrow().count(kind) < count {
        assert!(Instant::now() < deadline, "timed out waiting for {kind}");
        bus.pump_timeout(Duration::from_millis(20));
    }
}

/// Keep pumping for `period`, so late events have a chance to show up.
pub fn pump_for(bus: &EventBus, period: Duration) {
    let deadline = Instant::now() + period;
    while Instant::now() < deadline {
        bus.pump_timeout(Duration::from_millis(10));
    }
}
