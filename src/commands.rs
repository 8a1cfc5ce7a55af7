//! Routes user intents to exactly one handler per command type.
//!
//! Handlers for the same [`CommandType`] never overlap: synchronous and
//! asynchronous dispatch both take the type's gate before calling in.
//! Asynchronous dispatch runs on a dedicated worker thread per type, so
//! different types may run concurrently while one type runs in order.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::ReaderError;
use crate::logging;
use crate::models::Book;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandType {
    SelectBook,
    NextChapter,
    PreviousChapter,
    EndSession,
    RetryChapter,
}

impl CommandType {
    pub const ALL: [CommandType; 5] = [
        CommandType::SelectBook,
        CommandType::NextChapter,
        CommandType::PreviousChapter,
        CommandType::EndSession,
        CommandType::RetryChapter,
    ];
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommandType::SelectBook => "SELECT_BOOK",
            CommandType::NextChapter => "NEXT_CHAPTER",
            CommandType::PreviousChapter => "PREVIOUS_CHAPTER",
            CommandType::EndSession => "END_SESSION",
            CommandType::RetryChapter => "RETRY_CHAPTER",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommandPayload {
    SelectBook { book: Book, start_chapter: usize },
    NextChapter,
    PreviousChapter,
    EndSession,
    RetryChapter,
}

#[derive(Debug, Clone)]
pub struct Command {
    pub id: Uuid,
    pub issued_at: DateTime<Utc>,
    pub payload: CommandPayload,
}

impl Command {
    pub fn new(payload: CommandPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            issued_at: Utc::now(),
            payload,
        }
    }

    pub fn select_book(book: Book, start_chapter: usize) -> Self {
        Self::new(CommandPayload::SelectBook {
            book,
            start_chapter,
        })
    }

    pub fn next_chapter() -> Self {
        Self::new(CommandPayload::NextChapter)
    }

    pub fn previous_chapter() -> Self {
        Self::new(CommandPayload::PreviousChapter)
    }

    pub fn end_session() -> Self {
        Self::new(CommandPayload::EndSession)
    }

    pub fn retry_chapter() -> Self {
        Self::new(CommandPayload::RetryChapter)
    }

    pub fn command_type(&self) -> CommandType {
        match self.payload {
            CommandPayload::SelectBook { .. } => CommandType::SelectBook,
            CommandPayload::NextChapter => CommandType::NextChapter,
            CommandPayload::PreviousChapter => CommandType::PreviousChapter,
            CommandPayload::EndSession => CommandType::EndSession,
            CommandPayload::RetryChapter => CommandType::RetryChapter,
        }
    }
}

pub trait CommandHandler: Send + Sync {
    fn handle(&self, command: Command) -> Result<(), ReaderError>;
}

type Reply = Result<(), ReaderError>;

struct Queued {
    command: Command,
    handler: Arc<dyn CommandHandler>,
    reply: Sender<Reply>,
}

struct Route {
    handler: Arc<dyn CommandHandler>,
    gate: Arc<Mutex<()>>,
    worker: Option<Sender<Queued>>,
}

/// Outcome of an asynchronously dispatched command.
pub struct PendingCommand {
    pub id: Uuid,
    reply: Receiver<Reply>,
}

impl PendingCommand {
    /// Wait for the handler to finish. `None` on timeout, or when the
    /// handler panicked and never replied.
    pub fn wait(&self, timeout: Duration) -> Option<Reply> {
        match self.reply.recv_timeout(timeout) {
            Ok(reply) => Some(reply),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn try_result(&self) -> Option<Reply> {
        match self.reply.try_recv() {
            Ok(reply) => Some(reply),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }
}

#[derive(Default)]
pub struct CommandBus {
    routes: Mutex<HashMap<CommandType, Route>>,
}

impl CommandBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn routes(&self) -> MutexGuard<'_, HashMap<CommandType, Route>> {
        self.routes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Bind `handler` to `command_type`. A second registration replaces the
    /// first and hands the replaced handler back; callers treat that as a
    /// wiring mistake.
    pub fn register(
        &self,
        command_type: CommandType,
        handler: Arc<dyn CommandHandler>,
    ) -> Option<Arc<dyn CommandHandler>> {
        let mut routes = self.routes();
        if let Some(route) = routes.get_mut(&command_type) {
            logging::warn(format!(
                "Handler for {command_type} registered twice; replacing the previous one"
            ));
            return Some(std::mem::replace(&mut route.handler, handler));
        }
        routes.insert(
            command_type,
            Route {
                handler,
                gate: Arc::new(Mutex::new(())),
                worker: None,
            },
        );
        None
    }

    pub fn is_routable(&self, command_type: CommandType) -> bool {
        self.routes().contains_key(&command_type)
    }

    /// Run the handler on the calling thread.
    pub fn dispatch(&self, command: Command) -> Result<(), ReaderError> {
        let command_type = command.command_type();
        let (handler, gate) = {
            let routes = self.routes();
            let route = routes
                .get(&command_type)
                .ok_or(ReaderError::UnroutableCommand(command_type))?;
            (Arc::clone(&route.handler), Arc::clone(&route.gate))
        };
        let _serial = gate.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        logging::debug(format!("Dispatching {command_type} ({})", command.id));
        handler.handle(command)
    }

    /// Queue the command for the type's worker thread and return at once.
    /// Unroutable commands fail here, synchronously.
    pub fn dispatch_async(&self, command: Command) -> Result<PendingCommand, ReaderError> {
        let command_type = command.command_type();
        let id = command.id;
        let (reply_tx, reply_rx) = mpsc::channel();

        let mut routes = self.routes();
        let route = routes
            .get_mut(&command_type)
            .ok_or(ReaderError::UnroutableCommand(command_type))?;
        let worker = match route.worker.as_ref() {
            Some(worker) => worker.clone(),
            None => {
                let worker = spawn_worker(command_type, Arc::clone(&route.gate))?;
                route.worker = Some(worker.clone());
                worker
            }
        };

        let queued = Queued {
            command,
            handler: Arc::clone(&route.handler),
            reply: reply_tx,
        };
        if worker.send(queued).is_err() {
            route.worker = None;
            return Err(ReaderError::WorkerGone(command_type));
        }
        logging::debug(format!("Queued {command_type} ({id})"));

        Ok(PendingCommand {
            id,
            reply: reply_rx,
        })
    }
}

fn spawn_worker(
    command_type: CommandType,
    gate: Arc<Mutex<()>>,
) -> Result<Sender<Queued>, ReaderError> {
    let (sender, receiver) = mpsc::channel::<Queued>();
    thread::Builder::new()
        .name(format!("command-{command_type}"))
        .spawn(move || {
            while let Ok(queued) = receiver.recv() {
                let Queued {
                    command,
                    handler,
                    reply,
                } = queued;
                let id = command.id;
                let outcome = {
                    let _serial = gate.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                    panic::catch_unwind(AssertUnwindSafe(|| handler.handle(command)))
                };
                match outcome {
                    Ok(result) => {
                        if let Err(err) = &result {
                            logging::warn(format!("{command_type} ({id}) failed: {err}"));
                        }
                        let _ = reply.send(result);
                    }
                    Err(_) => {
                        logging::error(format!("{command_type} ({id}) handler panicked"));
                    }
                }
            }
        })
        .map_err(|err| {
            logging::error(format!("Could not start worker for {command_type}: {err}"));
            ReaderError::WorkerGone(command_type)
        })?;
    Ok(sender)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        calls: AtomicUsize,
        active: AtomicUsize,
        max_active: AtomicUsize,
        delay: Duration,
    }

    impl Counting {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
                delay,
            })
        }
    }

    impl CommandHandler for Counting {
        fn handle(&self, _command: Command) -> Result<(), ReaderError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            thread::sleep(self.delay);
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct ThreadRecorder(Mutex<Option<thread::ThreadId>>);

    impl CommandHandler for ThreadRecorder {
        fn handle(&self, _command: Command) -> Result<(), ReaderError> {
            *self.0.lock().unwrap() = Some(thread::current().id());
            Ok(())
        }
    }

    struct Rejecting;

    impl CommandHandler for Rejecting {
        fn handle(&self, _command: Command) -> Result<(), ReaderError> {
            Err(ReaderError::InvalidChapterIndex { index: 9, len: 3 })
        }
    }

    #[test]
    fn test_unroutable_command_is_reported() {
        let bus = CommandBus::new();
        assert!(matches!(
            bus.dispatch(Command::next_chapter()),
            Err(ReaderError::UnroutableCommand(CommandType::NextChapter))
        ));
        assert!(matches!(
            bus.dispatch_async(Command::end_session()),
            Err(ReaderError::UnroutableCommand(CommandType::EndSession))
        ));
    }

    #[test]
    fn test_duplicate_registration_is_surfaced() {
        let bus = CommandBus::new();
        let first = Counting::new(Duration::ZERO);
        let second = Counting::new(Duration::ZERO);
        assert!(bus.register(CommandType::NextChapter, first.clone()).is_none());
        assert!(bus.register(CommandType::NextChapter, second.clone()).is_some());

        bus.dispatch(Command::next_chapter()).unwrap();
        assert_eq!(first.calls.load(Ordering::SeqCst), 0);
        assert_eq!(second.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_sync_dispatch_runs_on_caller_thread() {
        let bus = CommandBus::new();
        let recorder = Arc::new(ThreadRecorder(Mutex::new(None)));
        bus.register(CommandType::EndSession, recorder.clone());
        bus.dispatch(Command::end_session()).unwrap();
        assert_eq!(*recorder.0.lock().unwrap(), Some(thread::current().id()));
    }

    #[test]
    fn test_async_dispatch_runs_off_caller_thread() {
        let bus = CommandBus::new();
        let recorder = Arc::new(ThreadRecorder(Mutex::new(None)));
        bus.register(CommandType::EndSession, recorder.clone());
        let pending = bus.dispatch_async(Command::end_session()).unwrap();
        assert!(pending.wait(Duration::from_secs(2)).unwrap().is_ok());
        let ran_on = recorder.0.lock().unwrap().unwrap();
        assert_ne!(ran_on, thread::current().id());
    }

    #[test]
    fn test_same_type_is_serialized() {
        let bus = CommandBus::new();
        let handler = Counting::new(Duration::from_millis(20));
        bus.register(CommandType::NextChapter, handler.clone());

        let pending: Vec<_> = (0..4)
            .map(|_| bus.dispatch_async(Command::next_chapter()).unwrap())
            .collect();
        // A synchronous dispatch in the middle still waits its turn.
        bus.dispatch(Command::next_chapter()).unwrap();
        for p in pending {
            assert!(p.wait(Duration::from_secs(5)).unwrap().is_ok());
        }

        assert_eq!(handler.calls.load(Ordering::SeqCst), 5);
        assert_eq!(handler.max_active.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handler_error_reaches_pending() {
        let bus = CommandBus::new();
        bus.register(CommandType::SelectBook, Arc::new(Rejecting));
        let pending = bus
            .dispatch_async(Command::select_book(Book::default(), 9))
            .unwrap();
        let result = pending.wait(Duration::from_secs(2)).unwrap();
        assert!(matches!(
            result,
            Err(ReaderError::InvalidChapterIndex { index: 9, len: 3 })
        ));
    }

    #[test]
    fn test_command_type_names() {
        let names: Vec<String> = CommandType::ALL.iter().map(|t| t.to_string()).collect();
        assert_eq!(
            names,
            vec![
                "SELECT_BOOK",
                "NEXT_CHAPTER",
                "PREVIOUS_CHAPTER",
                "END_SESSION",
                "RETRY_CHAPTER"
            ]
        );
        assert_eq!(
            Command::select_book(Book::default(), 0).command_type(),
            CommandType::SelectBook
        );
    }
}
