use legado_reader::{
    cli::{Cli, Commands},
    commands::Command,
    config::Config,
    context::ReaderContext,
    gateway::{ContentGateway, HttpGateway},
    logging::{self, LogLevel},
    models::Book,
    pagination::PageTurner,
    state::{DEFAULT_ADDRESS, State},
    ui::{
        inline::InlineView,
        panel::{PanelMode, PanelView},
        render::render_page,
    },
};

use clap::Parser;
use eyre::{Result, eyre};
use std::cell::RefCell;
use std::io::{self, BufRead};
use std::rc::Rc;
use std::sync::Arc;
use std::sync::mpsc::{self, TryRecvError};
use std::thread;
use std::time::Duration;

const PUMP_INTERVAL: Duration = Duration::from_millis(50);

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(LogLevel::from_verbosity(cli.verbose, cli.debug));

    let config = match &cli.config {
        Some(path) => Config::load_from(path.clone())?,
        None => Config::new()?,
    };
    let state = State::new()?;

    match cli.command.clone().unwrap_or(Commands::Books) {
        Commands::Books => list_books(&cli, config, &state),
        Commands::Read {
            book,
            chapter,
            page_size,
        } => {
            let mut config = config;
            if let Some(page_size) = page_size {
                config.settings.page_size = page_size;
            }
            read(&cli, config, &state, &book, chapter)
        }
        Commands::History => show_history(&state),
    }
}

fn connect(cli: &Cli, config: Config, state: &State) -> Result<(ReaderContext, String)> {
    let address = match &cli.server {
        Some(server) => server.clone(),
        None => state.most_recent()?,
    };
    let target = address.clone();
    let context = ReaderContext::new(config.settings, move |store| {
        let gateway = HttpGateway::new(&target, store.clone())?;
        logging::info(format!("Using server {}", gateway.base()));
        Ok(Arc::new(gateway) as Arc<dyn ContentGateway>)
    })?;
    Ok((context, address))
}

fn fetch_shelf(context: &ReaderContext, state: &State, address: &str) -> Result<Vec<Book>> {
    match context.gateway().list_books() {
        Ok(books) => {
            state.add_address(address)?;
            Ok(books)
        }
        Err(err) => {
            if context.settings.enable_error_log() {
                logging::error(err.chain());
            }
            Err(eyre!("Could not load the bookshelf from {address}: {err}"))
        }
    }
}

fn list_books(cli: &Cli, config: Config, state: &State) -> Result<()> {
    let (context, address) = connect(cli, config, state)?;
    let books = fetch_shelf(&context, state, &address)?;
    if books.is_empty() {
        println!("The bookshelf is empty.");
        return Ok(());
    }
    for (i, book) in books.iter().enumerate() {
        let progress = book.dur_chapter_title.as_deref().unwrap_or("not started");
        println!("{:>3}. {} / {}  [{}]", i + 1, book.name, book.author, progress);
    }
    Ok(())
}

fn show_history(state: &State) -> Result<()> {
    let addresses = state.addresses()?;
    if addresses.is_empty() {
        println!("{DEFAULT_ADDRESS} (default)");
    }
    for address in addresses {
        println!("{address}");
    }
    Ok(())
}

fn find_book(books: Vec<Book>, query: &str) -> Result<Book> {
    if let Ok(number) = query.parse::<usize>() {
        if let Some(book) = number.checked_sub(1).and_then(|i| books.get(i)) {
            return Ok(book.clone());
        }
    }
    let needle = query.to_lowercase();
    books
        .into_iter()
        .find(|book| book.name.to_lowercase().contains(&needle))
        .ok_or_else(|| eyre!("No book on the shelf matches '{query}'"))
}

fn read(
    cli: &Cli,
    config: Config,
    state: &State,
    query: &str,
    chapter: Option<usize>,
) -> Result<()> {
    let (context, address) = connect(cli, config, state)?;
    let book = find_book(fetch_shelf(&context, state, &address)?, query)?;
    let start = chapter.map_or(book.dur_chapter_index, |n| n.saturating_sub(1));

    let panel = Rc::new(RefCell::new(PanelView::new(context.settings.text_style())));
    context.attach_panel(&panel);
    let (inline, _) = context.attach_inline();
    let turner = context.page_turner();

    context
        .commands
        .dispatch_async(Command::select_book(book, start))?;

    let (keys, key_rx) = mpsc::channel::<String>();
    thread::Builder::new()
        .name("stdin".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if keys.send(line).is_err() {
                    break;
                }
            }
        })?;

    let width = terminal_width();
    let mut last_screen = String::new();
    loop {
        context.bus.pump_timeout(PUMP_INTERVAL);

        let screen = draw(&context, &panel.borrow(), &inline.borrow(), width);
        if screen != last_screen {
            println!("{screen}");
            last_screen = screen;
        }

        match key_rx.try_recv() {
            Ok(key) => {
                if !handle_key(&context, &turner, key.trim()) {
                    break;
                }
            }
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => break,
        }
    }

    context.commands.dispatch(Command::end_session())?;
    context.bus.pump();
    Ok(())
}

// Returns false when the reader should quit.
fn handle_key(context: &ReaderContext, turner: &PageTurner, key: &str) -> bool {
    let outcome = match key {
        "n" | "" => turner.next_page().map(drop),
        "p" => turner.previous_page().map(drop),
        "]" => context
            .commands
            .dispatch_async(Command::next_chapter())
            .map(drop),
        "[" => context
            .commands
            .dispatch_async(Command::previous_chapter())
            .map(drop),
        "r" => context
            .commands
            .dispatch_async(Command::retry_chapter())
            .map(drop),
        "q" => return false,
        other => {
            println!("Unknown key '{other}'. n/p page, ]/[ chapter, r retry, q quit");
            Ok(())
        }
    };
    if let Err(err) = outcome {
        logging::warn(err.to_string());
    }
    if let Some(page) = context.pagination.borrow().current_page() {
        context.session.update_position(page.start);
    }
    true
}

fn draw(context: &ReaderContext, panel: &PanelView, inline: &InlineView, width: usize) -> String {
    match panel.mode() {
        PanelMode::Bookshelf => "No book open.".to_string(),
        PanelMode::Loading { label } => format!("Loading {label}..."),
        PanelMode::Error { message } => {
            format!("{message}\n(r retry, ]/[ change chapter, q quit)")
        }
        PanelMode::Content => {
            let engine = context.pagination.borrow();
            let title = inline.chapter_title().unwrap_or_default();
            let body = engine.page_text().unwrap_or_default();
            render_page(
                title,
                body,
                engine.current_index().unwrap_or(0),
                engine.total_pages(),
                width,
            )
        }
    }
}

fn terminal_width() -> usize {
    std::env::var("COLUMNS")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(80)
}
