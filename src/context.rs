use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use eyre::Result;

use crate::commands::CommandBus;
use crate::error::ReaderError;
use crate::event_bus::{EventBus, SubscriberId, Subscription};
use crate::gateway::ContentGateway;
use crate::pagination::{BoundaryPolicy, PageTurner, PaginationEngine};
use crate::session::{ReadingSessionManager, SessionCommandHandler};
use crate::settings::{Settings, SettingsStore};
use crate::ui::inline::InlineView;
use crate::ui::panel::PanelView;
use crate::worker::WorkerPool;

pub const FETCH_WORKERS: usize = 4;

/// Everything one reader instance needs, wired once on the UI thread.
///
/// The context is `!Send` because it owns the [`EventBus`]; the session
/// manager, settings store and command bus inside it are shareable.
pub struct ReaderContext {
    pub bus: EventBus,
    pub settings: SettingsStore,
    pub commands: Arc<CommandBus>,
    pub session: ReadingSessionManager,
    pub pagination: Rc<RefCell<PaginationEngine>>,
    gateway: Arc<dyn ContentGateway>,
}

impl ReaderContext {
    /// `connect` builds the gateway once the settings store exists, since
    /// request parameters are read from it.
    pub fn new(
        settings: Settings,
        connect: impl FnOnce(&SettingsStore) -> Result<Arc<dyn ContentGateway>, ReaderError>,
    ) -> Result<Self> {
        let bus = EventBus::new();
        let settings = SettingsStore::new(settings, bus.publisher());
        let gateway = connect(&settings)?;
        let pool = Arc::new(WorkerPool::new("fetch", FETCH_WORKERS)?);
        let session = ReadingSessionManager::new(
            Arc::clone(&gateway),
            pool,
            bus.publisher(),
            settings.clone(),
        );
        let commands = Arc::new(CommandBus::new());
        SessionCommandHandler::register_all(&commands, &session);
        let pagination = Rc::new(RefCell::new(PaginationEngine::new(bus.publisher())));

        Ok(Self {
            bus,
            settings,
            commands,
            session,
            pagination,
            gateway,
        })
    }

    pub fn with_gateway(settings: Settings, gateway: Arc<dyn ContentGateway>) -> Result<Self> {
        Self::new(settings, move |_| Ok(gateway))
    }

    pub fn gateway(&self) -> &Arc<dyn ContentGateway> {
        &self.gateway
    }

    /// Subscribe the panel to every event family it renders.
    pub fn attach_panel(&self, panel: &Rc<RefCell<PanelView>>) -> SubscriberId {
        self.bus.subscribe(
            Subscription::new("panel")
                .reading(panel.clone())
                .pagination(panel.clone())
                .settings(panel.clone()),
        )
    }

    /// Create the inline view over the shared pagination engine.
    pub fn attach_inline(&self) -> (Rc<RefCell<InlineView>>, SubscriberId) {
        let view = Rc::new(RefCell::new(InlineView::new(
            Rc::clone(&self.pagination),
            self.settings.clone(),
        )));
        let id = self.bus.subscribe(
            Subscription::new("inline")
                .reading(view.clone())
                .settings(view.clone()),
        );
        (view, id)
    }

    pub fn page_turner(&self) -> PageTurner {
        let policy = BoundaryPolicy::from_setting(self.settings.snapshot().cross_chapter_paging);
        PageTurner::new(
            Rc::clone(&self.pagination),
            Arc::clone(&self.commands),
            policy,
        )
    }
}
