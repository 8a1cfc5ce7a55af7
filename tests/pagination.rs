mod common;

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use common::{Recorder, ScriptedGateway, book, pump_for, pump_until};
use legado_reader::commands::Command;
use legado_reader::context::ReaderContext;
use legado_reader::event_bus::Subscription;
use legado_reader::events::{PaginationEvent, ReadingEventType};
use legado_reader::pagination::{BoundaryPolicy, PageMove, paginate};
use legado_reader::settings::Settings;

#[test]
fn test_pagination_covers_every_char_for_many_budgets() {
    let text = "第一回 甄士隐梦幻识通灵 贾雨村风尘怀闺秀\n\n\
                此开卷第一回也。作者自云：因曾历过一番梦幻之后，故将真事隐去，\
                而借通灵之说，撰此《石头记》一书也。\n\
                Plain ASCII words follow here to mix scripts and spaces.";
    let len = text.chars().count();
    for budget in 1..=64 {
        let pages = paginate(text, budget);
        assert_eq!(pages.first().unwrap().start, 0);
        assert_eq!(pages.last().unwrap().end, len);
        let mut expected_start = 0;
        for (i, page) in pages.iter().enumerate() {
            assert_eq!(page.index, i);
            assert_eq!(page.start, expected_start);
            assert!(page.end > page.start);
            assert!(page.len() <= budget);
            expected_start = page.end;
        }
        assert_eq!(pages, paginate(text, budget));
    }
}

fn reader(cross_chapter_paging: bool) -> (ReaderContext, Rc<RefCell<Recorder>>) {
    let gateway = Arc::new(ScriptedGateway::new(3, 12));
    let settings = Settings {
        page_size: 4,
        cross_chapter_paging,
        ..Settings::default()
    };
    let context = ReaderContext::with_gateway(settings, gateway).unwrap();
    let recorder = Rc::new(RefCell::new(Recorder::default()));
    context.bus.subscribe(
        Subscription::new("recorder")
            .reading(recorder.clone())
            .pagination(recorder.clone()),
    );
    context.attach_inline();
    context
        .commands
        .dispatch(Command::select_book(book("Dream", 0, 0), 0))
        .unwrap();
    pump_until(&context.bus, &recorder, ReadingEventType::ChapterLoaded, 1);
    (context, recorder)
}

#[test]
fn test_clamp_policy_never_changes_chapter() {
    let (context, recorder) = reader(false);
    let turner = context.page_turner();
    assert_eq!(turner.policy(), BoundaryPolicy::Clamp);

    assert_eq!(turner.next_page().unwrap(), PageMove::Moved(1));
    assert_eq!(turner.next_page().unwrap(), PageMove::Moved(2));
    assert_eq!(turner.next_page().unwrap(), PageMove::AtBoundary);
    assert_eq!(turner.previous_page().unwrap(), PageMove::Moved(1));
    pump_for(&context.bus, Duration::from_millis(150));

    assert_eq!(recorder.borrow().count(ReadingEventType::ChapterLoading), 1);
    assert_eq!(recorder.borrow().count(ReadingEventType::ChapterLoaded), 1);
    assert_eq!(context.session.snapshot().unwrap().chapter_index, 0);
}

#[test]
fn test_cross_chapter_policy_turns_boundary_into_command() {
    let (context, recorder) = reader(true);
    let turner = context.page_turner();
    assert_eq!(turner.policy(), BoundaryPolicy::CrossChapter);

    context.pagination.borrow_mut().go_to_last_page();
    assert_eq!(turner.next_page().unwrap(), PageMove::AtBoundary);

    pump_until(&context.bus, &recorder, ReadingEventType::ChapterLoaded, 2);
    assert_eq!(context.session.snapshot().unwrap().chapter_index, 1);
    assert_eq!(context.pagination.borrow().current_index(), Some(0));

    assert_eq!(turner.previous_page().unwrap(), PageMove::AtBoundary);
    pump_until(&context.bus, &recorder, ReadingEventType::ChapterLoaded, 3);
    assert_eq!(context.session.snapshot().unwrap().chapter_index, 0);
    // Coming back lands on the last page of the previous chapter.
    assert_eq!(context.pagination.borrow().current_index(), Some(2));
}

#[test]
fn test_page_changed_reports_position() {
    let (context, recorder) = reader(false);
    context.bus.pump();
    recorder.borrow_mut().pages.clear();

    context.pagination.borrow_mut().go_to_page(usize::MAX);
    context.pagination.borrow_mut().go_to_page(2);
    context.bus.pump();

    assert_eq!(
        recorder.borrow().pages,
        vec![PaginationEvent::PageChanged {
            current_page: 2,
            total_pages: 3,
            start_offset: 8,
        }]
    );
}
