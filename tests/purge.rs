//! Purging the target project.

mod common;

use common::fakes::FakeTarget;
use common::init_test_logging;
use ticket_migrate::cli::commands::purge::purge;

#[test]
fn failed_delete_is_reported_and_the_rest_are_deleted() {
    init_test_logging();
    let target = FakeTarget::new();
    let first = target.seed("ABC-1 First");
    let stuck = target.seed("ABC-2 Second");
    let third = target.seed("ABC-3 Third");
    target.fail_delete.borrow_mut().insert(stuck);

    let report = purge(&target).expect("listing succeeds");

    assert_eq!(report.deleted, 2);
    assert_eq!(report.failed, [stuck]);
    assert_eq!(target.calls_named("delete"), 3);
    assert!(target.item_by_key("ABC-2").is_some());
    assert!(!target.items.borrow().contains_key(&first));
    assert!(!target.items.borrow().contains_key(&third));
}

#[test]
fn empty_project_deletes_nothing() {
    init_test_logging();
    let target = FakeTarget::new();

    let report = purge(&target).expect("listing succeeds");

    assert_eq!(report.deleted, 0);
    assert!(report.failed.is_empty());
    assert_eq!(target.calls_named("delete"), 0);
}
