//! Control-plane scenarios: initialization, subscriber registry, cleanup.

use std::path::Path;

use tempfile::TempDir;

use maildrop::{Control, HighWaterMark, QueueError, Strategy, SubscriberId};

const MAP_SIZE: usize = 64 * 1024 * 1024;
const MAX_READERS: u32 = 128;

fn sub(id: &str) -> SubscriberId {
    SubscriberId::new(id).expect("valid subscriber id")
}

fn hwm() -> HighWaterMark {
    HighWaterMark {
        msg_timeout_secs: 500,
        max_msgs_num: 1000,
        hwm_db_size_bytes: 30 * 1024 * 1024 * 1024,
    }
}

fn init(dir: &Path, subs: &[SubscriberId]) -> Control {
    Control::init(dir, subs, MAX_READERS, MAP_SIZE, hwm(), Strategy::PruneFirst)
        .expect("initialize queue")
}

#[test]
fn init_writes_the_full_configuration() {
    let temp = TempDir::new().unwrap();
    let control = init(temp.path(), &[sub("a"), sub("b")]);

    assert!(control.check_initialized().unwrap());
    assert_eq!(control.subscriber_ids().to_vec(), vec![sub("a"), sub("b")]);
    assert_eq!(control.queue().hwm(), hwm());
    assert_eq!(control.queue().strategy(), Strategy::PruneFirst);
}

#[test]
fn reinit_keeps_the_stored_configuration() {
    let temp = TempDir::new().unwrap();
    let control = init(temp.path(), &[sub("a")]);
    drop(control);

    let other_hwm = HighWaterMark {
        msg_timeout_secs: 1,
        max_msgs_num: 2,
        hwm_db_size_bytes: 3,
    };
    let control = Control::init(
        temp.path(),
        &[sub("z")],
        MAX_READERS,
        MAP_SIZE,
        other_hwm,
        Strategy::PruneLast,
    )
    .unwrap();

    // the stored values win over the reinit arguments
    assert_eq!(control.queue().hwm(), hwm());
    assert_eq!(control.queue().strategy(), Strategy::PruneFirst);
    assert_eq!(control.subscriber_ids().to_vec(), vec![sub("a")]);
}

#[test]
fn added_subscriber_starts_receiving() {
    let temp = TempDir::new().unwrap();
    let mut control = init(temp.path(), &[sub("a")]);

    control.queue().put(b"old", &[sub("a")], false).unwrap();

    control.add_subscriber(&sub("b")).unwrap();
    assert_eq!(control.subscriber_ids().to_vec(), vec![sub("a"), sub("b")]);

    let subs = control.subscriber_ids().to_vec();
    control.queue().put(b"new", &subs, false).unwrap();

    assert_eq!(control.queue().inbox_len(&sub("a")).unwrap(), 2);
    let (_, payload) = control
        .queue()
        .front(&sub("b"))
        .unwrap()
        .expect("b only sees messages published after registration");
    assert_eq!(payload, b"new");
}

#[test]
fn adding_an_existing_subscriber_is_a_no_op() {
    let temp = TempDir::new().unwrap();
    let mut control = init(temp.path(), &[sub("a")]);

    control.add_subscriber(&sub("a")).unwrap();
    assert_eq!(control.subscriber_ids().to_vec(), vec![sub("a")]);
}

#[test]
fn removed_subscriber_releases_its_messages() {
    let temp = TempDir::new().unwrap();
    let mut control = init(temp.path(), &[sub("a"), sub("b")]);

    let subs = control.subscriber_ids().to_vec();
    let id = control.queue().put(b"m", &subs, false).unwrap();
    assert_eq!(control.queue().pending_subscribers(&id).unwrap(), Some(2));

    control.remove_subscriber(&sub("b")).unwrap();
    assert_eq!(control.subscriber_ids().to_vec(), vec![sub("a")]);
    assert_eq!(control.queue().pending_subscribers(&id).unwrap(), Some(1));

    // removing the last holder drives the count to zero and reaps the message
    control.remove_subscriber(&sub("a")).unwrap();
    assert_eq!(control.queue().count().unwrap(), 0);
}

#[test]
fn clear_all_subscribers_cleans_everything() {
    let temp = TempDir::new().unwrap();
    let control = init(temp.path(), &[sub("a"), sub("b")]);

    let subs = control.subscriber_ids().to_vec();
    for payload in [&b"one"[..], b"two", b"three"] {
        control.queue().put(payload, &subs, false).unwrap();
    }
    assert_eq!(control.queue().count().unwrap(), 3);

    control.clear_all_subscribers().unwrap();

    assert_eq!(control.queue().count().unwrap(), 0);
    assert_eq!(control.queue().inbox_len(&sub("a")).unwrap(), 0);
    assert_eq!(control.queue().inbox_len(&sub("b")).unwrap(), 0);
    // still registered, still usable
    control.queue().put(b"again", &subs, false).unwrap();
    assert_eq!(control.queue().count().unwrap(), 1);
}

#[test]
fn prune_all_messages_for_touches_one_inbox_only() {
    let temp = TempDir::new().unwrap();
    let control = init(temp.path(), &[sub("a"), sub("b")]);

    let subs = control.subscriber_ids().to_vec();
    let first = control.queue().put(b"one", &subs, false).unwrap();
    let second = control.queue().put(b"two", &subs, false).unwrap();

    control.prune_all_messages_for(&sub("a")).unwrap();

    assert_eq!(control.queue().inbox_len(&sub("a")).unwrap(), 0);
    assert_eq!(control.queue().inbox_len(&sub("b")).unwrap(), 2);
    assert_eq!(control.queue().pending_subscribers(&first).unwrap(), Some(1));
    assert_eq!(control.queue().pending_subscribers(&second).unwrap(), Some(1));
}

#[test]
fn prune_all_messages_for_unknown_subscriber_fails() {
    let temp = TempDir::new().unwrap();
    let control = init(temp.path(), &[sub("a")]);

    let err = control.prune_all_messages_for(&sub("ghost")).unwrap_err();
    assert!(matches!(err, QueueError::UnknownSubscriber { .. }));
}

#[test]
fn explicit_prune_dangling_reaps_consumed_messages() {
    let temp = TempDir::new().unwrap();
    let control = init(temp.path(), &[sub("a")]);

    control.queue().put(b"m", &[sub("a")], false).unwrap();
    control.queue().pop(&sub("a")).unwrap();
    assert_eq!(control.queue().count().unwrap(), 1);

    control.prune_dangling().unwrap();
    assert_eq!(control.queue().count().unwrap(), 0);
}
