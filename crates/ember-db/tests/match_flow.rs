//! End-to-end walk through the swipe → match → chat → unmatch lifecycle,
//! exercised the way the route layer drives the store.

use ember_db::users::NewTelegramUser;
use ember_db::{Database, StoreError};
use ember_types::models::{Gender, LookingFor, MessageKind, SwipeAction};
use uuid::Uuid;

fn signup(db: &Database, telegram_id: i64, name: &str) -> Uuid {
    let (user, created) = db
        .upsert_telegram_user(&NewTelegramUser {
            telegram_id,
            username: None,
            first_name: name.to_string(),
            last_name: None,
            age: Some(28),
            gender: Gender::Other,
            looking_for: LookingFor::Both,
            bio: Some("looking for something real".into()),
            interests: vec!["hiking".into()],
        })
        .unwrap();
    assert!(created);
    db.add_photo(user.id, "/photos/me.jpg", true).unwrap();
    user.id
}

#[test]
fn swipe_match_chat_unmatch_lifecycle() {
    let db = Database::open_in_memory().unwrap();
    let u1 = signup(&db, 1001, "Uma");
    let u2 = signup(&db, 1002, "Viktor");

    // U1 browses: U2 appears as a candidate.
    let (candidates, _) = db.next_candidates(u1, 10).unwrap();
    assert!(candidates.iter().any(|c| c.id == u2));

    // U1 likes U2: no match yet, and U2 leaves U1's candidate pool for good.
    let outcome = db.record_swipe(u1, u2, SwipeAction::Like).unwrap();
    assert!(!outcome.is_match);
    let (candidates, _) = db.next_candidates(u1, 10).unwrap();
    assert!(candidates.iter().all(|c| c.id != u2));

    // U2 likes back: the second swipe reports the match.
    let outcome = db.record_swipe(u2, u1, SwipeAction::Like).unwrap();
    assert!(outcome.is_match);

    // Both sides see the match.
    let matches = db.list_matches(u1).unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].user.id, u2);
    assert!(db.list_matches(u2).unwrap().iter().any(|m| m.user.id == u1));

    // Chat opens.
    let sent = db
        .send_message(u1, u2, "hi", MessageKind::Text, None, None)
        .unwrap();
    let (messages, _) = db.get_conversation(u2, u1, 50, 0).unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, sent.id);
    assert_eq!(messages[0].content, "hi");
    assert!(!messages[0].is_read, "fetching alone does not mark read");

    // U2 views the chat; the client then marks it read explicitly.
    db.mark_conversation_read(u2, u1).unwrap();
    let (messages, _) = db.get_conversation(u2, u1, 50, 0).unwrap();
    assert!(messages[0].is_read);

    // The match also shows up in U2's inbox with the last message.
    let inbox = db.list_conversations(u2).unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].user.id, u1);
    assert_eq!(inbox[0].last_message.content, "hi");
    assert_eq!(inbox[0].unread_count, 0);

    // U1 unmatches: messaging rights are gone for the very next call and the
    // history is purged.
    db.unmatch(u1, u2).unwrap();
    assert!(matches!(
        db.send_message(u1, u2, "hello", MessageKind::Text, None, None),
        Err(StoreError::NotMatched)
    ));
    assert!(db.list_matches(u1).unwrap().is_empty());
    assert!(db.list_conversations(u2).unwrap().is_empty());
}

#[test]
fn match_reports_symmetrically_regardless_of_order() {
    let db = Database::open_in_memory().unwrap();
    let a = signup(&db, 1, "Ana");
    let b = signup(&db, 2, "Ben");
    let c = signup(&db, 3, "Cleo");

    // a → b then b → a
    assert!(!db.record_swipe(a, b, SwipeAction::Like).unwrap().is_match);
    assert!(db.record_swipe(b, a, SwipeAction::Like).unwrap().is_match);

    // c → a then a → c, superlikes count the same as likes
    assert!(!db.record_swipe(c, a, SwipeAction::Superlike).unwrap().is_match);
    assert!(db.record_swipe(a, c, SwipeAction::Like).unwrap().is_match);

    let ids: Vec<Uuid> = db.list_matches(a).unwrap().iter().map(|m| m.user.id).collect();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&b));
    assert!(ids.contains(&c));
}
