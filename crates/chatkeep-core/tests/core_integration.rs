#![allow(clippy::unwrap_used, clippy::expect_used)]

use chatkeep_core::*;
use chrono::{Duration, TimeZone, Utc};

// ---------------------------------------------------------------------------
// 1. Records carry store precision
// ---------------------------------------------------------------------------

#[test]
fn records_truncate_to_milliseconds() {
    let at = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
    let rec = ActiveSessionRecord::new("u1", SessionId::generate(), at, Duration::seconds(30))
        .unwrap();
    assert_eq!(rec.created_at.timestamp_subsec_nanos(), 123_000_000);
    assert_eq!(rec.updated_at, rec.created_at);
    assert_eq!(rec.expires_at - rec.created_at, Duration::seconds(30));
}

// ---------------------------------------------------------------------------
// 2. Message ordering follows sort keys
// ---------------------------------------------------------------------------

#[test]
fn later_sessions_and_later_turns_sort_after() {
    let s1 = SessionId::generate();
    let s2 = SessionId::generate();
    let t = |secs| Utc.timestamp_opt(secs, 0).unwrap();

    let a = MessageRecord::new("u1", s1, SenderType::Human, "first", t(10)).unwrap();
    let b = MessageRecord::new("u1", s1, SenderType::Assistant, "second", t(11)).unwrap();
    let c = MessageRecord::new("u1", s2, SenderType::Human, "third", t(12)).unwrap();

    assert!(a.sort_key < b.sort_key);
    assert!(b.sort_key < c.sort_key);
}

// ---------------------------------------------------------------------------
// 3. Error Display and From impls
// ---------------------------------------------------------------------------

#[test]
fn error_display_and_from_impls() {
    let err = ChatkeepError::Generation("upstream 503".to_string());
    assert_eq!(err.to_string(), "Generation failed: upstream 503");

    let json_err: ChatkeepError = serde_json::from_str::<SessionId>("42").unwrap_err().into();
    assert!(matches!(json_err, ChatkeepError::Json(_)));
    assert!(!json_err.is_retryable());

    let io_err: ChatkeepError = std::io::Error::other("disk gone").into();
    assert!(io_err.to_string().starts_with("IO error"));
}

// ---------------------------------------------------------------------------
// 4. Metadata JSON shape
// ---------------------------------------------------------------------------

#[test]
fn metadata_serializes_session_id_as_plain_string() {
    let sid = SessionId::generate();
    let meta = SessionMetadataRecord::open("u1", sid, Utc::now()).unwrap();
    let json = serde_json::to_value(&meta).unwrap();
    assert_eq!(json["session_id"], serde_json::json!(sid.to_string()));
    assert_eq!(json["session_summary"], SESSION_NOT_FINISHED);
    assert!(json["finished_at"].is_null());
}

// ---------------------------------------------------------------------------
// 5. Manual clock drives expiry
// ---------------------------------------------------------------------------

#[test]
fn manual_clock_drives_expiry() {
    let clock = ManualClock::new(Utc.timestamp_opt(0, 0).unwrap());
    let rec = ActiveSessionRecord::new("u1", SessionId::generate(), clock.now(), Duration::seconds(60))
        .unwrap();
    clock.advance(Duration::seconds(59));
    assert!(!rec.is_expired(clock.now()));
    clock.advance(Duration::seconds(1));
    assert!(rec.is_expired(clock.now()));
}
