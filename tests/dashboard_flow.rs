use lookout::cache::{load_cached, refresh_blocking, save_cached, Cached};
use lookout::codec;
use lookout::location;
use lookout::model::{DashboardState, Task};
use lookout::session::{EditBuffer, EditSession, Slice};
use lookout::shutdown;
use lookout::signal::Signal;
use lookout::storage::{FileStore, KeyValueStore, DASHBOARD_KEY, WEATHER_KEY};
use lookout::weather::WeatherReport;
use std::fs;
use tempfile::tempdir;

#[test]
fn corrupt_document_heals_on_disk() {
    let temp = tempdir().expect("tempdir");
    let store = FileStore::new(temp.path());
    fs::write(store.path_for(DASHBOARD_KEY), "{not json").expect("seed corrupt file");

    let state = codec::hydrate(&store);
    assert_eq!(state, DashboardState::default());

    let on_disk = fs::read_to_string(store.path_for(DASHBOARD_KEY)).expect("re-persisted");
    let reloaded = codec::decode(Some(&on_disk));
    assert_eq!(reloaded.state, DashboardState::default());
    assert!(!reloaded.should_persist);
}

#[test]
fn legacy_document_is_migrated_and_written_back() {
    let temp = tempdir().expect("tempdir");
    let store = FileStore::new(temp.path());
    store
        .set(
            DASHBOARD_KEY,
            r#"{"tasks": [" water plants ", {"text": "call Sam", "completed": true}, 7, ""],
                "notes": ["first", "  ", "second"],
                "links": ["https://example.com", ""]}"#,
        )
        .expect("seed legacy document");

    let state = codec::hydrate(&store);
    assert_eq!(
        state.tasks,
        vec![
            Task::new("water plants"),
            Task {
                text: "call Sam".into(),
                completed: true,
            },
        ]
    );
    assert_eq!(state.notes, "first\nsecond");
    assert_eq!(state.links, vec!["https://example.com".to_string()]);

    let second = codec::load(&store);
    assert_eq!(second.state, state);
    assert!(!second.should_persist);
}

#[test]
fn edits_survive_a_restart() {
    let temp = tempdir().expect("tempdir");
    let store = FileStore::new(temp.path());
    let state = codec::hydrate(&store);

    let mut session = EditSession::new();
    assert!(session.enter(Slice::Tasks, &state, true));
    if let Some(EditBuffer::Lines(list)) = session.buffer_mut() {
        for ch in "stretch".chars() {
            list.focused_mut().insert_char(ch);
        }
        list.split();
        for ch in "inbox zero".chars() {
            list.focused_mut().insert_char(ch);
        }
    } else {
        panic!("task editor should hold a line list");
    }
    let commit = session.commit(&state, true).expect("commit while editing");
    codec::save(&store, &commit.state).expect("save");

    let reopened = FileStore::new(temp.path());
    let restored = codec::hydrate(&reopened);
    assert_eq!(
        restored.tasks,
        vec![Task::new("stretch"), Task::new("inbox zero")]
    );
}

#[test]
fn cached_weather_gates_the_next_fetch() {
    let temp = tempdir().expect("tempdir");
    let store = FileStore::new(temp.path());
    let ttl = 60_000;

    let first = refresh_blocking(&store, WEATHER_KEY, ttl, 1_000, false, || {
        Ok::<_, String>(WeatherReport::new(21.0, 2))
    })
    .expect("first fetch stored");
    assert_eq!(first.fetched_at, 1_000);

    let reused = refresh_blocking(&store, WEATHER_KEY, ttl, 30_000, false, || {
        Err::<WeatherReport, _>("should not be called".to_string())
    });
    assert_eq!(reused, Some(first.clone()));

    let forced = refresh_blocking(&store, WEATHER_KEY, ttl, 30_000, true, || {
        Ok::<_, String>(WeatherReport::new(19.0, 61))
    })
    .expect("forced fetch stored");
    assert_eq!(forced.fetched_at, 30_000);
    assert_eq!(load_cached::<WeatherReport>(&store, WEATHER_KEY), Some(forced));
}

#[test]
fn cache_files_keep_fetched_at_next_to_the_payload() {
    let temp = tempdir().expect("tempdir");
    let store = FileStore::new(temp.path());
    save_cached(&store, WEATHER_KEY, &Cached::new(WeatherReport::new(10.0, 0), 42))
        .expect("save cache");
    let raw = fs::read_to_string(store.path_for(WEATHER_KEY)).expect("cache file");
    let value: serde_json::Value = serde_json::from_str(&raw).expect("cache is json");
    assert_eq!(value["fetchedAt"], 42);
    assert_eq!(value["temperature"], 10.0);
}

#[test]
fn location_round_trip_through_files() {
    let temp = tempdir().expect("tempdir");
    let store = FileStore::new(temp.path());
    codec::save(
        &store,
        &DashboardState {
            notes: "keep".into(),
            ..DashboardState::default()
        },
    )
    .expect("seed");

    let place = location::validate("Tokyo", 35.68, 139.69, "Asia/Tokyo").expect("valid");
    let (state, signal) = location::set(&store, place.clone()).expect("set");
    assert_eq!(signal, Signal::LocationUpdated);
    assert_eq!(state.notes, "keep");
    assert_eq!(codec::hydrate(&store).location, Some(place));

    location::clear(&store).expect("clear");
    assert_eq!(codec::hydrate(&store).location, None);
}

#[test]
fn closing_the_day_keeps_only_the_location() {
    let temp = tempdir().expect("tempdir");
    let store = FileStore::new(temp.path());
    let place = location::validate("Austin", 30.27, -97.74, "America/Chicago").expect("valid");
    codec::save(
        &store,
        &DashboardState {
            tasks: vec![Task::new("ship it")],
            notes: "retro".into(),
            links: vec!["https://example.com".into()],
            location: Some(place.clone()),
        },
    )
    .expect("seed");

    shutdown::close_day(&store).expect("close day");
    let after = codec::hydrate(&store);
    assert!(after.tasks.is_empty());
    assert!(after.notes.is_empty());
    assert!(after.links.is_empty());
    assert_eq!(after.location, Some(place));
}
