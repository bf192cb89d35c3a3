//! Cheat-table save/load round-trips through a real file, and malformed JSON on
//! disk leaves the in-memory table unchanged.

use vigil::scanner::ValueType;
use vigil::table::{CheatTable, WatchEntry};

#[test]
fn saved_table_round_trips_through_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("table.json");

    let table = CheatTable {
        entries: vec![
            WatchEntry::Value {
                address: 0x4000,
                value_type: ValueType::I32,
                description: "hp".to_string(),
                pointer: false,
                frozen: true,
                frozen_bytes: vec![0x64, 0, 0, 0],
                last_bytes: vec![0x64, 0, 0, 0],
                previous_bytes: vec![0x64, 0, 0, 0],
            },
            WatchEntry::Script {
                description: "nop injector".to_string(),
                script: "[ENABLE]\npatch 0x1000 90 90\n".to_string(),
                active: false,
            },
        ],
    };
    table.save(&path).unwrap();

    let loaded = CheatTable::load(&path, &CheatTable::new());
    assert_eq!(loaded.entries.len(), 2);
}

#[test]
fn loading_malformed_json_keeps_previous_table() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.json");
    std::fs::write(&path, "{ this is not json").unwrap();

    let previous = CheatTable {
        entries: vec![WatchEntry::Script {
            description: "kept".to_string(),
            script: "[ENABLE]\n".to_string(),
            active: true,
        }],
    };

    let loaded = CheatTable::load(&path, &previous);
    assert_eq!(loaded.entries.len(), 1);
}
