//! Cheat-table model and persistence: the rows a caller has chosen to keep an eye
//! on or act on repeatedly, independent of any single scan's result set.

pub mod heuristics;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::scanner::ValueType;

fn value_type_tag(t: ValueType) -> &'static str {
    match t {
        ValueType::Byte => "Byte",
        ValueType::I16 => "2 Bytes",
        ValueType::I32 => "4 Bytes",
        ValueType::I64 => "8 Bytes",
        ValueType::F32 => "Float",
        ValueType::F64 => "Double",
        ValueType::Aob => "AOB",
        ValueType::String => "String",
    }
}

fn value_type_from_tag(tag: &str) -> Option<ValueType> {
    match tag {
        "Byte" => Some(ValueType::Byte),
        "2 Bytes" => Some(ValueType::I16),
        "4 Bytes" => Some(ValueType::I32),
        "8 Bytes" => Some(ValueType::I64),
        "Float" => Some(ValueType::F32),
        "Double" => Some(ValueType::F64),
        "AOB" => Some(ValueType::Aob),
        "String" => Some(ValueType::String),
        _ => None,
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect::<Vec<_>>().join(" ")
}

fn hex_decode(s: &str) -> Vec<u8> {
    s.split_whitespace()
        .filter_map(|tok| u8::from_str_radix(tok, 16).ok())
        .collect()
}

/// One row in the cheat table: either a watched value address, or a named script
/// with its own enable/disable state.
#[derive(Debug, Clone)]
pub enum WatchEntry {
    Value {
        address: u64,
        value_type: ValueType,
        description: String,
        pointer: bool,
        frozen: bool,
        /// Bytes re-imposed on the victim each freeze tick.
        frozen_bytes: Vec<u8>,
        /// Most recently observed bytes.
        last_bytes: Vec<u8>,
        /// Bytes observed the tick before `last_bytes`, for change-pulse detection.
        previous_bytes: Vec<u8>,
    },
    Script {
        description: String,
        script: String,
        active: bool,
    },
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum WireEntry {
    Script {
        #[serde(rename = "isScript")]
        is_script: IsScriptTrue,
        description: String,
        script: String,
        active: bool,
    },
    Value {
        address: String,
        #[serde(rename = "type")]
        value_type: String,
        description: String,
        #[serde(default)]
        pointer: bool,
        #[serde(default)]
        frozen: bool,
        #[serde(rename = "valueBytes", default)]
        value_bytes: String,
    },
}

/// Marker type so the `isScript` field only matches `true` in the untagged enum,
/// letting serde distinguish the two variants by the field's value, not just its
/// presence.
#[derive(Debug)]
struct IsScriptTrue;

impl Serialize for IsScriptTrue {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_bool(true)
    }
}

impl<'de> Deserialize<'de> for IsScriptTrue {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let value = bool::deserialize(d)?;
        if value {
            Ok(IsScriptTrue)
        } else {
            Err(serde::de::Error::custom("isScript must be true"))
        }
    }
}

#[derive(Serialize, Deserialize)]
struct WireTable {
    entries: Vec<WireEntry>,
}

/// The full set of rows a caller has saved, plus load/save against JSON.
#[derive(Debug, Clone, Default)]
pub struct CheatTable {
    pub entries: Vec<WatchEntry>,
}

impl CheatTable {
    pub fn new() -> Self {
        CheatTable::default()
    }

    pub fn to_json(&self) -> String {
        let wire = WireTable {
            entries: self.entries.iter().map(to_wire).collect(),
        };
        serde_json::to_string_pretty(&wire).unwrap_or_else(|_| "{\"entries\":[]}".to_string())
    }

    /// Parses `json` into a table. Malformed JSON is "no change": returns `None`
    /// and logs a warning rather than panicking or erroring the caller out.
    pub fn from_json(json: &str) -> Option<CheatTable> {
        match serde_json::from_str::<WireTable>(json) {
            Ok(wire) => Some(CheatTable {
                entries: wire.entries.iter().filter_map(from_wire).collect(),
            }),
            Err(e) => {
                log::warn!("[table] malformed cheat table JSON, keeping previous table: {e}");
                None
            }
        }
    }

    /// Loads from `path`. On any I/O or parse failure, returns `previous` unchanged.
    pub fn load(path: impl AsRef<Path>, previous: &CheatTable) -> CheatTable {
        match std::fs::read_to_string(path.as_ref()) {
            Ok(text) => CheatTable::from_json(&text).unwrap_or_else(|| previous.clone()),
            Err(e) => {
                log::warn!("[table] failed to read {:?}: {e}", path.as_ref());
                previous.clone()
            }
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> crate::error::Result<()> {
        std::fs::write(path.as_ref(), self.to_json())
            .map_err(|e| crate::error::Error::io(path.as_ref(), e))
    }
}

fn to_wire(entry: &WatchEntry) -> WireEntry {
    match entry {
        WatchEntry::Value {
            address,
            value_type,
            description,
            pointer,
            frozen,
            frozen_bytes,
            ..
        } => WireEntry::Value {
            address: format!("0x{address:x}"),
            value_type: value_type_tag(*value_type).to_string(),
            description: description.clone(),
            pointer: *pointer,
            frozen: *frozen,
            value_bytes: hex_encode(frozen_bytes),
        },
        WatchEntry::Script {
            description,
            script,
            active,
        } => WireEntry::Script {
            is_script: IsScriptTrue,
            description: description.clone(),
            script: script.clone(),
            active: *active,
        },
    }
}

fn from_wire(entry: &WireEntry) -> Option<WatchEntry> {
    match entry {
        WireEntry::Script {
            description,
            script,
            active,
            ..
        } => Some(WatchEntry::Script {
            description: description.clone(),
            script: script.clone(),
            active: *active,
        }),
        WireEntry::Value {
            address,
            value_type,
            description,
            pointer,
            frozen,
            value_bytes,
        } => {
            let addr_str = address.strip_prefix("0x").unwrap_or(address);
            let address = u64::from_str_radix(addr_str, 16).ok()?;
            let value_type = value_type_from_tag(value_type)?;
            let bytes = hex_decode(value_bytes);
            Some(WatchEntry::Value {
                address,
                value_type,
                description: description.clone(),
                pointer: *pointer,
                frozen: *frozen,
                frozen_bytes: bytes.clone(),
                last_bytes: bytes.clone(),
                previous_bytes: bytes,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_value_entry() {
        let table = CheatTable {
            entries: vec![WatchEntry::Value {
                address: 0x4000,
                value_type: ValueType::I32,
                description: "hp".to_string(),
                pointer: false,
                frozen: true,
                frozen_bytes: vec![0x64, 0, 0, 0],
                last_bytes: vec![0x64, 0, 0, 0],
                previous_bytes: vec![0x64, 0, 0, 0],
            }],
        };
        let json = table.to_json();
        let loaded = CheatTable::from_json(&json).unwrap();
        match &loaded.entries[0] {
            WatchEntry::Value { address, frozen, .. } => {
                assert_eq!(*address, 0x4000);
                assert!(*frozen);
            }
            _ => panic!("expected value entry"),
        }
    }

    #[test]
    fn round_trips_script_entry() {
        let table = CheatTable {
            entries: vec![WatchEntry::Script {
                description: "inject".to_string(),
                script: "[ENABLE]\npatch 0x1000 90\n".to_string(),
                active: false,
            }],
        };
        let json = table.to_json();
        let loaded = CheatTable::from_json(&json).unwrap();
        assert_eq!(loaded.entries.len(), 1);
    }

    #[test]
    fn malformed_json_yields_none() {
        assert!(CheatTable::from_json("{not json").is_none());
    }
}
