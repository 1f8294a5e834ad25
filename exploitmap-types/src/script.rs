use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Output of a single scan script run against a port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptResult {
    /// Script identifier (e.g. "vulners", "smb-vuln-ms17-010").
    pub id: String,
    /// Human-readable output text.
    #[serde(default)]
    pub output: String,
    /// Structured data attached by the script, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elements: Option<ScriptValue>,
}

/// Structured script data.
///
/// **Note:** Uses `#[serde(untagged)]` for natural JSON representation. Some
/// scanners emit tables as arrays of `[key, value]` pairs, which deserialize
/// as `List`. [`ScriptValue::get`] looks through both shapes, so callers
/// should use it rather than matching on `Map` directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScriptValue {
    String(String),
    Number(f64),
    Bool(bool),
    List(Vec<ScriptValue>),
    Map(ScriptTable),
}

/// Keyed script table in document order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScriptTable(pub Vec<(String, ScriptValue)>);

impl ScriptTable {
    pub fn get(&self, key: &str) -> Option<&ScriptValue> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn values(&self) -> impl Iterator<Item = &ScriptValue> {
        self.0.iter().map(|(_, v)| v)
    }
}

impl Serialize for ScriptTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, value) in &self.0 {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ScriptTable {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TableVisitor;

        impl<'de> Visitor<'de> for TableVisitor {
            type Value = ScriptTable;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a script table")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((key, value)) = access.next_entry()? {
                    entries.push((key, value));
                }
                Ok(ScriptTable(entries))
            }
        }

        deserializer.deserialize_map(TableVisitor)
    }
}

impl ScriptValue {
    /// Look up `key` in a table, accepting both object and pair-list encodings.
    pub fn get(&self, key: &str) -> Option<&ScriptValue> {
        match self {
            Self::Map(map) => map.get(key),
            Self::List(items) => items.iter().find_map(|item| match item {
                Self::List(pair) if pair.len() == 2 => match &pair[0] {
                    Self::String(k) if k == key => Some(&pair[1]),
                    _ => None,
                },
                _ => None,
            }),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric value of a number or a numeric string ("9.8").
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Whether this value looks like a scoring table entry (`id` + `cvss`).
    pub fn is_scored_entry(&self) -> bool {
        self.get("id").is_some() && self.get("cvss").is_some()
    }

    /// Depth-first walk over every table reachable from this value,
    /// including the value itself.
    pub fn tables(&self) -> Vec<&ScriptValue> {
        let mut out = Vec::new();
        self.collect_tables(&mut out);
        out
    }

    fn collect_tables<'a>(&'a self, out: &mut Vec<&'a ScriptValue>) {
        match self {
            Self::Map(map) => {
                out.push(self);
                for value in map.values() {
                    value.collect_tables(out);
                }
            }
            Self::List(items) => {
                out.push(self);
                for item in items {
                    item.collect_tables(out);
                }
            }
            _ => {}
        }
    }
}
