use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::path::PathBuf;

/// free-form datapoint attributes ("name", "dataType", "sampleRate", ...)
pub type Props = Map<String, Value>;

/// server-assigned datapoint identifier
///
/// the wire carries it either as a number or as a numeric string
/// (`"params": "7"`), both decode to the same id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DatapointId(pub i64);

impl DatapointId {
    /// lenient decode of an id carried in a json value
    pub fn from_value(value: &Value) -> Option<Self> {
        int_from_value(value).map(DatapointId)
    }

    pub fn parse(s: &str) -> Option<Self> {
        s.trim().parse::<i64>().ok().map(DatapointId)
    }
}

impl fmt::Display for DatapointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for DatapointId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.0)
    }
}

impl<'de> Deserialize<'de> for DatapointId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        DatapointId::from_value(&value)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid datapoint id: {}", value)))
    }
}

/// integer carried as a json number or as a numeric string
pub fn int_from_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// `deserialize_with` helper for integer fields written either way
pub fn lenient_int<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: TryFrom<i64>,
{
    let value = Value::deserialize(deserializer)?;
    int_from_value(&value)
        .and_then(|n| T::try_from(n).ok())
        .ok_or_else(|| serde::de::Error::custom(format!("expected an integer, got {}", value)))
}

/// like `lenient_int`, null reads as absent
pub fn lenient_int_opt<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: TryFrom<i64>,
{
    let value = Value::deserialize(deserializer)?;
    if value.is_null() {
        return Ok(None);
    }
    int_from_value(&value)
        .and_then(|n| T::try_from(n).ok())
        .map(Some)
        .ok_or_else(|| serde::de::Error::custom(format!("expected an integer, got {}", value)))
}

/// how a datapoint's samples travel upstream
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataType {
    /// a floating value embedded in the data message
    Numeric,
    /// a local file uploaded to the cloud store, reported by name
    File,
}

impl DataType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "numeric" => Some(DataType::Numeric),
            "file" => Some(DataType::File),
            _ => None,
        }
    }
}

/// one value produced by a sampler
#[derive(Clone, Debug, PartialEq)]
pub enum Sample {
    Numeric(f64),
    File(PathBuf),
}

/// a datapoint as stored in the configuration document
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Datapoint {
    /// absent until the management service assigns one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<DatapointId>,
    #[serde(default)]
    pub props: Props,
    /// any other keys, written back untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Datapoint {
    pub fn new(id: Option<DatapointId>, props: Props) -> Self {
        Self { id, props, extra: Map::new() }
    }

    pub fn prop(&self, name: &str) -> Option<&Value> {
        self.props.get(name)
    }

    pub fn prop_str(&self, name: &str) -> Option<&str> {
        self.props.get(name).and_then(Value::as_str)
    }

    /// integer property; numeric strings and whole floats coerce
    pub fn prop_i64(&self, name: &str) -> Option<i64> {
        match self.props.get(name)? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// floating property; integers and numeric strings coerce
    pub fn prop_f64(&self, name: &str) -> Option<f64> {
        match self.props.get(name)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn name(&self) -> &str {
        self.prop_str("name").unwrap_or("")
    }

    pub fn data_type(&self) -> Option<DataType> {
        self.prop_str("dataType").and_then(DataType::parse)
    }

    /// configured sampling period in milliseconds
    ///
    /// `sampleRate` is in seconds and may be fractional. missing, negative
    /// or non-numeric values mean the datapoint is never scheduled.
    pub fn sample_period_ms(&self) -> Option<u64> {
        let secs = self.prop_f64("sampleRate")?;
        if !secs.is_finite() || secs < 0.0 {
            return None;
        }
        Some((secs * 1000.0) as u64)
    }
}

/// get current timestamp in milliseconds (unix epoch)
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
