//! ==============================================================================
//! protocol.rs - wire messages
//! ==============================================================================
//!
//! ```text
//! JSON-RPC-like messages on the upstream connection, correlated by an
//! integer `id` chosen by whichever side starts the exchange.
//!
//!     agent -> service
//!         {"method":"reg","id":1,"params":{"New":[..],"Managed":[..],"appName":..}}
//!         {"method": "data", "params":{"<dp id>": {"date":<ms>, "data":<value>}}, "id":<ms>}
//!         {"result":..., "id":<request id>}            (answer to a request)
//!         {"result":false, "error":"...", "id":...}
//!
//!     service -> agent
//!         {"method":"set"|"getData"|"add"|"del", "params":..., "id":n}
//!         {"result":..., "id":n}                         (answer to "reg")
//!         {"error":...}                                  (a request of ours failed)
//! ```
//!
//! ==============================================================================

use crate::domain::{int_from_value, DatapointId};
use crate::registry::Registry;

use serde_json::{json, Map, Value};

/// id of the one registration request sent per session
pub const REGISTRATION_MSG_ID: i64 = 1;

// error strings carried in `{"result": false, "error": ...}`
pub const ERR_ID_NOT_FOUND: &str = "ID not found!";
pub const ERR_NODE_NOT_FOUND: &str = "Node not found!";
pub const ERR_GET_DATA: &str = "Get data failed.";
pub const ERR_INVALID_PARAMS: &str = "Invalid params!";
pub const ERR_MALFORMED: &str = "Malformed message!";
pub const ERR_UNKNOWN_METHOD: &str = "Unknown method!";

/// a request from the management service
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: String,
    pub params: Value,
    pub id: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// carries `error`: something we sent was rejected
    Failed(Value),
    /// carries `result`: the answer to a request we issued
    Response { id: Option<i64>, result: Value },
    Request(Request),
    /// neither of the above, or missing `method` / `params`
    Malformed { id: Option<Value> },
}

pub fn classify(msg: Value) -> Inbound {
    let Value::Object(mut obj) = msg else {
        return Inbound::Malformed { id: None };
    };
    if let Some(err) = obj.remove("error") {
        return Inbound::Failed(err);
    }
    let id = obj.remove("id");
    if let Some(result) = obj.remove("result") {
        return Inbound::Response { id: id.as_ref().and_then(int_from_value), result };
    }
    match (obj.remove("method"), obj.remove("params")) {
        (Some(Value::String(method)), Some(params)) => Inbound::Request(Request { method, params, id }),
        _ => Inbound::Malformed { id },
    }
}

/// answer to a request, echoing its id
pub fn response(id: Option<&Value>, result: Value) -> Value {
    let mut obj = Map::new();
    obj.insert("result".into(), result);
    if let Some(id) = id {
        obj.insert("id".into(), id.clone());
    }
    Value::Object(obj)
}

/// negative answer with an explanation
pub fn failure(id: Option<&Value>, error: &str) -> Value {
    let mut out = response(id, Value::Bool(false));
    out["error"] = Value::String(error.to_string());
    out
}

/// announce our datapoints: full props for new ones, ids for known ones
pub fn registration_message(registry: &Registry, app_name: Option<&str>) -> Value {
    let mut new = Vec::new();
    let mut managed = Vec::new();
    for entry in registry.iter() {
        match entry.datapoint.id {
            Some(id) => managed.push(json!(id)),
            None => new.push(Value::Object(entry.datapoint.props.clone())),
        }
    }

    let mut params = Map::new();
    if !new.is_empty() {
        params.insert("New".into(), Value::Array(new));
    }
    if !managed.is_empty() {
        params.insert("Managed".into(), Value::Array(managed));
    }
    params.insert("appName".into(), app_name.map_or(Value::Null, |n| Value::String(n.to_string())));

    json!({
        "method": "reg",
        "id": REGISTRATION_MSG_ID,
        "params": params,
    })
}

/// ids handed back for the "New" datapoints, in order
///
/// entries that are not ids are skipped.
pub fn assigned_ids(result: &Value) -> Option<Vec<DatapointId>> {
    let items = result.as_array()?;
    Some(items.iter().filter_map(DatapointId::from_value).collect())
}

/// what a sample turned into on the wire
#[derive(Debug, Clone, PartialEq)]
pub enum Reading {
    Numeric(f64),
    /// remote name of an uploaded file
    FileName(String),
}

impl Reading {
    /// JSON literal for the value, None if it has no JSON form (NaN, inf)
    pub fn json_literal(&self) -> Option<String> {
        match self {
            Reading::Numeric(v) if v.is_finite() => Some(format!("{}", v)),
            Reading::Numeric(_) => None,
            Reading::FileName(name) => serde_json::to_string(name).ok(),
        }
    }

    /// `{"date":..,"data":..}` as used in getData answers
    pub fn dated(&self, date_ms: u64) -> Option<Value> {
        let data = match self {
            Reading::Numeric(v) => Value::from(serde_json::Number::from_f64(*v)?),
            Reading::FileName(name) => Value::String(name.clone()),
        };
        Some(json!({ "date": date_ms, "data": data }))
    }
}

/// periodic data message, written out by hand
///
/// the message id is the sample timestamp.
pub fn data_message(id: DatapointId, date_ms: u64, reading: &Reading) -> Option<String> {
    let data = reading.json_literal()?;
    Some(format!(
        "{{\"method\": \"data\", \"params\":{{\"{}\": {{\"date\":{}, \"data\":{}}}}}, \"id\":{}}}",
        id, date_ms, data, date_ms
    ))
}
