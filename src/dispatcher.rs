//! ==============================================================================
//! dispatcher.rs - inbound messages
//! ==============================================================================
//!
//! ```text
//! purpose:
//!     turns each inbound message into at most one reply.
//!
//!     requests, matched on the exact method name:
//!
//!     | method  | params                 | reply result             |
//!     |---------|------------------------|--------------------------|
//!     | set     | {id, node, value}      | the datapoint props      |
//!     | getData | "<id>"                 | {date, data}             |
//!     | add     | {"<id>": props, ...}   | true                     |
//!     | del     | "<id>"                 | true                     |
//!
//!     failures reply `{"result": false, "error": "..."}` and the session goes
//!     on. structural changes (set/add/del) rewrite the configuration file
//!     before the reply is returned.
//!
//!     `result` messages answer our registration; `error` messages are
//!     logged and dropped.
//! ```
//!
//! ==============================================================================

use crate::domain::{now_ms, Datapoint, DatapointId, Props};
use crate::framing::split_messages;
use crate::protocol::{self, classify, failure, response, Inbound, Request};
use crate::state::AgentState;

use serde_json::Value;

impl AgentState {
    /// handle every message in a received burst, returning the replies
    pub async fn handle_burst(&mut self, burst: &[u8]) -> Vec<Value> {
        tracing::debug!("message received: {}", String::from_utf8_lossy(burst));
        let mut replies = Vec::new();
        for msg in split_messages(burst) {
            match msg {
                Ok(msg) => {
                    if let Some(reply) = self.handle_message(msg).await {
                        replies.push(reply);
                    }
                }
                Err(e) => {
                    tracing::warn!("malformed message: {}", e);
                    replies.push(failure(None, protocol::ERR_MALFORMED));
                }
            }
        }
        replies
    }

    pub async fn handle_message(&mut self, msg: Value) -> Option<Value> {
        match classify(msg) {
            Inbound::Failed(err) => {
                tracing::warn!("Message failed! Result: {}", err);
                None
            }
            Inbound::Response { id, result } => {
                self.handle_response(id, &result);
                None
            }
            Inbound::Request(req) => Some(self.handle_request(req).await),
            Inbound::Malformed { id } => Some(failure(id.as_ref(), protocol::ERR_MALFORMED)),
        }
    }

    /// the answer to our registration carries the ids for the "New" datapoints
    pub fn handle_response(&mut self, id: Option<i64>, result: &Value) {
        if id.is_none() || id != self.pending_registration {
            tracing::debug!("ignoring response to unknown request {:?}", id);
            return;
        }
        self.pending_registration = None;

        let Some(ids) = protocol::assigned_ids(result) else {
            tracing::info!("registration acknowledged: {}", result);
            return;
        };
        let assigned = self.registry.assign_ids(&ids);
        tracing::info!("registration assigned {} datapoint id(s)", assigned);
        self.persist();
    }

    pub async fn handle_request(&mut self, req: Request) -> Value {
        let id = req.id.as_ref();
        match req.method.as_str() {
            "set" => self.set(id, &req.params),
            "getData" => self.get_data(id, &req.params).await,
            "add" => self.add(id, &req.params),
            "del" => self.del(id, &req.params),
            other => {
                tracing::warn!("unsupported method {:?}", other);
                failure(id, protocol::ERR_UNKNOWN_METHOD)
            }
        }
    }

    fn set(&mut self, msg_id: Option<&Value>, params: &Value) -> Value {
        let Some(dp_id) = params.get("id").and_then(DatapointId::from_value) else {
            return failure(msg_id, protocol::ERR_ID_NOT_FOUND);
        };
        let (Some(node), Some(value)) = (params.get("node").and_then(Value::as_str), params.get("value")) else {
            return failure(msg_id, protocol::ERR_INVALID_PARAMS);
        };
        let Some(datapoint) = self.registry.find_mut(dp_id) else {
            return failure(msg_id, protocol::ERR_ID_NOT_FOUND);
        };
        let Some(slot) = datapoint.props.get_mut(node) else {
            return failure(msg_id, protocol::ERR_NODE_NOT_FOUND);
        };

        *slot = value.clone();
        let props = Value::Object(datapoint.props.clone());
        tracing::info!("datapoint {}: {} set to {}", dp_id, node, value);
        self.persist();
        response(msg_id, props)
    }

    async fn get_data(&mut self, msg_id: Option<&Value>, params: &Value) -> Value {
        let Some(datapoint) = DatapointId::from_value(params).and_then(|id| self.registry.find(id)) else {
            return failure(msg_id, protocol::ERR_ID_NOT_FOUND);
        };
        let datapoint = datapoint.clone();

        let reading = match self.take_reading(&datapoint).await {
            Ok(reading) => reading,
            Err(e) => {
                tracing::warn!("getData {}: {}", params, e);
                return failure(msg_id, protocol::ERR_GET_DATA);
            }
        };
        match reading.dated(now_ms()) {
            Some(result) => response(msg_id, result),
            None => failure(msg_id, protocol::ERR_GET_DATA),
        }
    }

    fn add(&mut self, msg_id: Option<&Value>, params: &Value) -> Value {
        let Some(entries) = params.as_object() else {
            return failure(msg_id, protocol::ERR_INVALID_PARAMS);
        };

        // validate everything first so a bad entry leaves the registry untouched
        let mut incoming = Vec::with_capacity(entries.len());
        for (key, props) in entries {
            let (Some(id), Some(props)) = (DatapointId::parse(key), props.as_object()) else {
                return failure(msg_id, protocol::ERR_INVALID_PARAMS);
            };
            incoming.push(Datapoint::new(Some(id), Props::clone(props)));
        }

        let now = now_ms();
        for datapoint in incoming {
            tracing::info!("datapoint {:?} added", datapoint.name());
            self.registry.push(datapoint, now);
        }
        self.persist();
        response(msg_id, Value::Bool(true))
    }

    fn del(&mut self, msg_id: Option<&Value>, params: &Value) -> Value {
        let removed = DatapointId::from_value(params).and_then(|id| self.registry.remove(id));
        match removed {
            Some((position, datapoint)) => {
                tracing::info!("datapoint {} ({:?}) removed from position {}", params, datapoint.name(), position);
                self.persist();
                response(msg_id, Value::Bool(true))
            }
            None => failure(msg_id, protocol::ERR_ID_NOT_FOUND),
        }
    }
}
