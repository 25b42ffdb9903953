//! Wire types exchanged with the controller
//!
//! The controller speaks a line-oriented JSON dialect. Every outbound message
//! is a request carrying a `messageID` and a `command`; everything else is
//! command specific and sits at the top level of the object.
//!
//! Inbound messages come in two shapes:
//!
//! 1. **Response**: has a `response` code field (`"200"` on success) and
//!    echoes the `messageID` of the request it answers.
//! 2. **Notification**: pushed by the controller when equipment state changes
//!    (`NotifyList`). No response code, carries an `objectList` of changed
//!    objects and their new attribute values.
//!
//! # Identifier mismatch
//!
//! The controller is known to answer failed requests with a `messageID` that
//! does not match the request. The types here keep the raw identifier as a
//! string and leave correlation policy to the caller.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Top-level request parameters, flattened next to `messageID` and `command`
pub type Params = Map<String, Value>;

/// Attribute name to value mapping for a single object
pub type AttributeValues = Map<String, Value>;

/// Command names understood by the controller
pub mod commands {
    /// Read attribute values once
    pub const GET_PARAM_LIST: &str = "GetParamList";
    /// Read attribute values and register for change notifications
    pub const REQUEST_PARAM_LIST: &str = "RequestParamList";
    /// Write attribute values
    pub const SET_PARAM_LIST: &str = "SetParamList";
    /// Push notification carrying changed attributes
    pub const NOTIFY_LIST: &str = "NotifyList";
}

/// Object name of the controller's system object
pub const SYSTEM_OBJECT: &str = "_5451";

/// Response code reported for successful requests
pub const RESPONSE_OK: &str = "200";

/// Outbound request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Request identifier, a decimal rendering of an increasing counter
    #[serde(rename = "messageID")]
    pub message_id: String,
    /// Command name
    pub command: String,
    /// Command-specific fields
    #[serde(flatten)]
    pub params: Params,
}

impl Request {
    /// Create a request with the given numeric identifier
    pub fn new(id: u64, command: impl Into<String>, params: Params) -> Self {
        Self {
            message_id: id.to_string(),
            command: command.into(),
            params,
        }
    }
}

/// Response to a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Identifier echoed by the controller (not always the request's)
    #[serde(rename = "messageID")]
    pub message_id: String,
    /// Command echoed by the controller
    pub command: String,
    /// Response code, `"200"` on success
    pub response: String,
    /// Remaining fields of the response object
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl Response {
    /// Whether the controller reported success
    pub fn is_success(&self) -> bool {
        self.response == RESPONSE_OK
    }

    /// Numeric identifier, if the echoed `messageID` is a number
    pub fn id(&self) -> Option<u64> {
        self.message_id.trim().parse().ok()
    }

    /// Object updates carried in the response's `objectList`
    ///
    /// Entries that are not `{objnam, params}` objects are skipped.
    pub fn object_updates(&self) -> Vec<ObjectUpdate> {
        object_list(self.body.get("objectList"))
    }
}

/// Server-pushed state change notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Notification command, normally `NotifyList`
    pub command: String,
    /// Changed objects
    #[serde(rename = "objectList", default)]
    pub object_list: Vec<ObjectUpdate>,
}

/// New attribute values for one object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectUpdate {
    /// Object identifier
    pub objnam: String,
    /// Changed attributes
    #[serde(default)]
    pub params: AttributeValues,
}

impl ObjectUpdate {
    /// Create an update for `objnam`
    pub fn new(objnam: impl Into<String>, params: AttributeValues) -> Self {
        Self {
            objnam: objnam.into(),
            params,
        }
    }

    /// Names of the attributes carried by this update
    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.params.keys().map(String::as_str)
    }
}

/// Inbound message, as produced by the codec
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Answer to a request
    Response(Response),
    /// Unsolicited state change
    Notification(Notification),
}

impl Message {
    /// Check if this is a response
    pub fn is_response(&self) -> bool {
        matches!(self, Message::Response(_))
    }

    /// Check if this is a notification
    pub fn is_notification(&self) -> bool {
        matches!(self, Message::Notification(_))
    }
}

/// One `{objnam, keys}` entry of a read or registration request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeQuery {
    /// Object identifier
    pub objnam: String,
    /// Attribute names
    pub keys: Vec<String>,
}

/// Identity of the controller, read during the connection handshake
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemInfo {
    /// Property (installation) name
    pub prop_name: String,
    /// Firmware version
    pub sw_version: String,
    /// Whether the controller reports metric units
    pub uses_metric: bool,
}

impl SystemInfo {
    /// Extract system information from a handshake response
    pub fn from_response(response: &Response) -> Option<Self> {
        let update = response
            .object_updates()
            .into_iter()
            .find(|u| u.objnam == SYSTEM_OBJECT)?;
        let text = |key: &str| {
            update
                .params
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        Some(Self {
            prop_name: text("PROPNAME"),
            sw_version: text("VER"),
            uses_metric: text("MODE") == "METRIC",
        })
    }
}

/// Parameters of a read request for the given objects
pub fn query_params(queries: &[AttributeQuery]) -> Params {
    let mut params = Params::new();
    params.insert("condition".into(), Value::String(String::new()));
    params.insert("objectList".into(), json!(queries));
    params
}

/// Parameters of the handshake request (system identity)
pub fn handshake_params() -> Params {
    query_params(&[AttributeQuery {
        objnam: SYSTEM_OBJECT.into(),
        keys: ["VER", "MODE", "SNAME", "PROPNAME"]
            .iter()
            .map(|k| k.to_string())
            .collect(),
    }])
}

/// Parameters of the keepalive probe: a single attribute of the system object
pub fn keepalive_params() -> Params {
    query_params(&[AttributeQuery {
        objnam: SYSTEM_OBJECT.into(),
        keys: vec!["MODE".into()],
    }])
}

/// Parameters of a `SetParamList` request changing attributes of one object
pub fn change_params(objnam: &str, values: AttributeValues) -> Params {
    let mut params = Params::new();
    params.insert(
        "objectList".into(),
        json!([{ "objnam": objnam, "params": values }]),
    );
    params
}

fn object_list(value: Option<&Value>) -> Vec<ObjectUpdate> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| serde_json::from_value(item.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(body: Value) -> Response {
        let mut value = json!({"messageID": "7", "command": "GetParamList", "response": "200"});
        if let (Some(target), Some(extra)) = (value.as_object_mut(), body.as_object()) {
            target.extend(extra.clone());
        }
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_request_serializes_flat() {
        let mut params = Params::new();
        params.insert("condition".into(), json!(""));
        let request = Request::new(3, commands::GET_PARAM_LIST, params);

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["messageID"], "3");
        assert_eq!(value["command"], "GetParamList");
        assert_eq!(value["condition"], "");
    }

    #[test]
    fn test_response_id_parsing() {
        let mut resp = response(json!({}));
        assert_eq!(resp.id(), Some(7));
        resp.message_id = "abc".into();
        assert_eq!(resp.id(), None);
    }

    #[test]
    fn test_response_object_updates_skip_malformed() {
        let resp = response(json!({
            "objectList": [
                {"objnam": "C0001", "params": {"STATUS": "ON"}},
                "garbage",
                {"objnam": "B1101"}
            ]
        }));
        let updates = resp.object_updates();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].params["STATUS"], "ON");
        assert!(updates[1].params.is_empty());
    }

    #[test]
    fn test_system_info_from_response() {
        let resp = response(json!({
            "objectList": [{
                "objnam": "_5451",
                "params": {"PROPNAME": "Backyard", "VER": "1.064", "MODE": "METRIC"}
            }]
        }));
        let info = SystemInfo::from_response(&resp).unwrap();
        assert_eq!(info.prop_name, "Backyard");
        assert_eq!(info.sw_version, "1.064");
        assert!(info.uses_metric);
    }

    #[test]
    fn test_system_info_missing_object() {
        let resp = response(json!({"objectList": []}));
        assert!(SystemInfo::from_response(&resp).is_none());
    }

    #[test]
    fn test_change_params_shape() {
        let mut values = AttributeValues::new();
        values.insert("STATUS".into(), json!("OFF"));
        let params = change_params("C0003", values);
        assert_eq!(params["objectList"][0]["objnam"], "C0003");
        assert_eq!(params["objectList"][0]["params"]["STATUS"], "OFF");
    }

    #[test]
    fn test_handshake_targets_system_object() {
        let params = handshake_params();
        assert_eq!(params["objectList"][0]["objnam"], SYSTEM_OBJECT);
        assert!(params["objectList"][0]["keys"]
            .as_array()
            .unwrap()
            .contains(&json!("PROPNAME")));
    }
}
