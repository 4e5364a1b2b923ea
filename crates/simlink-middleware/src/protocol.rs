//! rosbridge v2 wire messages.
//!
//! Every frame on the WebSocket is a JSON object whose `op` field selects the
//! operation.  [`BusMessage`] models the operations SimLink sends and the ones
//! it reacts to; anything else decodes to [`BusMessage::Other`] and is ignored.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One rosbridge protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum BusMessage {
    Advertise {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        topic: String,
        #[serde(rename = "type")]
        msg_type: String,
    },
    Unadvertise {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        topic: String,
    },
    Publish {
        topic: String,
        #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
        msg_type: Option<String>,
        msg: Value,
    },
    Subscribe {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        topic: String,
        #[serde(rename = "type")]
        msg_type: String,
    },
    Unsubscribe {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        topic: String,
    },
    CallService {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        service: String,
        #[serde(default)]
        args: Value,
    },
    ServiceResponse {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        service: String,
        #[serde(default)]
        values: Value,
        #[serde(default = "default_result")]
        result: bool,
    },
    /// Any operation SimLink does not act on (`status`, `png`, ...).
    #[serde(other)]
    Other,
}

fn default_result() -> bool {
    true
}

impl BusMessage {
    /// The `op` string of this frame.
    pub fn op(&self) -> &'static str {
        match self {
            BusMessage::Advertise { .. } => "advertise",
            BusMessage::Unadvertise { .. } => "unadvertise",
            BusMessage::Publish { .. } => "publish",
            BusMessage::Subscribe { .. } => "subscribe",
            BusMessage::Unsubscribe { .. } => "unsubscribe",
            BusMessage::CallService { .. } => "call_service",
            BusMessage::ServiceResponse { .. } => "service_response",
            BusMessage::Other => "other",
        }
    }

    /// Request id, for the operations that carry one.
    pub fn id(&self) -> Option<&str> {
        match self {
            BusMessage::Advertise { id, .. }
            | BusMessage::Unadvertise { id, .. }
            | BusMessage::Subscribe { id, .. }
            | BusMessage::Unsubscribe { id, .. }
            | BusMessage::CallService { id, .. }
            | BusMessage::ServiceResponse { id, .. } => id.as_deref(),
            BusMessage::Publish { .. } | BusMessage::Other => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn advertise_wire_format() {
        let msg = BusMessage::Advertise {
            id: Some("adv_0".to_string()),
            topic: "/robot0/odom".to_string(),
            msg_type: "nav_msgs/Odometry".to_string(),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({ "op": "advertise", "id": "adv_0", "topic": "/robot0/odom", "type": "nav_msgs/Odometry" })
        );
    }

    #[test]
    fn publish_wire_format() {
        let msg = BusMessage::Publish {
            topic: "/robot0/imu".to_string(),
            msg_type: Some("sensor_msgs/Imu".to_string()),
            msg: json!({ "x": 1 }),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["op"], "publish");
        assert_eq!(value["type"], "sensor_msgs/Imu");
        assert_eq!(value["msg"]["x"], 1);
    }

    #[test]
    fn inbound_publish_without_type() {
        let msg: BusMessage = serde_json::from_str(
            r#"{"op":"publish","topic":"/robot0/cmd_vel","msg":{"linear":{"x":1.0}}}"#,
        )
        .unwrap();
        match msg {
            BusMessage::Publish { topic, msg_type, msg } => {
                assert_eq!(topic, "/robot0/cmd_vel");
                assert!(msg_type.is_none());
                assert_eq!(msg["linear"]["x"], 1.0);
            }
            other => panic!("expected publish, got {other:?}"),
        }
    }

    #[test]
    fn unknown_op_decodes_to_other() {
        let msg: BusMessage =
            serde_json::from_str(r#"{"op":"status","level":"error","msg":"nope"}"#).unwrap();
        assert_eq!(msg, BusMessage::Other);
        assert_eq!(msg.op(), "other");
    }

    #[test]
    fn publish_without_topic_is_rejected() {
        let result = serde_json::from_str::<BusMessage>(r#"{"op":"publish","msg":{}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn service_response_defaults() {
        let msg: BusMessage =
            serde_json::from_str(r#"{"op":"service_response","id":"call_3","values":{"topics":[]}}"#)
                .unwrap();
        assert_eq!(msg.id(), Some("call_3"));
        if let BusMessage::ServiceResponse { result, .. } = msg {
            assert!(result);
        }
    }
}
