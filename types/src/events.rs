use crate::{Flight, PlaneBet};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const SERVICE: &str = "aviator";

pub const ROOM_PLANE: &str = "plane";
pub const ROOM_ADMIN: &str = "admin";

pub const EVENT_FLIGHT_STATE: &str = "flight:state";
pub const EVENT_BET_UPDATE: &str = "flightbet:update";
pub const EVENT_LICENSE_UPDATE: &str = "license:update";

pub const LICENSE_EXPIRED_MESSAGE: &str = "your aviator license has expired";

/// Envelope published to the event fan-out.
///
/// `room` scopes delivery: `plane` for everyone watching an organization, `admin` for operators,
/// and a user id for that user's bet updates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMessage {
    pub room: String,
    pub service: String,
    pub org_id: String,
    pub event: String,
    pub message: Value,
}

impl EventMessage {
    pub fn new(room: &str, org_id: &str, event: &str, message: Value) -> Self {
        Self {
            room: room.to_string(),
            service: SERVICE.to_string(),
            org_id: org_id.to_string(),
            event: event.to_string(),
            message,
        }
    }

    pub fn flight_state(flight: &Flight) -> Self {
        Self::new(
            ROOM_PLANE,
            &flight.org_id,
            EVENT_FLIGHT_STATE,
            serde_json::to_value(flight.state_event()).unwrap_or(Value::Null),
        )
    }

    pub fn bet_update(bet: &PlaneBet) -> Self {
        Self::new(
            &bet.user_id,
            &bet.org_id,
            EVENT_BET_UPDATE,
            serde_json::to_value(bet).unwrap_or(Value::Null),
        )
    }

    pub fn license_expired(org_id: &str) -> Self {
        Self::new(
            ROOM_ADMIN,
            org_id,
            EVENT_LICENSE_UPDATE,
            Value::String(LICENSE_EXPIRED_MESSAGE.to_string()),
        )
    }
}
