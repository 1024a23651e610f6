//! Push frame decoding
//!
//! A frame is either a bare control keyword or a JSON-encoded card
//! operation. Decoding goes through a permissive wire struct and then a
//! validation step, so a frame with a missing id is rejected as malformed
//! instead of producing a half-initialized operation.

use serde::{Deserialize, Serialize};

use super::card::LightCard;
use crate::error::{FeedError, Result};

/// Control keywords sent in place of a card operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlSignal {
    /// Server asks the client to reload the application
    Reload,
    BusinessConfigChange,
    UserConfigChange,
    BusinessDataChange,
    MonitoringConfigChange,
    /// Server finished replaying cards for a requested period
    OldCardsLoadingEnd,
    /// Another session opened for the same account; this one must close
    DisconnectUserDueToNewConnection,
}

impl ControlSignal {
    pub const ALL: [ControlSignal; 7] = [
        ControlSignal::Reload,
        ControlSignal::BusinessConfigChange,
        ControlSignal::UserConfigChange,
        ControlSignal::BusinessDataChange,
        ControlSignal::MonitoringConfigChange,
        ControlSignal::OldCardsLoadingEnd,
        ControlSignal::DisconnectUserDueToNewConnection,
    ];

    /// Wire keyword for this signal
    pub fn keyword(self) -> &'static str {
        match self {
            ControlSignal::Reload => "RELOAD",
            ControlSignal::BusinessConfigChange => "BUSINESS_CONFIG_CHANGE",
            ControlSignal::UserConfigChange => "USER_CONFIG_CHANGE",
            ControlSignal::BusinessDataChange => "BUSINESS_DATA_CHANGE",
            ControlSignal::MonitoringConfigChange => "MONITORING_CONFIG_CHANGE",
            ControlSignal::OldCardsLoadingEnd => "OLD_CARDS_LOADING_END",
            ControlSignal::DisconnectUserDueToNewConnection => {
                "DISCONNECT_USER_DUE_TO_NEW_CONNECTION"
            }
        }
    }

    /// Match a raw frame against the known keywords
    pub fn from_keyword(frame: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|signal| signal.keyword() == frame)
    }
}

/// Discriminator of a card operation on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CardOperationType {
    Add,
    Delete,
    Ack,
    Unack,
}

impl CardOperationType {
    fn as_str(self) -> &'static str {
        match self {
            CardOperationType::Add => "ADD",
            CardOperationType::Delete => "DELETE",
            CardOperationType::Ack => "ACK",
            CardOperationType::Unack => "UNACK",
        }
    }
}

/// Wire shape, every payload field optional
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireCardOperation {
    #[serde(rename = "type")]
    operation_type: CardOperationType,
    #[serde(default)]
    card: Option<LightCard>,
    #[serde(default)]
    card_id: Option<String>,
    #[serde(default)]
    card_uid: Option<String>,
    #[serde(default)]
    entities_acks: Option<Vec<String>>,
}

/// A validated card operation
#[derive(Debug, Clone, PartialEq)]
pub enum CardOperation {
    Add(LightCard),
    Delete {
        card_id: String,
    },
    Ack {
        card_id: String,
        card_uid: Option<String>,
        entities_acks: Vec<String>,
    },
    Unack {
        card_id: String,
        card_uid: Option<String>,
        entities_acks: Vec<String>,
    },
}

impl CardOperation {
    pub fn operation_type(&self) -> CardOperationType {
        match self {
            CardOperation::Add(_) => CardOperationType::Add,
            CardOperation::Delete { .. } => CardOperationType::Delete,
            CardOperation::Ack { .. } => CardOperationType::Ack,
            CardOperation::Unack { .. } => CardOperationType::Unack,
        }
    }

    /// Id of the card the operation targets
    pub fn card_id(&self) -> &str {
        match self {
            CardOperation::Add(card) => &card.id,
            CardOperation::Delete { card_id }
            | CardOperation::Ack { card_id, .. }
            | CardOperation::Unack { card_id, .. } => card_id,
        }
    }

    /// Parse and validate a JSON card operation
    pub fn decode(data: &str) -> Result<Self> {
        let wire: WireCardOperation =
            serde_json::from_str(data).map_err(|e| FeedError::Decode(e.to_string()))?;
        Self::validate(wire)
    }

    fn validate(wire: WireCardOperation) -> Result<Self> {
        let operation = wire.operation_type.as_str();
        let missing = |field| FeedError::MalformedOperation { operation, field };

        match wire.operation_type {
            CardOperationType::Add => {
                let card = wire.card.ok_or_else(|| missing("card"))?;
                if card.id.is_empty() {
                    return Err(missing("card.id"));
                }
                Ok(CardOperation::Add(card))
            }
            CardOperationType::Delete => {
                let card_id = non_empty(wire.card_id).ok_or_else(|| missing("cardId"))?;
                Ok(CardOperation::Delete { card_id })
            }
            CardOperationType::Ack | CardOperationType::Unack => {
                let card_id = non_empty(wire.card_id).ok_or_else(|| missing("cardId"))?;
                let card_uid = wire.card_uid;
                let entities_acks = wire.entities_acks.unwrap_or_default();
                if wire.operation_type == CardOperationType::Ack {
                    Ok(CardOperation::Ack {
                        card_id,
                        card_uid,
                        entities_acks,
                    })
                } else {
                    Ok(CardOperation::Unack {
                        card_id,
                        card_uid,
                        entities_acks,
                    })
                }
            }
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// A classified push frame
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Control(ControlSignal),
    Operation(CardOperation),
}

impl Frame {
    /// Classify a raw frame: control keyword first, card operation otherwise
    pub fn decode(data: &str) -> Result<Self> {
        let data = data.trim();
        if let Some(signal) = ControlSignal::from_keyword(data) {
            return Ok(Frame::Control(signal));
        }
        CardOperation::decode(data).map(Frame::Operation)
    }
}
