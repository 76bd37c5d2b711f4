use serde::de::DeserializeOwned;
use serde_json::Value;

use super::{
    api::{AssetList, BalanceList, ChannelInfo, ChannelList, TransactionList},
    ProtocolError,
};
use crate::app::AppSession;

/// Something the node pushed without being asked.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// `assets`: the supported assets changed.
    Assets(AssetList),
    /// `message`: free form notification.
    Message(Value),
    /// `bu`
    BalanceUpdate(BalanceList),
    /// `channels`: the user's channels, sent after connecting.
    Channels(ChannelList),
    /// `cu`
    ChannelUpdate(ChannelInfo),
    /// `tr`: incoming or outgoing transfers.
    Transfer(TransactionList),
    /// `asu`
    AppSessionUpdate(AppSession),
    /// Anything this version doesn't know, kept as is.
    Unknown { method: String, payload: Value },
}

fn parse<T: DeserializeOwned>(method: &str, payload: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(payload)
        .map_err(|e| ProtocolError::MalformedMessage(format!("{} event: {}", method, e)))
}

impl Event {
    /// Decode the payload according to the event name.
    pub fn decode(method: &str, payload: Value) -> Result<Event, ProtocolError> {
        Ok(match method {
            "assets" => Event::Assets(parse(method, payload)?),
            "message" => Event::Message(payload),
            "bu" => Event::BalanceUpdate(parse(method, payload)?),
            "channels" => Event::Channels(parse(method, payload)?),
            "cu" => Event::ChannelUpdate(parse(method, payload)?),
            "tr" => Event::Transfer(parse(method, payload)?),
            "asu" => Event::AppSessionUpdate(parse(method, payload)?),
            _ => Event::Unknown {
                method: method.to_string(),
                payload,
            },
        })
    }

    pub fn name(&self) -> &str {
        match self {
            Event::Assets(_) => "assets",
            Event::Message(_) => "message",
            Event::BalanceUpdate(_) => "bu",
            Event::Channels(_) => "channels",
            Event::ChannelUpdate(_) => "cu",
            Event::Transfer(_) => "tr",
            Event::AppSessionUpdate(_) => "asu",
            Event::Unknown { method, .. } => method,
        }
    }
}
