//! Control-channel message types
//!
//! Every control frame is a JSON object `{"Kind": <string>, "Data":
//! <opaque JSON>}`. The envelope is decoded first; `Data` stays raw
//! until the kind is known, so unknown kinds can be skipped without
//! touching their payload.

use crate::token::Token;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

/// Agent -> relay: bind this session to a virtual hostname.
pub const KIND_REGISTER_HOST: &str = "registerHost";

/// Relay -> agent: dial the data port and present this token.
pub const KIND_OPEN_DATA_CONNECTION: &str = "openDataConnection";

/// Outer envelope carried by every control frame.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ControlEnvelope {
    pub kind: String,
    pub data: Box<RawValue>,
}

impl ControlEnvelope {
    /// Encode a payload under the given kind into a wire frame.
    pub fn encode<T: Serialize>(kind: &str, payload: &T) -> Result<String, serde_json::Error> {
        let data = serde_json::value::to_raw_value(payload)?;
        serde_json::to_string(&ControlEnvelope {
            kind: kind.to_string(),
            data,
        })
    }

    /// Decode a wire frame into an envelope, leaving the payload raw.
    pub fn decode(frame: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(frame)
    }

    /// Decode the raw payload into a typed message.
    pub fn payload<'de, T: Deserialize<'de>>(&'de self) -> Result<T, serde_json::Error> {
        serde_json::from_str(self.data.get())
    }
}

/// Payload of [`KIND_REGISTER_HOST`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RegisterHost {
    pub host: String,
}

/// Payload of [`KIND_OPEN_DATA_CONNECTION`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OpenDataConnection {
    pub token: Token,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_host_wire_shape() {
        let frame = ControlEnvelope::encode(
            KIND_REGISTER_HOST,
            &RegisterHost {
                host: "example.test".to_string(),
            },
        )
        .unwrap();
        assert_eq!(
            frame,
            r#"{"Kind":"registerHost","Data":{"Host":"example.test"}}"#
        );
    }

    #[test]
    fn test_open_data_connection_wire_shape() {
        let token = Token::from_hex("00112233445566778899aabbccddeeff").unwrap();
        let frame =
            ControlEnvelope::encode(KIND_OPEN_DATA_CONNECTION, &OpenDataConnection { token })
                .unwrap();
        assert_eq!(
            frame,
            r#"{"Kind":"openDataConnection","Data":{"Token":"00112233445566778899aabbccddeeff"}}"#
        );
    }

    #[test]
    fn test_decode_register_host() {
        let envelope =
            ControlEnvelope::decode(r#"{"Kind":"registerHost","Data":{"Host":"ha.test"}}"#)
                .unwrap();
        assert_eq!(envelope.kind, KIND_REGISTER_HOST);
        let payload: RegisterHost = envelope.payload().unwrap();
        assert_eq!(payload.host, "ha.test");
    }

    #[test]
    fn test_unknown_kind_keeps_payload_raw() {
        let envelope =
            ControlEnvelope::decode(r#"{"Kind":"futureThing","Data":{"Anything":[1,2,3]}}"#)
                .unwrap();
        assert_eq!(envelope.kind, "futureThing");
        assert_eq!(envelope.data.get(), r#"{"Anything":[1,2,3]}"#);
    }

    #[test]
    fn test_malformed_envelope_is_an_error() {
        assert!(ControlEnvelope::decode("not json").is_err());
        assert!(ControlEnvelope::decode(r#"{"Kind":"registerHost"}"#).is_err());
    }

    #[test]
    fn test_malformed_payload_is_an_error() {
        let envelope =
            ControlEnvelope::decode(r#"{"Kind":"registerHost","Data":{"Port":80}}"#).unwrap();
        assert!(envelope.payload::<RegisterHost>().is_err());
    }
}
