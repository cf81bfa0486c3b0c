//! Encoding of responses stored in the request cache.
//!
//! A cached response is a compact JSON document:
//!
//! ```json
//! {"s": 200, "j": true, "c": ["session=abc"], "h": {"Content-Type": ["application/json"]}, "b": "eyJhIjoxfQ=="}
//! ```
//!
//! The body is always stored base64 encoded. `j` records whether the body was
//! classified as JSON so that a cache hit yields the same [`Body`] variant.

use crate::http::{Body, Response};
use anyhow::Context;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Serialize, Deserialize)]
struct Envelope {
    #[serde(rename = "s")]
    status: u16,
    #[serde(rename = "j")]
    is_json: bool,
    #[serde(rename = "c", default)]
    cookies: Vec<String>,
    #[serde(rename = "h", default)]
    headers: BTreeMap<String, Vec<String>>,
    #[serde(rename = "b", with = "crate::tools::base64_bytes")]
    body: Vec<u8>,
}

/// Serializes a response for the cache.
pub fn encode_envelope(response: &Response) -> anyhow::Result<Vec<u8>> {
    let envelope = Envelope {
        status: response.status,
        is_json: response.body.is_json(),
        cookies: response.cookies.clone(),
        headers: response.headers.clone(),
        body: response.body.to_bytes().to_vec(),
    };

    serde_json::to_vec(&envelope).context("Failed to encode cache envelope")
}

/// Restores a response read from the cache.
pub fn decode_envelope(data: &[u8]) -> anyhow::Result<Response> {
    let envelope: Envelope =
        serde_json::from_slice(data).context("Malformed cache envelope")?;

    let body = if envelope.is_json {
        Body::Json(
            serde_json::from_slice(&envelope.body)
                .context("Malformed JSON body in cache envelope")?,
        )
    } else {
        Body::Raw(Bytes::from(envelope.body))
    };

    Ok(Response {
        body,
        status: envelope.status,
        cookies: envelope.cookies,
        headers: envelope.headers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn response(body: Body) -> Response {
        Response {
            body,
            status: 201,
            cookies: vec!["session=abc".into()],
            headers: BTreeMap::from([(
                "Set-Cookie".to_string(),
                vec!["a=1".to_string(), "b=2".to_string()],
            )]),
        }
    }

    #[test]
    fn json_bodies_are_restored_as_json() {
        let original = response(Body::Json(json!({"a": 1, "list": [1, 2]})));
        let encoded = encode_envelope(&original).unwrap();

        let raw: Value = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(raw["s"], 201);
        assert_eq!(raw["j"], true);
        assert_eq!(raw["c"], json!(["session=abc"]));

        assert_eq!(decode_envelope(&encoded).unwrap(), original);
    }

    #[test]
    fn raw_bodies_may_contain_anything() {
        let original = response(Body::Raw(Bytes::from_static(b"a:b:\x00\xff:c")));
        let decoded = decode_envelope(&encode_envelope(&original).unwrap()).unwrap();

        assert_eq!(decoded, original);
    }

    #[test]
    fn malformed_envelopes_are_rejected() {
        assert!(decode_envelope(b"200:1:::{}").is_err());
        assert!(decode_envelope(br#"{"s":200,"j":true,"b":"bm9wZQ=="}"#).is_err());
        assert!(decode_envelope(br#"{"s":200,"j":false,"b":"!!"}"#).is_err());
    }

    #[test]
    fn missing_cookies_and_headers_default_to_empty() {
        let decoded = decode_envelope(br#"{"s":204,"j":false,"b":""}"#).unwrap();
        assert_eq!(decoded.status, 204);
        assert!(decoded.cookies.is_empty());
        assert!(decoded.headers.is_empty());
    }
}
