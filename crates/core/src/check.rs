//! Wire envelope for check observations.
//!
//! Bastions publish one [`CheckResult`] per probe sweep as a
//! length-delimited protobuf message. The field tags here are pinned to
//! the published wire schema — do not renumber them.
//!
//! Older bastions (`version < 2`) predate the typed `reply` oneof and ship
//! each reply as an opaque [`ReplyEnvelope`]; [`normalize_response`] decodes
//! those into the concrete variant before anything downstream serializes
//! the response.

use chrono::{DateTime, TimeZone, Utc};
use prost::Message;

/// Result schema version at which bastions began reporting their own id
/// and the typed reply variant.
pub const RESULT_VERSION_TYPED: i32 = 2;

// ---------------------------------------------------------------------------
// Timestamp
// ---------------------------------------------------------------------------

/// Seconds + nanos since the Unix epoch, as sent on the wire.
#[derive(Clone, Copy, PartialEq, Message)]
pub struct Timestamp {
    #[prost(int64, tag = "1")]
    pub seconds: i64,
    #[prost(int32, tag = "2")]
    pub nanos: i32,
}

impl Timestamp {
    /// Build a wire timestamp from a UTC datetime.
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self {
            seconds: dt.timestamp(),
            nanos: dt.timestamp_subsec_nanos() as i32,
        }
    }

    /// Materialize as a UTC datetime. Out-of-range values clamp to the
    /// epoch rather than panicking on hostile input.
    pub fn to_utc(self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.seconds, self.nanos.max(0) as u32)
            .single()
            .unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap())
    }

    /// Milliseconds since the epoch, used in the result-row sort attribute.
    pub fn millis(self) -> i64 {
        self.seconds * 1_000 + i64::from(self.nanos) / 1_000_000
    }
}

// ---------------------------------------------------------------------------
// Target
// ---------------------------------------------------------------------------

/// What a single response was probed against.
#[derive(Clone, PartialEq, Message)]
pub struct Target {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub r#type: String,
    #[prost(string, tag = "3")]
    pub address: String,
}

// ---------------------------------------------------------------------------
// Reply payloads
// ---------------------------------------------------------------------------

/// Reply from an HTTP probe.
#[derive(Clone, PartialEq, Message)]
pub struct HttpResponse {
    #[prost(int32, tag = "1")]
    pub code: i32,
    #[prost(string, tag = "2")]
    pub body: String,
    #[prost(string, tag = "3")]
    pub host: String,
    #[prost(string, tag = "4")]
    pub protocol: String,
}

/// One sampled CloudWatch metric.
#[derive(Clone, PartialEq, Message)]
pub struct Metric {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(double, tag = "2")]
    pub value: f64,
}

/// Reply from a CloudWatch probe.
#[derive(Clone, PartialEq, Message)]
pub struct CloudWatchResponse {
    #[prost(string, tag = "1")]
    pub namespace: String,
    #[prost(message, repeated, tag = "2")]
    pub metrics: Vec<Metric>,
}

/// Legacy opaque reply carrier: a type URL plus the encoded payload.
///
/// Only the trailing type name of `type_url` is significant.
#[derive(Clone, PartialEq, Message)]
pub struct ReplyEnvelope {
    #[prost(string, tag = "1")]
    pub type_url: String,
    #[prost(bytes = "vec", tag = "2")]
    pub value: Vec<u8>,
}

// ---------------------------------------------------------------------------
// CheckResponse
// ---------------------------------------------------------------------------

/// One per-target response inside a [`CheckResult`].
#[derive(Clone, PartialEq, Message)]
pub struct CheckResponse {
    #[prost(message, optional, tag = "1")]
    pub target: Option<Target>,
    /// Legacy opaque reply, set by `version < 2` bastions.
    #[prost(message, optional, tag = "2")]
    pub response: Option<ReplyEnvelope>,
    #[prost(string, tag = "3")]
    pub error: String,
    #[prost(bool, tag = "4")]
    pub passing: bool,
    #[prost(oneof = "check_response::Reply", tags = "5, 6")]
    pub reply: Option<check_response::Reply>,
}

pub mod check_response {
    /// The closed set of concrete reply shapes.
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Reply {
        #[prost(message, tag = "5")]
        HttpResponse(super::HttpResponse),
        #[prost(message, tag = "6")]
        CloudwatchResponse(super::CloudWatchResponse),
    }
}

// ---------------------------------------------------------------------------
// CheckResult
// ---------------------------------------------------------------------------

/// One observation of a check by one bastion at one instant.
#[derive(Clone, PartialEq, Message)]
pub struct CheckResult {
    #[prost(string, tag = "1")]
    pub check_id: String,
    #[prost(string, tag = "2")]
    pub customer_id: String,
    #[prost(message, optional, tag = "3")]
    pub timestamp: Option<Timestamp>,
    #[prost(bool, tag = "4")]
    pub passing: bool,
    #[prost(message, repeated, tag = "5")]
    pub responses: Vec<CheckResponse>,
    #[prost(message, optional, tag = "6")]
    pub target: Option<Target>,
    #[prost(string, tag = "7")]
    pub check_name: String,
    #[prost(int32, tag = "8")]
    pub version: i32,
    /// Empty for `version < 2` results; see [`CheckResult::bastion_key`].
    #[prost(string, tag = "9")]
    pub bastion_id: String,
}

impl CheckResult {
    /// Number of responses that are not passing.
    pub fn failing_count(&self) -> i32 {
        self.responses.iter().filter(|r| !r.passing).count() as i32
    }

    /// The bastion identity used for memo and result-row keys.
    ///
    /// Legacy results carry no bastion id; the customer id stands in so the
    /// keys stay non-empty and stable per sender.
    pub fn bastion_key(&self) -> &str {
        if self.bastion_id.is_empty() {
            &self.customer_id
        } else {
            &self.bastion_id
        }
    }

    /// Observation time as a UTC datetime; epoch when the field is absent.
    pub fn observed_at(&self) -> DateTime<Utc> {
        self.timestamp.unwrap_or_default().to_utc()
    }
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Failure decoding a legacy reply envelope.
#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    /// The envelope names a reply shape outside the closed set.
    #[error("unknown reply type: {0}")]
    UnknownReplyType(String),

    /// The envelope payload did not decode as the named shape.
    #[error("malformed {type_name} payload: {source}")]
    MalformedPayload {
        type_name: &'static str,
        source: prost::DecodeError,
    },
}

/// Bring a response into canonical form in place.
///
/// - Decodes the legacy [`ReplyEnvelope`] into the typed `reply` variant
///   when `reply` is unset.
/// - For `version < 2` results whose target is a host, back-fills an empty
///   `target.id` from `target.address`.
///
/// Responses that already carry a typed reply pass through untouched.
pub fn normalize_response(response: &mut CheckResponse, version: i32) -> Result<(), NormalizeError> {
    if response.reply.is_none() {
        if let Some(envelope) = response.response.as_ref() {
            response.reply = Some(decode_envelope(envelope)?);
        }
    }

    if version < RESULT_VERSION_TYPED {
        if let Some(target) = response.target.as_mut() {
            let host_typed = target.r#type == "host" || target.r#type == "external_host";
            if host_typed && target.id.is_empty() && !target.address.is_empty() {
                target.id = target.address.clone();
            }
        }
    }

    Ok(())
}

fn decode_envelope(envelope: &ReplyEnvelope) -> Result<check_response::Reply, NormalizeError> {
    let type_name = envelope
        .type_url
        .rsplit('/')
        .next()
        .unwrap_or(envelope.type_url.as_str());

    match type_name {
        "HttpResponse" => HttpResponse::decode(envelope.value.as_slice())
            .map(check_response::Reply::HttpResponse)
            .map_err(|source| NormalizeError::MalformedPayload {
                type_name: "HttpResponse",
                source,
            }),
        "CloudWatchResponse" => CloudWatchResponse::decode(envelope.value.as_slice())
            .map(check_response::Reply::CloudwatchResponse)
            .map_err(|source| NormalizeError::MalformedPayload {
                type_name: "CloudWatchResponse",
                source,
            }),
        other => Err(NormalizeError::UnknownReplyType(other.to_string())),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn http_envelope(code: i32) -> ReplyEnvelope {
        let reply = HttpResponse {
            code,
            body: "ok".into(),
            host: "example.com".into(),
            protocol: "https".into(),
        };
        ReplyEnvelope {
            type_url: "schema/HttpResponse".into(),
            value: reply.encode_to_vec(),
        }
    }

    #[test]
    fn failing_count_counts_non_passing_responses() {
        let result = CheckResult {
            responses: vec![
                CheckResponse {
                    passing: true,
                    ..Default::default()
                },
                CheckResponse::default(),
                CheckResponse::default(),
            ],
            ..Default::default()
        };
        assert_eq!(result.failing_count(), 2);
    }

    #[test]
    fn bastion_key_falls_back_to_customer_id() {
        let mut result = CheckResult {
            customer_id: "cust-1".into(),
            ..Default::default()
        };
        assert_eq!(result.bastion_key(), "cust-1");

        result.bastion_id = "bastion-1".into();
        assert_eq!(result.bastion_key(), "bastion-1");
    }

    #[test]
    fn timestamp_round_trips_through_utc() {
        let now = Utc::now();
        let ts = Timestamp::from_utc(now);
        assert_eq!(ts.to_utc(), now);
    }

    #[test]
    fn timestamp_millis_includes_subsecond_part() {
        let ts = Timestamp {
            seconds: 10,
            nanos: 250_000_000,
        };
        assert_eq!(ts.millis(), 10_250);
    }

    #[test]
    fn normalize_decodes_http_envelope() {
        let mut response = CheckResponse {
            response: Some(http_envelope(200)),
            ..Default::default()
        };

        normalize_response(&mut response, 1).unwrap();

        match response.reply {
            Some(check_response::Reply::HttpResponse(ref http)) => assert_eq!(http.code, 200),
            _ => panic!("expected http reply"),
        }
    }

    #[test]
    fn normalize_decodes_cloudwatch_envelope() {
        let reply = CloudWatchResponse {
            namespace: "AWS/EC2".into(),
            metrics: vec![Metric {
                name: "CPUUtilization".into(),
                value: 97.5,
            }],
        };
        let mut response = CheckResponse {
            response: Some(ReplyEnvelope {
                type_url: "schema/CloudWatchResponse".into(),
                value: reply.encode_to_vec(),
            }),
            ..Default::default()
        };

        normalize_response(&mut response, 1).unwrap();

        match response.reply {
            Some(check_response::Reply::CloudwatchResponse(ref cw)) => {
                assert_eq!(cw.namespace, "AWS/EC2");
                assert_eq!(cw.metrics.len(), 1);
            }
            _ => panic!("expected cloudwatch reply"),
        }
    }

    #[test]
    fn normalize_rejects_unknown_reply_type() {
        let mut response = CheckResponse {
            response: Some(ReplyEnvelope {
                type_url: "schema/IcmpResponse".into(),
                value: vec![],
            }),
            ..Default::default()
        };

        let err = normalize_response(&mut response, 1).unwrap_err();
        assert!(matches!(err, NormalizeError::UnknownReplyType(name) if name == "IcmpResponse"));
    }

    #[test]
    fn normalize_keeps_existing_typed_reply() {
        let mut response = CheckResponse {
            response: Some(http_envelope(500)),
            reply: Some(check_response::Reply::HttpResponse(HttpResponse {
                code: 200,
                ..Default::default()
            })),
            ..Default::default()
        };

        normalize_response(&mut response, 1).unwrap();

        match response.reply {
            Some(check_response::Reply::HttpResponse(ref http)) => assert_eq!(http.code, 200),
            _ => panic!("expected http reply"),
        }
    }

    #[test]
    fn normalize_backfills_legacy_host_target_id() {
        let mut response = CheckResponse {
            target: Some(Target {
                id: String::new(),
                r#type: "external_host".into(),
                address: "10.0.0.8".into(),
            }),
            ..Default::default()
        };

        normalize_response(&mut response, 1).unwrap();
        assert_eq!(response.target.unwrap().id, "10.0.0.8");
    }

    #[test]
    fn normalize_leaves_current_version_target_alone() {
        let mut response = CheckResponse {
            target: Some(Target {
                id: String::new(),
                r#type: "host".into(),
                address: "10.0.0.8".into(),
            }),
            ..Default::default()
        };

        normalize_response(&mut response, RESULT_VERSION_TYPED).unwrap();
        assert_eq!(response.target.unwrap().id, "");
    }
}
