//! Queue payload schema and validation.

use serde::Deserialize;
use thiserror::Error;

use edugen_ai::GenerationRequest;
use edugen_ai::request::DEFAULT_MODALITY;
use edugen_core::{CorrelationId, RequestId};

/// Why a payload can never be processed. Always a permanent reject.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageError {
    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("request_id is not a UUID: {0}")]
    InvalidRequestId(String),
}

#[derive(Debug, Deserialize)]
struct RawContentMessage {
    request_id: Option<String>,
    correlation_id: Option<String>,
    student_id: Option<String>,
    student_query: Option<String>,
    grade_level: Option<i32>,
    interest: Option<String>,
    requested_modalities: Option<Vec<String>>,
    preferred_modality: Option<String>,
}

/// A validated content-generation message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentMessage {
    pub request_id: RequestId,
    pub correlation_id: Option<CorrelationId>,
    pub student_id: String,
    pub student_query: String,
    pub grade_level: i32,
    pub interest: Option<String>,
    pub requested_modalities: Vec<String>,
    pub preferred_modality: Option<String>,
}

fn required(value: Option<String>, field: &'static str) -> Result<String, MessageError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(MessageError::MissingField(field)),
    }
}

impl ContentMessage {
    pub fn decode(data: &[u8]) -> Result<Self, MessageError> {
        let text =
            std::str::from_utf8(data).map_err(|e| MessageError::Malformed(e.to_string()))?;
        let raw: RawContentMessage =
            serde_json::from_str(text).map_err(|e| MessageError::Malformed(e.to_string()))?;
        Self::validate(raw)
    }

    fn validate(raw: RawContentMessage) -> Result<Self, MessageError> {
        let request_id = required(raw.request_id, "request_id")?;
        let student_id = required(raw.student_id, "student_id")?;
        let student_query = required(raw.student_query, "student_query")?;
        let grade_level = raw
            .grade_level
            .ok_or(MessageError::MissingField("grade_level"))?;
        let request_id = request_id
            .parse::<RequestId>()
            .map_err(|_| MessageError::InvalidRequestId(request_id))?;

        let requested_modalities = match raw.requested_modalities {
            Some(m) if !m.is_empty() => m,
            _ => vec![DEFAULT_MODALITY.to_string()],
        };

        Ok(Self {
            request_id,
            correlation_id: raw
                .correlation_id
                .filter(|c| !c.trim().is_empty())
                .map(CorrelationId::from),
            student_id,
            student_query,
            grade_level,
            interest: raw.interest,
            requested_modalities,
            preferred_modality: raw.preferred_modality,
        })
    }

    pub fn generation_request(&self, correlation_id: CorrelationId) -> GenerationRequest {
        let mut request = GenerationRequest::new(
            self.request_id,
            correlation_id,
            &self.student_query,
            &self.student_id,
            self.grade_level,
        )
        .with_modalities(self.requested_modalities.clone());
        if let Some(interest) = &self.interest {
            request = request.with_interest(interest);
        }
        if let Some(modality) = &self.preferred_modality {
            request = request.with_preferred_modality(modality);
        }
        request
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(v: serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&v).unwrap()
    }

    fn valid() -> serde_json::Value {
        json!({
            "request_id": "0190f4c2-8f1e-7a4b-9c3d-2e1f0a9b8c7d",
            "student_id": "stu-42",
            "student_query": "How do volcanoes form?",
            "grade_level": 8
        })
    }

    #[test]
    fn decodes_with_defaults() {
        let msg = ContentMessage::decode(&payload(valid())).unwrap();
        assert_eq!(msg.requested_modalities, vec!["video".to_string()]);
        assert_eq!(msg.correlation_id, None);
        assert_eq!(msg.grade_level, 8);
    }

    #[test]
    fn keeps_optional_fields() {
        let mut v = valid();
        v["correlation_id"] = json!("trace-9");
        v["interest"] = json!("minecraft");
        v["requested_modalities"] = json!(["video", "audio"]);
        v["preferred_modality"] = json!("audio");
        let msg = ContentMessage::decode(&payload(v)).unwrap();

        let req = msg.generation_request(CorrelationId::from("trace-9"));
        assert_eq!(req.interest.as_deref(), Some("minecraft"));
        assert_eq!(req.requested_modalities.len(), 2);
        assert_eq!(req.preferred_modality.as_deref(), Some("audio"));
    }

    #[test]
    fn invalid_json_and_encoding_are_malformed() {
        assert!(matches!(ContentMessage::decode(b"{not json"), Err(MessageError::Malformed(_))));
        assert!(matches!(ContentMessage::decode(&[0xff, 0xfe]), Err(MessageError::Malformed(_))));
    }

    #[test]
    fn missing_or_blank_required_fields_are_rejected() {
        for field in ["request_id", "student_id", "student_query", "grade_level"] {
            let mut v = valid();
            v.as_object_mut().unwrap().remove(field);
            assert_eq!(
                ContentMessage::decode(&payload(v)),
                Err(MessageError::MissingField(field))
            );
        }
        let mut v = valid();
        v["student_query"] = json!("  ");
        assert_eq!(
            ContentMessage::decode(&payload(v)),
            Err(MessageError::MissingField("student_query"))
        );
    }

    #[test]
    fn non_uuid_request_id_is_rejected() {
        let mut v = valid();
        v["request_id"] = json!("not-a-uuid");
        assert_eq!(
            ContentMessage::decode(&payload(v)),
            Err(MessageError::InvalidRequestId("not-a-uuid".into()))
        );
    }
}
