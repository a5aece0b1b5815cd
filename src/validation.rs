//! Submission validation
//!
//! Shape checks run before policy evaluation. A submission that fails here never reaches
//! the policy enforcer or the remote service.

use crate::config::PolicyConfig;
use crate::error::ValidationError;
use crate::models::{Intent, IntentId, IntentKind};
use crate::policy::ExpectedState;
use serde_json::Value;

/// Maximum serialized size of one intent payload (8MB)
const MAX_PAYLOAD_BYTES: usize = 8 * 1024 * 1024;

/// Maximum nesting depth of a payload
const MAX_PAYLOAD_DEPTH: usize = 16;

/// Maximum number of keys in any payload object
const MAX_OBJECT_KEYS: usize = 1000;

/// Maximum length of a payload string, matching the per-cell character limit
const MAX_STRING_LENGTH: usize = 50_000;

/// Validate a whole submission: its size, every intent, and the expected-state entries
pub fn validate_submission(
    intents: &[Intent],
    expected_state: &[ExpectedState],
    policy: &PolicyConfig,
) -> Result<(), ValidationError> {
    if intents.is_empty() {
        return Err(ValidationError::new("intents", "submission contains no intents"));
    }

    if intents.len() > policy.max_intents_per_submission {
        return Err(ValidationError::new(
            "intents",
            format!(
                "{} intents submitted (max: {})",
                intents.len(),
                policy.max_intents_per_submission
            ),
        ));
    }

    for intent in intents {
        validate_intent(intent)?;
    }

    for state in expected_state {
        if !intents.iter().any(|i| i.document_id() == &state.document_id) {
            return Err(ValidationError::new(
                "expected_state.document_id",
                format!(
                    "document '{}' is not targeted by any intent",
                    state.document_id
                ),
            ));
        }
    }

    Ok(())
}

/// Validate one intent's target, kind and payload
pub fn validate_intent(intent: &Intent) -> Result<(), ValidationError> {
    let id = intent.id();

    if intent.document_id().is_empty() {
        return Err(ValidationError::for_intent(
            id,
            "target.document_id",
            "document id is empty",
        ));
    }

    if let IntentKind::Custom { name } = intent.kind() {
        if name.trim().is_empty() {
            return Err(ValidationError::for_intent(id, "kind.name", "custom kind has no name"));
        }
    }

    if intent.kind().writes_values() && !intent.region().is_bounded() {
        return Err(ValidationError::for_intent(
            id,
            "target.region",
            format!("{} needs a bounded region, got {}", intent.kind(), intent.region()),
        ));
    }

    validate_payload(id, intent.payload())?;

    if intent.kind().writes_values() {
        validate_values_matrix(id, intent.payload())?;
    }

    Ok(())
}

/// Size and structure limits on an opaque payload
pub fn validate_payload(intent_id: IntentId, payload: &Value) -> Result<(), ValidationError> {
    let serialized = serde_json::to_vec(payload).map_err(|e| {
        ValidationError::for_intent(intent_id, "payload", format!("invalid JSON structure: {e}"))
    })?;

    if serialized.len() > MAX_PAYLOAD_BYTES {
        return Err(ValidationError::for_intent(
            intent_id,
            "payload",
            format!(
                "payload too large: {} bytes (max: {MAX_PAYLOAD_BYTES})",
                serialized.len()
            ),
        ));
    }

    validate_depth(intent_id, payload, 0)
}

fn validate_depth(intent_id: IntentId, value: &Value, depth: usize) -> Result<(), ValidationError> {
    if depth > MAX_PAYLOAD_DEPTH {
        return Err(ValidationError::for_intent(
            intent_id,
            "payload",
            format!("nesting too deep: {depth} (max: {MAX_PAYLOAD_DEPTH})"),
        ));
    }

    match value {
        Value::Object(map) => {
            if map.len() > MAX_OBJECT_KEYS {
                return Err(ValidationError::for_intent(
                    intent_id,
                    "payload",
                    format!("too many keys: {} (max: {MAX_OBJECT_KEYS})", map.len()),
                ));
            }
            for (key, value) in map {
                if key.len() > MAX_STRING_LENGTH {
                    return Err(ValidationError::for_intent(
                        intent_id,
                        "payload",
                        format!("key too long: {} chars", key.len()),
                    ));
                }
                validate_depth(intent_id, value, depth + 1)?;
            }
        }
        Value::Array(items) => {
            for item in items {
                validate_depth(intent_id, item, depth + 1)?;
            }
        }
        Value::String(s) if s.len() > MAX_STRING_LENGTH => {
            return Err(ValidationError::for_intent(
                intent_id,
                "payload",
                format!("string too long: {} chars (max: {MAX_STRING_LENGTH})", s.len()),
            ));
        }
        _ => {}
    }

    Ok(())
}

/// `WriteValues` payloads carry a `values` matrix (array of row arrays)
fn validate_values_matrix(intent_id: IntentId, payload: &Value) -> Result<(), ValidationError> {
    let rows = payload
        .as_object()
        .and_then(|object| object.get("values"))
        .and_then(Value::as_array)
        .ok_or_else(|| {
            ValidationError::for_intent(
                intent_id,
                "payload.values",
                "write_values payload must be an object with a 'values' array",
            )
        })?;

    if rows.iter().any(|row| !row.is_array()) {
        return Err(ValidationError::for_intent(
            intent_id,
            "payload.values",
            "every row of 'values' must be an array",
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Region;
    use serde_json::json;

    fn write(doc: &str, region: &str, payload: Value) -> Intent {
        Intent::new(
            doc,
            Region::parse(region).unwrap(),
            IntentKind::WriteValues,
            payload,
        )
    }

    #[test]
    fn accepts_a_well_formed_submission() {
        let intents = vec![write("doc", "S!A1:B1", json!({"values": [[1, 2]]}))];
        let expected = vec![ExpectedState::dimensions(
            "doc",
            Region::parse("S!A1:B1").unwrap(),
            1,
            2,
        )];
        assert!(validate_submission(&intents, &expected, &PolicyConfig::default()).is_ok());
    }

    #[test]
    fn rejects_empty_and_oversized_submissions() {
        let policy = PolicyConfig {
            max_intents_per_submission: 1,
            ..PolicyConfig::default()
        };
        let err = validate_submission(&[], &[], &policy).unwrap_err();
        assert_eq!(err.field, "intents");

        let intents = vec![
            write("doc", "S!A1", json!({"values": [[1]]})),
            write("doc", "S!A2", json!({"values": [[1]]})),
        ];
        assert!(validate_submission(&intents, &[], &policy).is_err());
    }

    #[test]
    fn rejects_unbounded_value_writes() {
        let intent = write("doc", "S!A:A", json!({"values": [[1]]}));
        let err = validate_intent(&intent).unwrap_err();
        assert_eq!(err.field, "target.region");
        assert_eq!(err.intent_id, Some(intent.id()));

        let clear = Intent::new(
            "doc",
            Region::parse("S!A:A").unwrap(),
            IntentKind::ClearValues,
            json!({}),
        );
        assert!(validate_intent(&clear).is_ok());
    }

    #[test]
    fn rejects_malformed_values_payload() {
        assert!(validate_intent(&write("doc", "S!A1", json!("nope"))).is_err());
        assert!(validate_intent(&write("doc", "S!A1", json!({"values": [1]}))).is_err());
    }

    #[test]
    fn rejects_empty_identifiers() {
        assert_eq!(
            validate_intent(&write("", "S!A1", json!({"values": []})))
                .unwrap_err()
                .field,
            "target.document_id"
        );

        let custom = Intent::new(
            "doc",
            Region::parse("S!A1").unwrap(),
            IntentKind::Custom { name: " ".into() },
            json!({}),
        );
        assert_eq!(validate_intent(&custom).unwrap_err().field, "kind.name");
    }

    #[test]
    fn rejects_expected_state_for_untouched_document() {
        let intents = vec![write("doc", "S!A1", json!({"values": [[1]]}))];
        let expected = vec![ExpectedState::version_token(
            "other",
            Region::parse("S!A1").unwrap(),
            "1",
        )];
        let err = validate_submission(&intents, &expected, &PolicyConfig::default()).unwrap_err();
        assert_eq!(err.field, "expected_state.document_id");
    }

    #[test]
    fn rejects_deeply_nested_payloads() {
        let mut payload = json!(1);
        for _ in 0..20 {
            payload = json!({ "nested": payload });
        }
        let intent = Intent::new(
            "doc",
            Region::parse("S!A1").unwrap(),
            IntentKind::FormatCells,
            payload,
        );
        assert!(validate_intent(&intent).is_err());
    }
}
