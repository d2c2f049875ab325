//! # Animal Record Model
//!
//! [`Record`] is the canonical, validated shape that is stored and broadcast.
//! [`RecordDraft`] is what arrives over the wire: every field optional and
//! untyped, so that missing or mistyped fields produce a readable validation
//! message instead of a deserialisation failure.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::RecordError;

/// Minimum number of characters accepted for `healthStatus`.
pub const HEALTH_STATUS_MIN_LEN: usize = 3;

/// One tracked animal.
///
/// `id` is opaque text: it is frequently the UID of an RFID tag, so it is never
/// parsed as a number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: String,
    pub name: String,
    pub species: String,
    pub age: i32,
    pub health_status: String,
}

/// Unvalidated write body for create and update requests.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RecordDraft {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub name: Option<Value>,
    #[serde(default)]
    pub species: Option<Value>,
    #[serde(default)]
    pub age: Option<Value>,
    #[serde(default)]
    pub health_status: Option<Value>,
}

impl RecordDraft {
    /// Parses a JSON request body. Malformed JSON and unknown fields are
    /// reported as validation errors.
    pub fn from_json_slice(body: &[u8]) -> Result<Self, RecordError> {
        serde_json::from_slice(body)
            .map_err(|e| RecordError::Validation(format!("invalid request body: {}", e)))
    }

    /// Validates a create request. Every field, `id` included, is required.
    pub fn into_new_record(self) -> Result<Record, RecordError> {
        let id = required_text("id", self.id, 1)?;
        finish(id, self.name, self.species, self.age, self.health_status)
    }

    /// Validates an update request for the record at `path_id`.
    ///
    /// All editable fields are required. A body `id` may be present but must
    /// match `path_id`, since ids are immutable.
    pub fn into_replacement(self, path_id: &str) -> Result<Record, RecordError> {
        let id = validate_id(path_id)?;
        if let Some(body_id) = self.id {
            let body_id = required_text("id", Some(body_id), 1)?;
            if body_id != id {
                return Err(RecordError::Validation(format!(
                    "\"id\" in body ('{}') does not match the record being updated ('{}')",
                    body_id, id
                )));
            }
        }
        finish(id, self.name, self.species, self.age, self.health_status)
    }
}

impl From<Record> for RecordDraft {
    fn from(record: Record) -> Self {
        Self {
            id: Some(Value::String(record.id)),
            name: Some(Value::String(record.name)),
            species: Some(Value::String(record.species)),
            age: Some(Value::from(record.age)),
            health_status: Some(Value::String(record.health_status)),
        }
    }
}

fn finish(
    id: String,
    name: Option<Value>,
    species: Option<Value>,
    age: Option<Value>,
    health_status: Option<Value>,
) -> Result<Record, RecordError> {
    Ok(Record {
        id,
        name: required_text("name", name, 1)?,
        species: required_text("species", species, 1)?,
        age: required_age(age)?,
        health_status: required_text("healthStatus", health_status, HEALTH_STATUS_MIN_LEN)?,
    })
}

/// Validates an id taken from a URL path or scan request.
pub fn validate_id(raw: &str) -> Result<String, RecordError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(RecordError::Validation("\"id\" is not allowed to be empty".into()));
    }
    Ok(trimmed.to_string())
}

fn required_text(field: &str, value: Option<Value>, min_len: usize) -> Result<String, RecordError> {
    let text = match value {
        None => return Err(RecordError::Validation(format!("\"{}\" is required", field))),
        Some(Value::String(s)) => s,
        Some(_) => return Err(RecordError::Validation(format!("\"{}\" must be a string", field))),
    };

    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(RecordError::Validation(format!(
            "\"{}\" is not allowed to be empty",
            field
        )));
    }
    if trimmed.chars().count() < min_len {
        return Err(RecordError::Validation(format!(
            "\"{}\" length must be at least {} characters long",
            field, min_len
        )));
    }
    Ok(trimmed.to_string())
}

fn required_age(value: Option<Value>) -> Result<i32, RecordError> {
    let number = match value {
        None => return Err(RecordError::Validation("\"age\" is required".into())),
        Some(Value::Number(n)) => n.as_f64(),
        // Numeric strings are accepted, as form posts send them that way.
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(_) => None,
    };
    let Some(number) = number.filter(|n| n.is_finite()) else {
        return Err(RecordError::Validation("\"age\" must be a number".into()));
    };

    if number.fract() != 0.0 {
        return Err(RecordError::Validation("\"age\" must be an integer".into()));
    }
    if number < 0.0 {
        return Err(RecordError::Validation(
            "\"age\" must be greater than or equal to 0".into(),
        ));
    }
    if number > f64::from(i32::MAX) {
        return Err(RecordError::Validation(format!(
            "\"age\" must be less than or equal to {}",
            i32::MAX
        )));
    }
    Ok(number as i32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn draft(value: Value) -> RecordDraft {
        serde_json::from_value(value).unwrap()
    }

    fn validation_message(result: Result<Record, RecordError>) -> String {
        match result {
            Err(RecordError::Validation(msg)) => msg,
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn valid_draft_is_trimmed_into_canonical_record() {
        let record = draft(json!({
            "id": "  04:A3:2B:91  ",
            "name": " Leo ",
            "species": "Lion",
            "age": 4,
            "healthStatus": "Healthy"
        }))
        .into_new_record()
        .unwrap();

        assert_eq!(record.id, "04:A3:2B:91");
        assert_eq!(record.name, "Leo");
        assert_eq!(record.age, 4);
    }

    #[test]
    fn first_failing_field_is_reported() {
        let msg = validation_message(
            draft(json!({"id": "A1", "species": "Lion", "age": 4, "healthStatus": "ok"}))
                .into_new_record(),
        );
        assert_eq!(msg, "\"name\" is required");
    }

    #[test]
    fn health_status_needs_three_characters() {
        let msg = validation_message(
            draft(json!({"id": "A1", "name": "Leo", "species": "Lion", "age": 4, "healthStatus": " ok "}))
                .into_new_record(),
        );
        assert!(msg.contains("healthStatus"), "{}", msg);
    }

    #[test]
    fn age_rules() {
        let base = |age: Value| {
            draft(json!({"id": "A1", "name": "Leo", "species": "Lion", "age": age, "healthStatus": "Healthy"}))
                .into_new_record()
        };
        assert!(validation_message(base(json!(-1))).contains("greater than or equal to 0"));
        assert!(validation_message(base(json!(4.5))).contains("integer"));
        assert!(validation_message(base(json!("four"))).contains("number"));
        assert!(validation_message(base(json!(3_000_000_000u64))).contains("less than"));
        assert_eq!(base(json!(4.0)).unwrap().age, 4);
        assert_eq!(base(json!("7")).unwrap().age, 7);
        assert_eq!(base(json!(0)).unwrap().age, 0);
    }

    #[test]
    fn id_is_never_treated_as_numeric() {
        let record = draft(json!({"id": "RFID-7F3A", "name": "Kiki", "species": "Parrot", "age": 2, "healthStatus": "Good"}))
            .into_new_record()
            .unwrap();
        assert_eq!(record.id, "RFID-7F3A");
    }

    #[test]
    fn non_string_id_is_rejected() {
        let msg = validation_message(
            draft(json!({"id": 12, "name": "Leo", "species": "Lion", "age": 4, "healthStatus": "Healthy"}))
                .into_new_record(),
        );
        assert_eq!(msg, "\"id\" must be a string");
    }

    #[test]
    fn replacement_rejects_mismatched_body_id() {
        let msg = validation_message(
            draft(json!({"id": "B2", "name": "Leo", "species": "Lion", "age": 4, "healthStatus": "Healthy"}))
                .into_replacement("A1"),
        );
        assert!(msg.contains("does not match"));
    }

    #[test]
    fn replacement_without_body_id_uses_path_id() {
        let record = draft(json!({"name": "Leo", "species": "Lion", "age": 5, "healthStatus": "Healthy"}))
            .into_replacement("A1")
            .unwrap();
        assert_eq!(record.id, "A1");
        assert_eq!(record.age, 5);
    }

    #[test]
    fn replacement_requires_every_editable_field() {
        let msg = validation_message(
            draft(json!({"name": "Leo", "species": "Lion", "healthStatus": "Healthy"}))
                .into_replacement("A1"),
        );
        assert_eq!(msg, "\"age\" is required");
    }

    #[test]
    fn unknown_fields_and_bad_json_are_validation_errors() {
        let unknown = RecordDraft::from_json_slice(br#"{"id":"A1","colour":"gold"}"#);
        assert!(matches!(unknown, Err(RecordError::Validation(_))));

        let broken = RecordDraft::from_json_slice(b"{not json");
        assert!(matches!(broken, Err(RecordError::Validation(_))));
    }

    #[test]
    fn blank_path_id_is_invalid() {
        assert!(matches!(validate_id("   "), Err(RecordError::Validation(_))));
    }
}
