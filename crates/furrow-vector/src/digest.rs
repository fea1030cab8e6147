//! Canonical text digest of a visit record.
//!
//! The digest is both the embedding input and the snippet shown in search
//! results. Parts are emitted in a fixed order and joined with ". ".

use serde_json::{json, Map, Value};

use furrow_core::types::VisitRecord;

/// Build the embedding text for a visit.
///
/// Order: field, crop, issue, note, photo caption, audio transcript, severity.
/// Absent or blank fields are omitted. Returns an empty string when nothing
/// is embeddable.
pub fn embedding_text(visit: &VisitRecord) -> String {
    let labelled = [
        ("Field", visit.field_id.as_deref()),
        ("Crop", visit.crop.as_deref()),
        ("Issue", visit.issue.as_deref()),
        ("Notes", visit.note.as_deref()),
        ("Photo", visit.photo_caption.as_deref()),
        ("Audio", visit.audio_transcript.as_deref()),
    ];

    let mut parts: Vec<String> = labelled
        .iter()
        .filter_map(|(label, value)| present(*value).map(|v| format!("{}: {}", label, v)))
        .collect();

    if let Some(severity) = visit.severity {
        parts.push(format!("Severity: {}/5", severity));
    }

    parts.join(". ")
}

/// Metadata stored with a visit's text-index entry.
///
/// `created_at` is always an integer so range filters compare numerically.
pub fn text_metadata(visit: &VisitRecord) -> Map<String, Value> {
    let mut metadata = Map::new();
    metadata.insert("id".into(), json!(visit.id));
    metadata.insert("created_at".into(), json!(visit.created_at));
    metadata.insert("task_type".into(), json!(visit.task_type));
    metadata.insert("field_id".into(), json!(visit.field_id.as_deref().unwrap_or("")));
    metadata.insert("crop".into(), json!(visit.crop.as_deref().unwrap_or("")));
    metadata.insert("issue".into(), json!(visit.issue.as_deref().unwrap_or("")));
    metadata.insert("note".into(), json!(visit.note.as_deref().unwrap_or("")));
    metadata
}

fn present(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_visit() -> VisitRecord {
        VisitRecord {
            id: "v1".into(),
            created_at: 1_700_000_000_000,
            updated_at: 1_700_000_000_000,
            task_type: "field_visit".into(),
            field_id: Some("north-40".into()),
            crop: Some("corn".into()),
            issue: Some("rootworm".into()),
            note: Some("Lodging near the creek".into()),
            photo_caption: Some("Chewed roots".into()),
            audio_transcript: Some("Counted six larvae per plant".into()),
            audio_summary: Some("not part of the digest".into()),
            severity: Some(4),
            ..Default::default()
        }
    }

    #[test]
    fn test_full_digest_order() {
        assert_eq!(
            embedding_text(&full_visit()),
            "Field: north-40. Crop: corn. Issue: rootworm. Notes: Lodging near the creek. \
             Photo: Chewed roots. Audio: Counted six larvae per plant. Severity: 4/5"
        );
    }

    #[test]
    fn test_digest_is_independent_of_input_key_order() {
        let a: VisitRecord = serde_json::from_str(
            r#"{"id":"v1","createdAt":1,"updatedAt":1,"task_type":"t",
                "severity":2,"note":"wet","crop":"soy","field_id":"f9"}"#,
        )
        .unwrap();
        let b: VisitRecord = serde_json::from_str(
            r#"{"field_id":"f9","crop":"soy","note":"wet","severity":2,
                "task_type":"t","updatedAt":1,"createdAt":1,"id":"v1"}"#,
        )
        .unwrap();

        let expected = "Field: f9. Crop: soy. Notes: wet. Severity: 2/5";
        assert_eq!(embedding_text(&a), expected);
        assert_eq!(embedding_text(&b), expected);
        assert_eq!(embedding_text(&a), embedding_text(&a));
    }

    #[test]
    fn test_absent_and_blank_fields_omitted() {
        let visit = VisitRecord {
            note: Some("Only a note".into()),
            crop: Some("".into()),
            issue: Some("   ".into()),
            ..Default::default()
        };
        assert_eq!(embedding_text(&visit), "Notes: Only a note");
    }

    #[test]
    fn test_empty_record_yields_empty_digest() {
        let visit = VisitRecord {
            id: "v1".into(),
            task_type: "field_visit".into(),
            lat: Some(1.0),
            audio_summary: Some("summary alone is not embedded".into()),
            ..Default::default()
        };
        assert_eq!(embedding_text(&visit), "");
    }

    #[test]
    fn test_severity_zero_is_rendered() {
        let visit = VisitRecord {
            severity: Some(0),
            ..Default::default()
        };
        assert_eq!(embedding_text(&visit), "Severity: 0/5");
    }

    #[test]
    fn test_metadata_shape() {
        let mut visit = full_visit();
        visit.issue = None;
        let metadata = text_metadata(&visit);

        assert_eq!(metadata["id"], "v1");
        assert!(metadata["created_at"].is_i64());
        assert_eq!(metadata["created_at"], 1_700_000_000_000i64);
        assert_eq!(metadata["task_type"], "field_visit");
        assert_eq!(metadata["field_id"], "north-40");
        assert_eq!(metadata["issue"], "");
        assert_eq!(metadata.len(), 7);
    }
}
