//! The flattened `NOTE` production format.
//!
//! A record's `NOTE` is a list of `{TEXT}` lines. Runs of plain lines form a
//! static section, joined with `\n`. A line that is exactly `[f(` opens a
//! dynamic section and a line that is exactly `)]` closes it; the lines in
//! between are the expression.
//!
//! Inputs that would not survive `NOTE -> sections -> NOTE` unchanged are
//! rejected on the way in: multi-line `TEXT`, unclosed or nested blocks,
//! stray closers and empty dynamic blocks.

use crate::error::{MonographError, Result};
use crate::types::Section;
use serde::{Deserialize, Serialize};

pub const DYNAMIC_OPEN: &str = "[f(";
pub const DYNAMIC_CLOSE: &str = ")]";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteLine {
    #[serde(rename = "TEXT")]
    pub text: String,
}

impl NoteLine {
    pub fn new(text: impl Into<String>) -> Self {
        NoteLine { text: text.into() }
    }
}

/// One ingredient as exchanged with hospital systems.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngredientRecord {
    #[serde(rename = "KEYNAME")]
    pub key_name: String,
    #[serde(rename = "NOTE", default)]
    pub note: Vec<NoteLine>,
}

/// Parse a JSON array of records.
pub fn parse_records(json: &str) -> Result<Vec<IngredientRecord>> {
    serde_json::from_str(json).map_err(|e| MonographError::ImportFormat {
        record: "<input>".to_string(),
        line: e.line(),
        reason: e.to_string(),
    })
}

/// Convert a `NOTE` array into sections. `key` names the record in errors;
/// error line numbers are 1-based positions in `note`.
pub fn note_to_sections(key: &str, note: &[NoteLine]) -> Result<Vec<Section>> {
    let err = |line: usize, reason: &str| MonographError::ImportFormat {
        record: key.to_string(),
        line,
        reason: reason.to_string(),
    };

    let mut sections = Vec::new();
    let mut plain: Vec<&str> = Vec::new();
    // (line the block opened on, interior lines)
    let mut dynamic: Option<(usize, Vec<&str>)> = None;

    for (i, line) in note.iter().enumerate() {
        let n = i + 1;
        let text = line.text.as_str();
        if text.contains('\n') {
            return Err(err(n, "TEXT must be a single line"));
        }

        match dynamic.as_mut() {
            Some((opened, body)) => match text {
                DYNAMIC_CLOSE => {
                    if body.is_empty() {
                        return Err(err(*opened, "empty dynamic block"));
                    }
                    sections.push(Section::dynamic(body.join("\n")));
                    dynamic = None;
                }
                DYNAMIC_OPEN => return Err(err(n, "nested dynamic block")),
                _ => body.push(text),
            },
            None => match text {
                DYNAMIC_OPEN => {
                    if !plain.is_empty() {
                        sections.push(Section::static_text(plain.join("\n")));
                        plain.clear();
                    }
                    dynamic = Some((n, Vec::new()));
                }
                DYNAMIC_CLOSE => return Err(err(n, "closing marker without an open block")),
                _ => plain.push(text),
            },
        }
    }

    if let Some((opened, _)) = dynamic {
        return Err(err(opened, "dynamic block is never closed"));
    }
    if !plain.is_empty() {
        sections.push(Section::static_text(plain.join("\n")));
    }
    Ok(sections)
}

/// Flatten sections into a `NOTE` array, the inverse of `note_to_sections`.
///
/// Fails with `MalformedContent` for content the format cannot carry: a
/// line equal to a block marker.
pub fn sections_to_note(sections: &[Section]) -> Result<Vec<NoteLine>> {
    let mut note = Vec::new();
    for (index, section) in sections.iter().enumerate() {
        match section {
            Section::Static { text } => {
                for line in text.split('\n') {
                    if line == DYNAMIC_OPEN || line == DYNAMIC_CLOSE {
                        return Err(MonographError::MalformedContent(format!(
                            "section {}: static line '{}' collides with a block marker",
                            index, line
                        )));
                    }
                    note.push(NoteLine::new(line));
                }
            }
            Section::Dynamic { expression } => {
                note.push(NoteLine::new(DYNAMIC_OPEN));
                for line in expression.split('\n') {
                    if line == DYNAMIC_OPEN || line == DYNAMIC_CLOSE {
                        return Err(MonographError::MalformedContent(format!(
                            "section {}: expression line '{}' collides with a block marker",
                            index, line
                        )));
                    }
                    note.push(NoteLine::new(line));
                }
                note.push(NoteLine::new(DYNAMIC_CLOSE));
            }
        }
    }
    Ok(note)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn lines(texts: &[&str]) -> Vec<NoteLine> {
        texts.iter().map(|t| NoteLine::new(*t)).collect()
    }

    #[test]
    fn plain_and_dynamic_blocks() {
        let note = lines(&[
            "Potassium Chloride",
            "Dilute before use",
            "[f(",
            "dose(weight,",
            "  10)",
            ")]",
            "Max rate 10 mmol/h",
        ]);
        let sections = note_to_sections("KCL", &note).unwrap();
        assert_eq!(
            sections,
            vec![
                Section::static_text("Potassium Chloride\nDilute before use"),
                Section::dynamic("dose(weight,\n  10)"),
                Section::static_text("Max rate 10 mmol/h"),
            ]
        );
        assert_eq!(sections_to_note(&sections).unwrap(), note);
    }

    #[test]
    fn adjacent_dynamic_blocks_and_empty_lines() {
        let note = lines(&["[f(", "a", ")]", "[f(", "b", ")]", "", ""]);
        let sections = note_to_sections("X", &note).unwrap();
        assert_eq!(sections.len(), 3);
        assert_eq!(sections[2], Section::static_text("\n"));
        assert_eq!(sections_to_note(&sections).unwrap(), note);
    }

    #[test]
    fn empty_note_is_empty_content() {
        assert!(note_to_sections("X", &[]).unwrap().is_empty());
        assert!(sections_to_note(&[]).unwrap().is_empty());
    }

    #[test]
    fn format_errors_name_record_and_line() {
        let cases: Vec<(Vec<NoteLine>, usize)> = vec![
            (lines(&["ok", "[f(", "x"]), 2),
            (lines(&["ok", ")]"]), 2),
            (lines(&["[f(", "x", "[f(", ")]"]), 3),
            (lines(&["[f(", ")]"]), 1),
            (lines(&["a\nb"]), 1),
        ];
        for (note, expected_line) in cases {
            match note_to_sections("KCL", &note) {
                Err(MonographError::ImportFormat { record, line, .. }) => {
                    assert_eq!(record, "KCL");
                    assert_eq!(line, expected_line);
                }
                other => panic!("expected import error, got {:?}", other),
            }
        }
    }

    #[test]
    fn unrepresentable_sections_are_rejected() {
        assert!(matches!(
            sections_to_note(&[Section::static_text("x\n)]")]),
            Err(MonographError::MalformedContent(_))
        ));
        assert!(matches!(
            sections_to_note(&[Section::dynamic("[f(")]),
            Err(MonographError::MalformedContent(_))
        ));
        // An empty expression still exports as one empty interior line
        let note = sections_to_note(&[Section::dynamic("")]).unwrap();
        assert_eq!(note, lines(&["[f(", "", ")]"]));
        assert_eq!(note_to_sections("X", &note).unwrap(), vec![Section::dynamic("")]);
    }

    #[test]
    fn records_parse_from_json() {
        let json = r#"[{"KEYNAME":"KCL","NOTE":[{"TEXT":"Potassium"}],"EXTRA":1},{"KEYNAME":"NACL"}]"#;
        let records = parse_records(json).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].note, lines(&["Potassium"]));
        assert!(records[1].note.is_empty());

        assert!(matches!(
            parse_records(r#"[{"NOTE":[]}]"#),
            Err(MonographError::ImportFormat { .. })
        ));
    }

    fn arb_note() -> impl Strategy<Value = Vec<NoteLine>> {
        let plain = prop::collection::vec("[a-z ()\\[\\]]{0,6}", 1..4).prop_filter(
            "markers are not plain text",
            |ls| ls.iter().all(|l| l != DYNAMIC_OPEN && l != DYNAMIC_CLOSE),
        );
        let block = prop_oneof![
            plain.clone(),
            plain.prop_map(|body| {
                let mut out = vec![DYNAMIC_OPEN.to_string()];
                out.extend(body);
                out.push(DYNAMIC_CLOSE.to_string());
                out
            }),
        ];
        prop::collection::vec(block, 0..6)
            .prop_map(|blocks| blocks.into_iter().flatten().map(NoteLine::new).collect())
    }

    proptest! {
        #[test]
        fn note_round_trip_is_identical(note in arb_note()) {
            let sections = note_to_sections("P", &note).unwrap();
            prop_assert_eq!(sections_to_note(&sections).unwrap(), note);
        }
    }
}
