//! Column-mapping resolution: raw spreadsheet headers to canonical fields.
//!
//! Resolution order per field is caller override, then exact synonym, then
//! glob pattern. A header claimed by one field is never handed to another,
//! and fields claim in [`CanonicalField::ALL`] order, so the same headers and
//! overrides always produce the same mapping.

use std::collections::BTreeMap;

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

use crate::glob::{is_glob, GlobPattern};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalField {
    Content,
    TurnId,
    UserId,
    ReplyToTurn,
    Thread,
}

impl CanonicalField {
    /// Every field, in claim order. `Content` is first so the one required
    /// field always gets first pick of the headers.
    pub const ALL: [CanonicalField; 5] = [
        CanonicalField::Content,
        CanonicalField::TurnId,
        CanonicalField::UserId,
        CanonicalField::ReplyToTurn,
        CanonicalField::Thread,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            CanonicalField::Content => "content",
            CanonicalField::TurnId => "turn_id",
            CanonicalField::UserId => "user_id",
            CanonicalField::ReplyToTurn => "reply_to_turn",
            CanonicalField::Thread => "thread",
        }
    }

    #[must_use]
    pub fn is_required(self) -> bool {
        matches!(self, CanonicalField::Content)
    }

    /// Exact header names tried in order before any pattern.
    #[must_use]
    pub fn synonyms(self) -> &'static [&'static str] {
        match self {
            CanonicalField::Content => &[
                "content",
                "text",
                "message",
                "turn_text",
                "message_text",
                "body",
                "msg",
            ],
            CanonicalField::TurnId => &["turn_id", "turnid", "id", "message_id", "msg_id", "turn"],
            CanonicalField::UserId => &["user_id", "userid", "user", "author", "sender", "speaker"],
            CanonicalField::ReplyToTurn => &[
                "reply_to_turn",
                "replytoturn",
                "reply_to",
                "reply",
                "parent_id",
                "parent",
            ],
            CanonicalField::Thread => &[
                "thread",
                "thread_id",
                "threadid",
                "conversation",
                "conversation_id",
                "conv_id",
            ],
        }
    }

    #[must_use]
    pub fn patterns(self) -> &'static [&'static str] {
        match self {
            CanonicalField::Content => &["content_*", "*_text", "*text", "message_*"],
            CanonicalField::TurnId => &["turn_*", "*_id", "*id", "msg_*"],
            CanonicalField::UserId => &["user_*", "*_user", "author_*", "sender_*"],
            CanonicalField::ReplyToTurn => &["reply_*", "*_reply", "parent_*"],
            CanonicalField::Thread => &[
                "thread_*",
                "*_thread",
                "*thread*",
                "conversation_*",
                "conv_*",
            ],
        }
    }
}

impl std::fmt::Display for CanonicalField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CanonicalField {
    type Err = MappingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        CanonicalField::ALL
            .into_iter()
            .find(|f| f.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| MappingError::UnknownField(s.to_string()))
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MappingError {
    #[error("no column found for required field(s): {}", join_fields(.fields))]
    MissingRequired { fields: Vec<CanonicalField> },

    #[error("unknown field '{0}' in column mapping override")]
    UnknownField(String),

    #[error("invalid column pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("column '{header}' is mapped to both {first} and {second}")]
    ConflictingOverride {
        header: String,
        first: CanonicalField,
        second: CanonicalField,
    },

    #[error("mapped column '{header}' for {field} is not in the file header")]
    HeaderMismatch {
        field: CanonicalField,
        header: String,
    },
}

fn join_fields(fields: &[CanonicalField]) -> String {
    fields
        .iter()
        .map(|f| f.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Caller-supplied field → header (or glob) overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappingOverrides {
    entries: BTreeMap<CanonicalField, String>,
}

impl MappingOverrides {
    /// Build overrides from raw `(field, header)` pairs. Field names are
    /// matched case-insensitively; later duplicates replace earlier ones.
    ///
    /// # Errors
    ///
    /// Returns [`MappingError::UnknownField`] for a key that is not a
    /// canonical field.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, MappingError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut entries = BTreeMap::new();
        for (key, value) in pairs {
            let field: CanonicalField = key.as_ref().parse()?;
            entries.insert(field, value.into());
        }
        Ok(Self { entries })
    }

    #[must_use]
    pub fn get(&self, field: CanonicalField) -> Option<&str> {
        self.entries.get(&field).map(String::as_str)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A header chosen for a field, with its zero-based column position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedColumn {
    pub header: String,
    pub index: usize,
}

/// Resolved mapping of every canonical field to a source column, or `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMapping {
    columns: BTreeMap<CanonicalField, Option<ResolvedColumn>>,
}

impl ColumnMapping {
    #[must_use]
    pub fn get(&self, field: CanonicalField) -> Option<&ResolvedColumn> {
        self.columns.get(&field).and_then(Option::as_ref)
    }

    #[must_use]
    pub fn header(&self, field: CanonicalField) -> Option<&str> {
        self.get(field).map(|c| c.header.as_str())
    }

    /// Resolved fields in claim order.
    pub fn resolved(&self) -> impl Iterator<Item = (CanonicalField, &ResolvedColumn)> {
        CanonicalField::ALL
            .into_iter()
            .filter_map(|f| self.get(f).map(|c| (f, c)))
    }

    /// Check the mapping against a file's header row and return the column
    /// index of every resolved field.
    ///
    /// # Errors
    ///
    /// Returns [`MappingError::HeaderMismatch`] if a resolved column is not
    /// at its recorded position, or [`MappingError::MissingRequired`] if a
    /// required field is unresolved.
    pub fn bind(&self, headers: &[String]) -> Result<Vec<(CanonicalField, usize)>, MappingError> {
        let missing: Vec<CanonicalField> = CanonicalField::ALL
            .into_iter()
            .filter(|f| f.is_required() && self.get(*f).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(MappingError::MissingRequired { fields: missing });
        }

        self.resolved()
            .map(|(field, column)| match headers.get(column.index) {
                Some(h) if h == &column.header => Ok((field, column.index)),
                _ => Err(MappingError::HeaderMismatch {
                    field,
                    header: column.header.clone(),
                }),
            })
            .collect()
    }
}

impl Serialize for ColumnMapping {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(CanonicalField::ALL.len()))?;
        for field in CanonicalField::ALL {
            map.serialize_entry(field.as_str(), &self.header(field))?;
        }
        map.end()
    }
}

/// Resolves header rows using the built-in synonym and pattern tables.
#[derive(Debug, Clone, Copy, Default)]
pub struct ColumnMappingResolver;

impl ColumnMappingResolver {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Resolve `headers` (in file column order) to canonical fields.
    ///
    /// # Errors
    ///
    /// Returns [`MappingError::MissingRequired`] naming every required field
    /// left unresolved, [`MappingError::ConflictingOverride`] when two
    /// overrides land on one column, or [`MappingError::InvalidPattern`] for
    /// an override glob that cannot be compiled.
    pub fn resolve(
        &self,
        headers: &[String],
        overrides: &MappingOverrides,
    ) -> Result<ColumnMapping, MappingError> {
        let mut claims: Vec<Option<CanonicalField>> = vec![None; headers.len()];
        let mut assigned: BTreeMap<CanonicalField, usize> = BTreeMap::new();

        for field in CanonicalField::ALL {
            let Some(wanted) = overrides.get(field) else {
                continue;
            };
            match resolve_override(headers, &claims, wanted)? {
                OverrideMatch::Free(index) => {
                    claims[index] = Some(field);
                    assigned.insert(field, index);
                }
                OverrideMatch::Claimed(index) => {
                    return Err(MappingError::ConflictingOverride {
                        header: headers[index].clone(),
                        first: claims[index].unwrap_or(field),
                        second: field,
                    });
                }
                OverrideMatch::None => {
                    tracing::warn!(
                        field = field.as_str(),
                        value = wanted,
                        "column mapping override matched no header; falling back to detection"
                    );
                }
            }
        }

        for field in CanonicalField::ALL {
            if assigned.contains_key(&field) {
                continue;
            }
            if let Some(index) = detect(headers, &claims, field)? {
                claims[index] = Some(field);
                assigned.insert(field, index);
            }
        }

        let missing: Vec<CanonicalField> = CanonicalField::ALL
            .into_iter()
            .filter(|f| f.is_required() && !assigned.contains_key(f))
            .collect();
        if !missing.is_empty() {
            return Err(MappingError::MissingRequired { fields: missing });
        }

        let columns = CanonicalField::ALL
            .into_iter()
            .map(|field| {
                let column = assigned.get(&field).map(|&index| ResolvedColumn {
                    header: headers[index].clone(),
                    index,
                });
                (field, column)
            })
            .collect();

        Ok(ColumnMapping { columns })
    }
}

enum OverrideMatch {
    Free(usize),
    Claimed(usize),
    None,
}

fn usable(header: &str) -> bool {
    !header.trim().is_empty()
}

fn resolve_override(
    headers: &[String],
    claims: &[Option<CanonicalField>],
    wanted: &str,
) -> Result<OverrideMatch, MappingError> {
    let wanted = wanted.trim();
    let literal = |h: &String| usable(h) && h.trim().eq_ignore_ascii_case(wanted);

    if let Some(index) = first_unclaimed(headers, claims, literal) {
        return Ok(OverrideMatch::Free(index));
    }
    if let Some(index) = headers.iter().position(literal) {
        return Ok(OverrideMatch::Claimed(index));
    }
    if !is_glob(wanted) {
        return Ok(OverrideMatch::None);
    }

    let pattern = compile(wanted)?;
    Ok(
        first_unclaimed(headers, claims, |h| usable(h) && pattern.is_match(h.trim()))
            .map_or(OverrideMatch::None, OverrideMatch::Free),
    )
}

fn detect(
    headers: &[String],
    claims: &[Option<CanonicalField>],
    field: CanonicalField,
) -> Result<Option<usize>, MappingError> {
    for synonym in field.synonyms() {
        let hit = first_unclaimed(headers, claims, |h| {
            usable(h) && h.trim().eq_ignore_ascii_case(synonym)
        });
        if hit.is_some() {
            return Ok(hit);
        }
    }

    let patterns = field
        .patterns()
        .iter()
        .map(|p| compile(p))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(first_unclaimed(headers, claims, |h| {
        usable(h) && patterns.iter().any(|p| p.is_match(h.trim()))
    }))
}

fn first_unclaimed<P>(headers: &[String], claims: &[Option<CanonicalField>], pred: P) -> Option<usize>
where
    P: Fn(&String) -> bool,
{
    headers
        .iter()
        .enumerate()
        .find(|(i, h)| claims[*i].is_none() && pred(h))
        .map(|(i, _)| i)
}

fn compile(pattern: &str) -> Result<GlobPattern, MappingError> {
    GlobPattern::new(pattern).map_err(|e| MappingError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    fn resolve(names: &[&str]) -> Result<ColumnMapping, MappingError> {
        ColumnMappingResolver::new().resolve(&headers(names), &MappingOverrides::default())
    }

    fn overrides(pairs: &[(&str, &str)]) -> MappingOverrides {
        MappingOverrides::from_pairs(pairs.iter().map(|(k, v)| (*k, (*v).to_string())))
            .expect("valid overrides")
    }

    #[test]
    fn resolves_mixed_case_synonyms() {
        let mapping = resolve(&["Turn_ID", "User", "Message"]).unwrap();
        assert_eq!(mapping.header(CanonicalField::TurnId), Some("Turn_ID"));
        assert_eq!(mapping.header(CanonicalField::UserId), Some("User"));
        assert_eq!(mapping.header(CanonicalField::Content), Some("Message"));
        assert_eq!(mapping.header(CanonicalField::ReplyToTurn), None);
        assert_eq!(mapping.header(CanonicalField::Thread), None);
    }

    #[test]
    fn earlier_synonym_wins_over_earlier_column() {
        // "text" precedes "message" in the content synonym list.
        let mapping = resolve(&["message", "text"]).unwrap();
        assert_eq!(mapping.header(CanonicalField::Content), Some("text"));
    }

    #[test]
    fn exact_match_beats_pattern() {
        let mapping = resolve(&["content_raw", "Body"]).unwrap();
        assert_eq!(mapping.header(CanonicalField::Content), Some("Body"));
    }

    #[test]
    fn pattern_takes_first_header_in_column_order() {
        let mapping = resolve(&["note", "reply_target", "reply_parent", "utterance_text"]).unwrap();
        assert_eq!(mapping.header(CanonicalField::Content), Some("utterance_text"));
        assert_eq!(mapping.header(CanonicalField::ReplyToTurn), Some("reply_target"));
    }

    #[test]
    fn claimed_header_is_not_reused() {
        // turn_id takes "msg_id" by exact synonym, so "thread_id" is still
        // free for thread even though it fits turn_id's `*_id` pattern.
        let mapping = resolve(&["msg_id", "thread_id", "text"]).unwrap();
        assert_eq!(mapping.header(CanonicalField::TurnId), Some("msg_id"));
        assert_eq!(mapping.header(CanonicalField::Thread), Some("thread_id"));
    }

    #[test]
    fn first_claim_wins_across_fields() {
        // Only the pattern pass finds these; content claims first.
        let mapping = resolve(&["message_body", "sender_name"]).unwrap();
        assert_eq!(mapping.header(CanonicalField::Content), Some("message_body"));
        assert_eq!(mapping.header(CanonicalField::UserId), Some("sender_name"));
        assert_eq!(mapping.header(CanonicalField::TurnId), None);
    }

    #[test]
    fn missing_content_names_the_field() {
        let err = resolve(&["turn_id", "user"]).unwrap_err();
        assert_eq!(
            err,
            MappingError::MissingRequired {
                fields: vec![CanonicalField::Content]
            }
        );
        assert!(err.to_string().contains("content"));
    }

    #[test]
    fn override_with_literal_header_replaces_guess() {
        let mapping = ColumnMappingResolver::new()
            .resolve(
                &headers(&["text", "Utterance"]),
                &overrides(&[("content", "utterance")]),
            )
            .unwrap();
        assert_eq!(mapping.header(CanonicalField::Content), Some("Utterance"));
    }

    #[test]
    fn override_falls_back_to_glob() {
        let mapping = ColumnMappingResolver::new()
            .resolve(
                &headers(&["speaker_name", "line"]),
                &overrides(&[("content", "li*"), ("USER_ID", "speaker_*")]),
            )
            .unwrap();
        assert_eq!(mapping.header(CanonicalField::Content), Some("line"));
        assert_eq!(mapping.header(CanonicalField::UserId), Some("speaker_name"));
    }

    #[test]
    fn unmatched_override_falls_back_to_detection() {
        let mapping = ColumnMappingResolver::new()
            .resolve(&headers(&["text"]), &overrides(&[("content", "nope")]))
            .unwrap();
        assert_eq!(mapping.header(CanonicalField::Content), Some("text"));
    }

    #[test]
    fn override_claim_blocks_detection() {
        // The override takes "text" for thread, so content must look elsewhere.
        let mapping = ColumnMappingResolver::new()
            .resolve(
                &headers(&["text", "body"]),
                &overrides(&[("thread", "text")]),
            )
            .unwrap();
        assert_eq!(mapping.header(CanonicalField::Thread), Some("text"));
        assert_eq!(mapping.header(CanonicalField::Content), Some("body"));
    }

    #[test]
    fn two_overrides_on_one_column_conflict() {
        let err = ColumnMappingResolver::new()
            .resolve(
                &headers(&["text"]),
                &overrides(&[("content", "text"), ("thread", "TEXT")]),
            )
            .unwrap_err();
        assert!(matches!(err, MappingError::ConflictingOverride { .. }));
    }

    #[test]
    fn unknown_override_key_is_rejected() {
        let err = MappingOverrides::from_pairs([("timestamp", "ts".to_string())]).unwrap_err();
        assert_eq!(err, MappingError::UnknownField("timestamp".to_string()));
    }

    #[test]
    fn blank_headers_are_ignored() {
        let mapping = resolve(&["", "  ", "text"]).unwrap();
        assert_eq!(mapping.get(CanonicalField::Content).map(|c| c.index), Some(2));
    }

    #[test]
    fn resolution_is_deterministic() {
        let names = ["ID", "Author", "Body", "Parent", "Conversation", "Extra_ID"];
        let o = overrides(&[("thread", "conv*")]);
        let first = ColumnMappingResolver::new().resolve(&headers(&names), &o).unwrap();
        let second = ColumnMappingResolver::new().resolve(&headers(&names), &o).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn bind_reports_moved_columns() {
        let mapping = resolve(&["user", "text"]).unwrap();
        assert_eq!(
            mapping.bind(&headers(&["user", "text"])).unwrap(),
            vec![(CanonicalField::Content, 1), (CanonicalField::UserId, 0)]
        );
        assert!(matches!(
            mapping.bind(&headers(&["text", "user"])),
            Err(MappingError::HeaderMismatch { .. })
        ));
    }

    #[test]
    fn serializes_every_field() {
        let mapping = resolve(&["Message"]).unwrap();
        let json = serde_json::to_value(&mapping).unwrap();
        assert_eq!(json["content"], "Message");
        assert!(json["thread"].is_null());
        assert_eq!(json.as_object().map(serde_json::Map::len), Some(5));
    }
}
