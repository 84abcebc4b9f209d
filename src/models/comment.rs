use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// One comment on a control/task/audit record. Stored as a JSON array on the
/// owning row, never in a separate table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Comment {
    pub text: String,
    /// Timestamp as supplied by the client; ordering is best-effort.
    #[serde(default)]
    pub time: String,
    #[serde(default)]
    pub author: String,
}

/// Body for the comment sub-resource endpoints.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CommentRequest {
    pub comment: Comment,
}

/// Decode the JSON comments column. Anything that is not a JSON array of
/// comment objects degrades to an empty list rather than failing the read.
pub fn parse_comments(raw: &str) -> Vec<Comment> {
    serde_json::from_str(raw).unwrap_or_default()
}

pub fn comments_to_json(comments: &[Comment]) -> String {
    serde_json::to_string(comments).unwrap_or_else(|_| "[]".to_string())
}

fn parse_time(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(naive.and_utc());
        }
    }
    None
}

/// Order newest-first. Parseable timestamps compare as instants; anything
/// unparsable falls back to lexical descending, which places empty strings
/// last.
pub fn sort_comments_desc(comments: &mut [Comment]) {
    comments.sort_by(|a, b| {
        let key_a = (parse_time(&a.time), a.time.as_str());
        let key_b = (parse_time(&b.time), b.time.as_str());
        key_b.cmp(&key_a)
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comment(time: &str) -> Comment {
        Comment {
            text: format!("at {time}"),
            time: time.to_string(),
            author: "tester".to_string(),
        }
    }

    #[test]
    fn newest_first_with_empty_timestamps_last() {
        let mut comments = vec![
            comment("2024-01-02T10:00"),
            comment("2024-01-01T09:00"),
            comment(""),
        ];
        sort_comments_desc(&mut comments);
        let times: Vec<&str> = comments.iter().map(|c| c.time.as_str()).collect();
        assert_eq!(times, vec!["2024-01-02T10:00", "2024-01-01T09:00", ""]);
    }

    #[test]
    fn unparsable_timestamps_compare_lexically_descending() {
        let mut comments = vec![comment("alpha"), comment("zulu"), comment("mike")];
        sort_comments_desc(&mut comments);
        let times: Vec<&str> = comments.iter().map(|c| c.time.as_str()).collect();
        assert_eq!(times, vec!["zulu", "mike", "alpha"]);
    }

    #[test]
    fn rfc3339_and_short_formats_both_parse() {
        let mut comments = vec![
            comment("2024-03-01T08:30"),
            comment("2024-03-02T00:00:00Z"),
            comment("2024-02-28T23:59:59"),
        ];
        sort_comments_desc(&mut comments);
        let times: Vec<&str> = comments.iter().map(|c| c.time.as_str()).collect();
        assert_eq!(
            times,
            vec!["2024-03-02T00:00:00Z", "2024-03-01T08:30", "2024-02-28T23:59:59"]
        );
    }

    #[test]
    fn malformed_column_degrades_to_empty() {
        assert!(parse_comments("not json").is_empty());
        assert!(parse_comments("{\"text\":\"obj not array\"}").is_empty());
        assert_eq!(parse_comments("[]").len(), 0);
    }

    #[test]
    fn column_roundtrip() {
        let list = vec![comment("2024-01-01T00:00:00Z")];
        let encoded = comments_to_json(&list);
        assert_eq!(parse_comments(&encoded), list);
    }
}
