//! Filter to IMAP SEARCH criteria translation
//!
//! Pure mapping from [`EmailFilters`] to a [`SearchCriteria`] value. No
//! field is required; absent or blank fields contribute nothing, and a
//! criteria set with no terms means "match all".

use chrono::{DateTime, NaiveDate};

use crate::errors::{AppError, AppResult};
use crate::models::EmailFilters;

/// One ANDed search term
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Criterion {
    From(String),
    To(String),
    Subject(String),
    Text(String),
    Unseen,
    Seen,
    Flagged,
    Since(NaiveDate),
    Before(NaiveDate),
}

/// Server-side search predicate
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchCriteria {
    terms: Vec<Criterion>,
}

impl SearchCriteria {
    pub fn is_match_all(&self) -> bool {
        self.terms.is_empty()
    }

    /// AND a free-text term; blank queries are ignored
    pub fn with_text(mut self, query: Option<&str>) -> AppResult<Self> {
        if let Some(text) = non_blank(query) {
            validate_no_controls(text, "query")?;
            self.terms.push(Criterion::Text(text.to_owned()));
        }
        Ok(self)
    }

    /// Render as an IMAP SEARCH key list
    pub fn to_imap_query(&self) -> String {
        if self.terms.is_empty() {
            return "ALL".to_owned();
        }
        self.terms
            .iter()
            .map(|term| match term {
                Criterion::From(v) => format!("FROM \"{}\"", escape_imap_quoted(v)),
                Criterion::To(v) => format!("TO \"{}\"", escape_imap_quoted(v)),
                Criterion::Subject(v) => format!("SUBJECT \"{}\"", escape_imap_quoted(v)),
                Criterion::Text(v) => format!("TEXT \"{}\"", escape_imap_quoted(v)),
                Criterion::Unseen => "UNSEEN".to_owned(),
                Criterion::Seen => "SEEN".to_owned(),
                Criterion::Flagged => "FLAGGED".to_owned(),
                Criterion::Since(d) => format!("SINCE {}", imap_date(*d)),
                Criterion::Before(d) => format!("BEFORE {}", imap_date(*d)),
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Translate optional filters into search criteria
///
/// # Errors
///
/// - `Validation` for unparseable dates or control characters in text fields
pub fn translate(filters: Option<&EmailFilters>) -> AppResult<SearchCriteria> {
    let Some(filters) = filters else {
        return Ok(SearchCriteria::default());
    };

    let mut terms = Vec::new();
    if let Some(v) = non_blank(filters.from.as_deref()) {
        validate_no_controls(v, "from")?;
        terms.push(Criterion::From(v.to_owned()));
    }
    if let Some(v) = non_blank(filters.to.as_deref()) {
        validate_no_controls(v, "to")?;
        terms.push(Criterion::To(v.to_owned()));
    }
    if let Some(v) = non_blank(filters.subject.as_deref()) {
        validate_no_controls(v, "subject")?;
        terms.push(Criterion::Subject(v.to_owned()));
    }
    match filters.is_unread {
        Some(true) => terms.push(Criterion::Unseen),
        Some(false) => terms.push(Criterion::Seen),
        None => {}
    }
    if filters.is_flagged == Some(true) {
        terms.push(Criterion::Flagged);
    }
    if let Some(v) = non_blank(filters.after_date.as_deref()) {
        terms.push(Criterion::Since(parse_date(v, "after_date")?));
    }
    if let Some(v) = non_blank(filters.before_date.as_deref()) {
        terms.push(Criterion::Before(parse_date(v, "before_date")?));
    }
    Ok(SearchCriteria { terms })
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Accept `YYYY-MM-DD` or an RFC 3339 timestamp (its date part)
fn parse_date(input: &str, field: &str) -> AppResult<NaiveDate> {
    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .or_else(|_| DateTime::parse_from_rfc3339(input).map(|dt| dt.date_naive()))
        .map_err(|_| {
            AppError::invalid(format!(
                "invalid {field} '{input}', expected YYYY-MM-DD or an RFC 3339 timestamp"
            ))
        })
}

/// Reject control characters in caller-supplied search text
fn validate_no_controls(value: &str, field: &str) -> AppResult<()> {
    if value.chars().any(char::is_control) {
        return Err(AppError::invalid(format!(
            "{field} must not contain control characters"
        )));
    }
    Ok(())
}

/// Escape backslashes and quotes for IMAP quoted strings
fn escape_imap_quoted(input: &str) -> String {
    input.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Format date as IMAP SEARCH date (e.g., "1-Jan-2025")
fn imap_date(date: NaiveDate) -> String {
    date.format("%-d-%b-%Y").to_string()
}

#[cfg(test)]
mod tests {
    use super::translate;
    use crate::errors::AppError;
    use crate::models::EmailFilters;

    #[test]
    fn empty_filters_match_all() {
        assert!(translate(None).expect("none").is_match_all());
        assert!(
            translate(Some(&EmailFilters::default()))
                .expect("default")
                .is_match_all()
        );

        let blank = EmailFilters {
            from: Some(String::new()),
            to: Some("   ".to_owned()),
            subject: Some(String::new()),
            after_date: Some(" ".to_owned()),
            ..EmailFilters::default()
        };
        let criteria = translate(Some(&blank)).expect("blank strings");
        assert!(criteria.is_match_all());
        assert_eq!(criteria.to_imap_query(), "ALL");
    }

    #[test]
    fn fields_are_anded_in_order() {
        let filters = EmailFilters {
            from: Some("boss@example.com".to_owned()),
            subject: Some("Q3 \"plan\"".to_owned()),
            is_unread: Some(true),
            is_flagged: Some(true),
            after_date: Some("2025-01-05".to_owned()),
            before_date: Some("2025-02-01T10:00:00Z".to_owned()),
            ..EmailFilters::default()
        };
        let criteria = translate(Some(&filters)).expect("valid filters");
        assert_eq!(
            criteria.to_imap_query(),
            "FROM \"boss@example.com\" SUBJECT \"Q3 \\\"plan\\\"\" UNSEEN FLAGGED SINCE 5-Jan-2025 BEFORE 1-Feb-2025"
        );
    }

    #[test]
    fn read_state_and_flag_edges() {
        let read = translate(Some(&EmailFilters {
            is_unread: Some(false),
            is_flagged: Some(false),
            has_attachments: Some(true),
            ..EmailFilters::default()
        }))
        .expect("valid");
        assert_eq!(read.to_imap_query(), "SEEN");
    }

    #[test]
    fn rfc3339_date_uses_its_date_part() {
        let criteria = translate(Some(&EmailFilters {
            after_date: Some("2024-12-31T23:30:00+00:00".to_owned()),
            ..EmailFilters::default()
        }))
        .expect("valid");
        assert_eq!(criteria.to_imap_query(), "SINCE 31-Dec-2024");
    }

    #[test]
    fn bad_date_is_validation_error() {
        let err = translate(Some(&EmailFilters {
            before_date: Some("last tuesday".to_owned()),
            ..EmailFilters::default()
        }))
        .expect_err("must fail");
        assert!(matches!(err, AppError::Validation(msg) if msg.contains("before_date")));
    }

    #[test]
    fn control_chars_rejected() {
        let err = translate(Some(&EmailFilters {
            subject: Some("x\r\nA001 LOGOUT".to_owned()),
            ..EmailFilters::default()
        }))
        .expect_err("must fail");
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn text_query_is_anded_with_filters() {
        let criteria = translate(Some(&EmailFilters {
            is_unread: Some(true),
            ..EmailFilters::default()
        }))
        .and_then(|c| c.with_text(Some("project update")))
        .expect("valid");
        assert_eq!(criteria.to_imap_query(), "UNSEEN TEXT \"project update\"");

        let untouched = translate(None)
            .and_then(|c| c.with_text(Some("  ")))
            .expect("blank query");
        assert!(untouched.is_match_all());
    }
}
