//! Query analysis: resolving the reference date of a question.
//!
//! Recency scoring needs to know *when* a question is being asked from.
//! An explicit date in the query text wins over a caller-provided
//! `question_date`, which wins over the current time.

use chrono::{DateTime, Duration, Utc};

/// Outcome of analyzing a query's temporal content.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueryAnalysis {
    /// The date the question is asked "from".
    pub reference_date: DateTime<Utc>,
    /// Whether the query text itself carried a date signal.
    pub temporal: bool,
}

/// Analyze a query, resolving its reference date.
pub fn analyze(query: &str, provided: Option<DateTime<Utc>>, now: DateTime<Utc>) -> QueryAnalysis {
    match date_from_query_text(query, now) {
        Some(date) => QueryAnalysis {
            reference_date: date,
            temporal: true,
        },
        None => QueryAnalysis {
            reference_date: provided.unwrap_or(now),
            temporal: false,
        },
    }
}

/// Resolve the reference date for a query.
pub fn resolve_question_date(
    query: &str,
    provided: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    analyze(query, provided, now).reference_date
}

/// Extract a date signal from query text, if any.
///
/// Recognizes bare ISO dates (`2024-03-15`), `today`, `yesterday`,
/// `N days|weeks|months ago`, and `last week|month|year`. Month and year
/// offsets use fixed 30- and 365-day lengths.
pub fn date_from_query_text(query: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let lowered = query.to_lowercase();
    let tokens: Vec<&str> = lowered
        .split_whitespace()
        .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric() && c != '-'))
        .filter(|t| !t.is_empty())
        .collect();

    for token in &tokens {
        if let Some(date) = super::parse_flexible_date(token) {
            return Some(date);
        }
    }

    for window in tokens.windows(3) {
        if window[2] != "ago" {
            continue;
        }
        let Ok(count) = window[0].parse::<i64>() else {
            continue;
        };
        let days = match window[1] {
            "day" | "days" => count,
            "week" | "weeks" => count * 7,
            "month" | "months" => count * 30,
            "year" | "years" => count * 365,
            _ => continue,
        };
        return Some(now - Duration::days(days));
    }

    for window in tokens.windows(2) {
        if window[0] != "last" {
            continue;
        }
        let days = match window[1] {
            "week" => 7,
            "month" => 30,
            "year" => 365,
            _ => continue,
        };
        return Some(now - Duration::days(days));
    }

    if tokens.iter().any(|t| *t == "yesterday") {
        return Some(now - Duration::days(1));
    }
    if tokens.iter().any(|t| *t == "today") {
        return Some(now);
    }

    None
}
