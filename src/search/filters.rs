use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

use crate::params::{ParameterSet, SearchConfig, TagFilter};

/// Joins a tag key and value into the single metadata entry the index stores.
pub const TAG_SEPARATOR: &str = "===";

/// Cutoffs older than this also match documents with no update time.
const UNTIMED_DOC_CUTOFF_DAYS: i64 = 92;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeCutoff {
    pub cutoff_secs: i64,
    pub include_untimed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexFilters {
    pub access_control_list: Vec<String>,
    pub include_hidden: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub source_types: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub document_sets: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_cutoff: Option<TimeCutoff>,
}

/// Scopes a query to what the configured test identity may see.
///
/// Without `user_email` only public documents are visible.
pub fn build_index_filters(params: &ParameterSet, search: &SearchConfig) -> IndexFilters {
    build_index_filters_at(params, search, Utc::now())
}

pub fn build_index_filters_at(
    params: &ParameterSet,
    search: &SearchConfig,
    now: DateTime<Utc>,
) -> IndexFilters {
    IndexFilters {
        access_control_list: params.access_control_list(),
        include_hidden: search.include_hidden,
        source_types: non_blank(&search.source_types),
        document_sets: non_blank(&search.document_sets),
        tags: tag_attributes(&search.tags),
        time_cutoff: search
            .time_cutoff
            .map(|cutoff| time_cutoff(cutoff, now)),
    }
}

fn non_blank(values: &[String]) -> Vec<String> {
    values
        .iter()
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

fn tag_attributes(tags: &[TagFilter]) -> Vec<String> {
    tags.iter()
        .map(|tag| (tag.key.trim(), tag.value.trim()))
        .filter(|(key, value)| !key.is_empty() && !value.is_empty())
        .map(|(key, value)| format!("{key}{TAG_SEPARATOR}{value}"))
        .collect()
}

fn time_cutoff(cutoff: DateTime<Utc>, now: DateTime<Utc>) -> TimeCutoff {
    let untimed_window = TimeDelta::days(UNTIMED_DOC_CUTOFF_DAYS);
    TimeCutoff {
        cutoff_secs: cutoff.timestamp(),
        include_untimed: now - untimed_window > cutoff,
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn search_config() -> SearchConfig {
        SearchConfig {
            endpoint: "http://localhost:8080/search".to_string(),
            timeout_ms: 1_000,
            include_hidden: false,
            source_types: vec!["confluence".to_string(), " ".to_string()],
            document_sets: Vec::new(),
            tags: Vec::new(),
            time_cutoff: None,
        }
    }

    #[test]
    fn anonymous_identity_is_public_only() {
        let filters = build_index_filters(&ParameterSet::default(), &search_config());
        assert_eq!(filters.access_control_list, vec!["PUBLIC".to_string()]);
        assert_eq!(filters.source_types, vec!["confluence".to_string()]);

        let json = serde_json::to_value(&filters).expect("serialize filters");
        assert!(json.get("document_sets").is_none());
        assert!(json.get("tags").is_none());
        assert!(json.get("time_cutoff").is_none());
        assert_eq!(json["include_hidden"], serde_json::json!(false));
    }

    #[test]
    fn user_email_adds_identity_entry() {
        let params = ParameterSet {
            user_email: Some(" reviewer@example.com ".to_string()),
            ..ParameterSet::default()
        };
        let filters = build_index_filters(&params, &search_config());
        assert_eq!(
            filters.access_control_list,
            vec![
                "PUBLIC".to_string(),
                "user_email:reviewer@example.com".to_string()
            ]
        );
    }

    #[test]
    fn tags_join_key_and_value_and_skip_blank_pairs() {
        let mut search = search_config();
        search.tags = vec![
            TagFilter {
                key: "team".to_string(),
                value: " billing ".to_string(),
            },
            TagFilter {
                key: "region".to_string(),
                value: String::new(),
            },
        ];
        let filters = build_index_filters(&ParameterSet::default(), &search);
        assert_eq!(filters.tags, vec!["team===billing".to_string()]);

        let json = serde_json::to_value(&filters).expect("serialize filters");
        assert_eq!(json["tags"], serde_json::json!(["team===billing"]));
    }

    #[test]
    fn old_time_cutoff_also_matches_untimed_documents() {
        let now = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();
        let recent = Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap();
        let stale = Utc.with_ymd_and_hms(2025, 12, 1, 0, 0, 0).unwrap();

        let mut search = search_config();
        search.time_cutoff = Some(recent);
        let filters = build_index_filters_at(&ParameterSet::default(), &search, now);
        assert_eq!(
            filters.time_cutoff,
            Some(TimeCutoff {
                cutoff_secs: recent.timestamp(),
                include_untimed: false,
            })
        );

        search.time_cutoff = Some(stale);
        let filters = build_index_filters_at(&ParameterSet::default(), &search, now);
        assert_eq!(
            filters.time_cutoff,
            Some(TimeCutoff {
                cutoff_secs: stale.timestamp(),
                include_untimed: true,
            })
        );

        let json = serde_json::to_value(&filters).expect("serialize filters");
        assert_eq!(json["time_cutoff"]["include_untimed"], serde_json::json!(true));
    }
}
