use serde::Deserialize;

/// Search fields accepted by the Unitrad API, in the order they are sent.
const SEARCH_FIELDS: [&str; 5] = ["free", "title", "author", "publisher", "isbn"];

/// Immutable search input for one catalog query.
///
/// `library_system` narrows the *output* to one participating system; it is
/// not a searchable field on its own, so a query carrying only a filter is
/// still empty.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Query {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub publisher: Option<String>,
    /// Free-text keyword, mapped to Unitrad's `free` parameter.
    #[serde(default)]
    pub keyword: Option<String>,
    #[serde(default)]
    pub isbn: Option<String>,
    #[serde(default)]
    pub library_system: Option<String>,
}

impl Query {
    /// True when no searchable field carries content.
    pub fn is_empty(&self) -> bool {
        self.searchable_values().all(|v| v.is_none())
    }

    /// Query parameters for the remote `search` call, empty fields stripped.
    pub fn wire_params(&self) -> Vec<(&'static str, String)> {
        SEARCH_FIELDS
            .iter()
            .zip(self.searchable_values())
            .filter_map(|(key, value)| value.map(|v| (*key, v.to_string())))
            .collect()
    }

    /// Requested output filter, trimmed; `None` when unset or blank.
    pub fn library_filter(&self) -> Option<&str> {
        non_blank(&self.library_system)
    }

    fn searchable_values(&self) -> impl Iterator<Item = Option<&str>> {
        [
            non_blank(&self.keyword),
            non_blank(&self.title),
            non_blank(&self.author),
            non_blank(&self.publisher),
            non_blank(&self.isbn),
        ]
        .into_iter()
    }
}

fn non_blank(field: &Option<String>) -> Option<&str> {
    field.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_query_detection() {
        let query = Query::default();
        assert!(query.is_empty());

        let query = Query {
            library_system: Some("nakatsugawa".to_string()),
            ..Query::default()
        };
        assert!(query.is_empty(), "a bare filter is not searchable");

        let query = Query {
            isbn: Some("9784000000000".to_string()),
            ..Query::default()
        };
        assert!(!query.is_empty());
    }

    #[test]
    fn test_blank_fields_are_stripped() {
        let query = Query {
            title: Some("  ".to_string()),
            keyword: Some("astronomy".to_string()),
            ..Query::default()
        };
        let params = query.wire_params();
        assert_eq!(params, vec![("free", "astronomy".to_string())]);
    }

    #[test]
    fn test_wire_params_field_order() {
        let query = Query {
            title: Some("星の王子さま".to_string()),
            author: Some("Saint-Exupéry".to_string()),
            isbn: Some("9784001156768".to_string()),
            ..Query::default()
        };
        let keys: Vec<&str> = query.wire_params().iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec!["title", "author", "isbn"]);
    }
}
