use unicode_normalization::UnicodeNormalization;

use crate::types::Program;

/// Compiled board search.
///
/// A program matches when its business identifier, title or subtitle
/// contains the query, ignoring case. An empty query matches everything.
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    needle: Option<String>,
}

impl SearchQuery {
    pub fn compile(raw_query: &str) -> Self {
        if raw_query.is_empty() {
            return Self { needle: None };
        }
        Self {
            needle: Some(normalize_for_search(raw_query)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.needle.is_none()
    }

    pub fn matches(&self, program: &Program) -> bool {
        let Some(needle) = &self.needle else {
            return true;
        };
        [
            Some(program.program_id.as_str()),
            Some(program.title.as_str()),
            program.subtitle.as_deref(),
        ]
        .into_iter()
        .flatten()
        .any(|field| normalize_for_search(field).contains(needle.as_str()))
    }
}

/// Case folding for search: NFKC first so full-width Latin letters and
/// digits ("ＡＢＣ", "０１８") compare equal to their ASCII forms, then
/// lowercase. Kana are left intact (NFKC recomposes voiced marks).
fn normalize_for_search(value: &str) -> String {
    value.nfkc().collect::<String>().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::fixtures::program;
    use crate::types::Stage;

    fn sample() -> Program {
        let mut p = program(18, "戦争と創造", Stage::Editing);
        p.program_id = "018".into();
        p.subtitle = Some("@Ueno Park".into());
        p
    }

    #[test]
    fn test_empty_query_matches_all() {
        let q = SearchQuery::compile("");
        assert!(q.is_empty());
        assert!(q.matches(&sample()));
    }

    #[test]
    fn test_matches_each_field() {
        let p = sample();
        assert!(SearchQuery::compile("018").matches(&p));
        assert!(SearchQuery::compile("創造").matches(&p));
        assert!(SearchQuery::compile("ueno").matches(&p));
        assert!(!SearchQuery::compile("渋谷").matches(&p));
    }

    #[test]
    fn test_case_insensitive() {
        let p = sample();
        assert!(SearchQuery::compile("UENO PARK").matches(&p));
    }

    #[test]
    fn test_full_width_query_matches_ascii() {
        assert!(SearchQuery::compile("０１８").matches(&sample()));
    }

    #[test]
    fn test_voiced_kana_are_distinct() {
        let mut p = sample();
        p.title = "かいぎ".into();
        assert!(SearchQuery::compile("かいぎ").matches(&p));
        assert!(!SearchQuery::compile("かいき").matches(&p));
    }

    #[test]
    fn test_missing_subtitle_does_not_match() {
        let mut p = sample();
        p.subtitle = None;
        assert!(!SearchQuery::compile("ueno").matches(&p));
    }
}
