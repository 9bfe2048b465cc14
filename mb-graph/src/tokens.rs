use crate::error::{GraphError, Result};
use std::collections::HashMap;
use std::fmt;

/// Page access tokens. A deployment serves either one page or a fixed set
/// of pages keyed by page id, never both.
#[derive(Clone)]
pub enum PageTokens {
    Single(String),
    PerPage(HashMap<String, String>),
}

impl PageTokens {
    pub fn from_parts(
        page_token: Option<String>,
        pages: Option<HashMap<String, String>>,
    ) -> Result<Self> {
        let page_token = page_token
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty());
        let pages = pages.filter(|pages| !pages.is_empty());

        match (page_token, pages) {
            (Some(_), Some(_)) => Err(GraphError::Configuration(
                "page_token and pages are mutually exclusive; configure exactly one".to_string(),
            )),
            (None, None) => Err(GraphError::Configuration(
                "either page_token or pages is required".to_string(),
            )),
            (Some(token), None) => Ok(Self::Single(token)),
            (None, Some(pages)) => {
                let mut resolved = HashMap::with_capacity(pages.len());
                for (page_id, token) in pages {
                    let page_id = page_id.trim();
                    let token = token.trim();
                    if page_id.is_empty() || token.is_empty() {
                        return Err(GraphError::Configuration(
                            "pages entries must have a non-empty page id and token".to_string(),
                        ));
                    }
                    resolved.insert(page_id.to_string(), token.to_string());
                }
                Ok(Self::PerPage(resolved))
            }
        }
    }

    pub fn is_multi_page(&self) -> bool {
        matches!(self, Self::PerPage(_))
    }

    /// Resolve the token used for a page-scoped call.
    ///
    /// Single-page credentials ignore `page_id`. Multi-page credentials
    /// require a page id that is present in the map.
    pub fn resolve(&self, page_id: Option<&str>) -> Result<&str> {
        match self {
            Self::Single(token) => Ok(token.as_str()),
            Self::PerPage(pages) => {
                let page_id = page_id
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .ok_or_else(|| {
                        GraphError::Configuration(
                            "a page id is required to resolve the page token in multi-page mode"
                                .to_string(),
                        )
                    })?;
                pages.get(page_id).map(String::as_str).ok_or_else(|| {
                    GraphError::Configuration(format!("no page token configured for page {page_id}"))
                })
            }
        }
    }

    pub fn page_ids(&self) -> Vec<&str> {
        match self {
            Self::Single(_) => Vec::new(),
            Self::PerPage(pages) => {
                let mut ids: Vec<&str> = pages.keys().map(String::as_str).collect();
                ids.sort_unstable();
                ids
            }
        }
    }
}

impl fmt::Debug for PageTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(_) => f.write_str("PageTokens::Single(<redacted>)"),
            Self::PerPage(_) => f
                .debug_struct("PageTokens::PerPage")
                .field("pages", &self.page_ids())
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::PageTokens;
    use std::collections::HashMap;

    fn pages() -> HashMap<String, String> {
        HashMap::from([
            ("111".to_string(), "token-111".to_string()),
            ("222".to_string(), "token-222".to_string()),
        ])
    }

    #[test]
    fn both_token_forms_are_rejected() {
        let err = PageTokens::from_parts(Some("single".to_string()), Some(pages()))
            .expect_err("both forms must fail");
        assert!(err.is_configuration());
    }

    #[test]
    fn neither_token_form_is_rejected() {
        let err = PageTokens::from_parts(None, None).expect_err("neither form must fail");
        assert!(err.is_configuration());

        let err = PageTokens::from_parts(Some("   ".to_string()), Some(HashMap::new()))
            .expect_err("blank forms count as absent");
        assert!(err.is_configuration());
    }

    #[test]
    fn single_token_ignores_page_id() {
        let tokens = PageTokens::from_parts(Some("single".to_string()), None).expect("tokens");
        assert!(!tokens.is_multi_page());
        assert_eq!(tokens.resolve(None).expect("token"), "single");
        assert_eq!(tokens.resolve(Some("999")).expect("token"), "single");
    }

    #[test]
    fn multi_page_requires_known_page_id() {
        let tokens = PageTokens::from_parts(None, Some(pages())).expect("tokens");
        assert!(tokens.is_multi_page());
        assert_eq!(tokens.resolve(Some("222")).expect("token"), "token-222");
        assert!(tokens.resolve(None).expect_err("missing").is_configuration());
        assert!(tokens.resolve(Some("")).expect_err("blank").is_configuration());
        assert!(
            tokens
                .resolve(Some("333"))
                .expect_err("unknown")
                .is_configuration()
        );
    }

    #[test]
    fn debug_output_redacts_tokens() {
        let single = PageTokens::from_parts(Some("secret-token".to_string()), None).expect("tokens");
        assert!(!format!("{single:?}").contains("secret-token"));

        let multi = PageTokens::from_parts(None, Some(pages())).expect("tokens");
        let rendered = format!("{multi:?}");
        assert!(rendered.contains("111"));
        assert!(!rendered.contains("token-111"));
    }
}
