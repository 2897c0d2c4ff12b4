// Error page declarations and lookup
// Pages are keyed by exception type or HTTP status; one page may act as the default

use crate::error::{ContainerError, ServletError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Dispatch target for an exception type or status code.
/// With neither set, the page is the context's default error page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPage {
    pub location: String,
    #[serde(default)]
    pub error_code: Option<u16>,
    #[serde(default)]
    pub exception_type: Option<String>,
}

impl ErrorPage {
    pub fn for_status(code: u16, location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            error_code: Some(code),
            exception_type: None,
        }
    }

    pub fn for_exception(exception_type: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            error_code: None,
            exception_type: Some(exception_type.into()),
        }
    }

    pub fn default_page(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            error_code: None,
            exception_type: None,
        }
    }

    pub fn is_default(&self) -> bool {
        self.error_code.is_none() && self.exception_type.is_none()
    }

    /// A page names at most one of an exception type and a status in 400-599
    pub fn validate(&self) -> Result<(), ContainerError> {
        if let (Some(t), Some(code)) = (&self.exception_type, self.error_code) {
            return Err(ContainerError::IllegalArgument(format!(
                "error page {} names both exception type {} and status {}",
                self.location, t, code
            )));
        }
        if let Some(code) = self.error_code {
            if !(400..=599).contains(&code) {
                return Err(ContainerError::IllegalArgument(format!(
                    "error page status {} is outside 400-599",
                    code
                )));
            }
        }
        Ok(())
    }

    /// Human readable key used in logs and container events
    pub fn key(&self) -> String {
        match (&self.exception_type, self.error_code) {
            (Some(t), _) => t.clone(),
            (None, Some(code)) => code.to_string(),
            (None, None) => "default".to_string(),
        }
    }
}

/// Error pages of one context
#[derive(Debug, Default, Clone)]
pub struct ErrorPageTable {
    by_status: HashMap<u16, ErrorPage>,
    by_exception: HashMap<String, ErrorPage>,
    default: Option<ErrorPage>,
}

impl ErrorPageTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a validated page, replacing any page with the same key
    pub fn insert(&mut self, page: ErrorPage) {
        if let Some(t) = &page.exception_type {
            self.by_exception.insert(t.clone(), page);
        } else if let Some(code) = page.error_code {
            self.by_status.insert(code, page);
        } else {
            self.default = Some(page);
        }
    }

    pub fn remove(&mut self, page: &ErrorPage) {
        if let Some(t) = &page.exception_type {
            self.by_exception.remove(t);
        } else if let Some(code) = page.error_code {
            self.by_status.remove(&code);
        } else {
            self.default = None;
        }
    }

    pub fn find_by_status(&self, code: u16) -> Option<&ErrorPage> {
        self.by_status.get(&code)
    }

    pub fn find_by_exception(&self, exception_type: &str) -> Option<&ErrorPage> {
        self.by_exception.get(exception_type)
    }

    /// Closest page for `error`, walking its type chain from the most specific type
    pub fn find_for_error(&self, error: &ServletError) -> Option<&ErrorPage> {
        if self.by_exception.is_empty() {
            return None;
        }
        error
            .exception_types()
            .into_iter()
            .find_map(|t| self.by_exception.get(t))
    }

    pub fn default_page(&self) -> Option<&ErrorPage> {
        self.default.as_ref()
    }

    pub fn all(&self) -> Vec<ErrorPage> {
        let mut pages: Vec<ErrorPage> = self
            .by_exception
            .values()
            .chain(self.by_status.values())
            .cloned()
            .collect();
        pages.extend(self.default.clone());
        pages
    }

    pub fn clear(&mut self) {
        self.by_status.clear();
        self.by_exception.clear();
        self.default = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApplicationError;

    #[test]
    fn test_exception_lookup_walks_type_chain() {
        let mut table = ErrorPageTable::new();
        table.insert(ErrorPage::for_exception("RuntimeException", "/runtime.html"));
        table.insert(ErrorPage::for_status(500, "/500.html"));

        let err: ServletError = ApplicationError::runtime("IllegalStateException", "bad").into();
        assert_eq!(table.find_for_error(&err).unwrap().location, "/runtime.html");

        let io = ServletError::Io(std::io::Error::other("disk"));
        assert!(table.find_for_error(&io).is_none());
        assert_eq!(table.find_by_status(500).unwrap().location, "/500.html");
    }

    #[test]
    fn test_default_page() {
        let mut table = ErrorPageTable::new();
        let page = ErrorPage::default_page("/oops.html");
        assert!(page.is_default());
        table.insert(page.clone());
        assert_eq!(table.default_page(), Some(&page));

        table.remove(&page);
        assert!(table.default_page().is_none());
    }

    #[test]
    fn test_validate_rejects_both_keys_and_bad_status() {
        let both = ErrorPage {
            location: "/oops".to_string(),
            error_code: Some(500),
            exception_type: Some("RuntimeException".to_string()),
        };
        assert!(matches!(both.validate(), Err(ContainerError::IllegalArgument(_))));
        assert!(ErrorPage::for_status(302, "/moved").validate().is_err());
        assert!(ErrorPage::for_status(404, "/missing").validate().is_ok());
        assert!(ErrorPage::for_exception("RuntimeException", "/rt").validate().is_ok());
        assert!(ErrorPage::default_page("/oops").validate().is_ok());
    }
}
