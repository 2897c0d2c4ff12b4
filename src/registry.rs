// Servlet and filter registrations
// Handles returned by programmatic registration plus URL pattern validation

use crate::context::Context;
use crate::error::ContainerError;
use crate::filter_chain::FilterMap;
use crate::http::DispatcherType;
use crate::servlet::MultipartConfig;
use crate::wrapper::Wrapper;
use std::collections::HashSet;
use std::sync::{Arc, Weak};
use tracing::warn;

/// Is `pattern` a legal servlet URL pattern?
///
/// Legal patterns are `""` (context root), `*.ext` and anything starting with `/`
/// that does not contain an embedded `*.`.
pub fn validate_url_pattern(pattern: &str) -> bool {
    if pattern.is_empty() {
        return true;
    }
    if pattern.contains('\n') || pattern.contains('\r') {
        warn!(pattern = %pattern.escape_debug(), "URL pattern contains a line break");
        return false;
    }
    if let Some(ext) = pattern.strip_prefix("*.") {
        if pattern.contains('/') {
            return false;
        }
        check_unusual_pattern(pattern, ext);
        return true;
    }
    if pattern.starts_with('/') && !pattern.contains("*.") {
        check_unusual_pattern(pattern, "");
        return true;
    }
    false
}

fn check_unusual_pattern(pattern: &str, ext: &str) {
    let stray_star = if pattern.starts_with('/') {
        let body = pattern.strip_suffix("/*").unwrap_or(pattern);
        body.contains('*')
    } else {
        ext.contains('*')
    };
    if stray_star {
        warn!(pattern = %pattern, "URL pattern contains '*' where it is matched literally");
    }
}

/// Add the leading `/` that version 2.2 applications were allowed to omit
pub fn adjust_url_pattern(pattern: &str, servlet22: bool) -> String {
    if pattern.is_empty() || pattern.starts_with('/') || pattern.starts_with("*.") || !servlet22 {
        return pattern.to_string();
    }
    format!("/{}", pattern)
}

fn context_gone(kind: &str, name: &str) -> ContainerError {
    ContainerError::IllegalState(format!("the context owning {} '{}' no longer exists", kind, name))
}

/// Mutable only until the owning context has been initialized
fn check_mutable(context: &Weak<Context>, kind: &str, name: &str) -> Result<Arc<Context>, ContainerError> {
    let context = context.upgrade().ok_or_else(|| context_gone(kind, name))?;
    if context.is_context_initialized() {
        return Err(ContainerError::IllegalState(format!(
            "{} '{}' cannot be changed: context {} has already been initialized",
            kind,
            name,
            context.path()
        )));
    }
    Ok(context)
}

/// Registration handle for a servlet
#[derive(Clone)]
pub struct ServletRegistration {
    wrapper: Arc<Wrapper>,
    context: Weak<Context>,
    dynamic: bool,
}

impl ServletRegistration {
    pub(crate) fn new(wrapper: Arc<Wrapper>, context: Weak<Context>, dynamic: bool) -> Self {
        Self {
            wrapper,
            context,
            dynamic,
        }
    }

    pub fn name(&self) -> &str {
        self.wrapper.name()
    }

    pub fn class_name(&self) -> Option<String> {
        self.wrapper.servlet_class_name()
    }

    pub fn jsp_file(&self) -> Option<String> {
        self.wrapper.jsp_file()
    }

    pub fn wrapper(&self) -> &Arc<Wrapper> {
        &self.wrapper
    }

    /// Was this registration created through the programmatic API?
    pub fn is_dynamic(&self) -> bool {
        self.dynamic
    }

    /// Map the servlet to `patterns`. Returns the patterns already claimed by
    /// another servlet; nothing is mapped when that set is non-empty.
    pub fn add_mapping(&self, patterns: &[&str]) -> Result<HashSet<String>, ContainerError> {
        let context = check_mutable(&self.context, "servlet", self.name())?;
        context.add_servlet_mappings(self.name(), patterns)
    }

    pub fn mappings(&self) -> Vec<String> {
        self.wrapper.mappings()
    }

    /// Returns `false` when the parameter is already set
    pub fn set_init_parameter(&self, name: &str, value: &str) -> Result<bool, ContainerError> {
        check_mutable(&self.context, "servlet", self.name())?;
        if name.is_empty() {
            return Err(ContainerError::IllegalArgument(
                "init parameter name must not be empty".to_string(),
            ));
        }
        if self.wrapper.init_parameter(name).is_some() {
            return Ok(false);
        }
        self.wrapper.add_init_parameter(name, value);
        Ok(true)
    }

    pub fn init_parameter(&self, name: &str) -> Option<String> {
        self.wrapper.init_parameter(name)
    }

    pub fn set_load_on_startup(&self, value: i32) -> Result<(), ContainerError> {
        check_mutable(&self.context, "servlet", self.name())?;
        self.wrapper.set_load_on_startup(value);
        Ok(())
    }

    pub fn set_async_supported(&self, supported: bool) -> Result<(), ContainerError> {
        check_mutable(&self.context, "servlet", self.name())?;
        self.wrapper.set_async_supported(supported);
        Ok(())
    }

    pub fn set_multipart_config(&self, config: MultipartConfig) -> Result<(), ContainerError> {
        check_mutable(&self.context, "servlet", self.name())?;
        self.wrapper.set_multipart_config(Some(config));
        Ok(())
    }

    pub fn set_run_as_role(&self, role: &str) -> Result<(), ContainerError> {
        check_mutable(&self.context, "servlet", self.name())?;
        self.wrapper.set_run_as(Some(role.to_string()));
        Ok(())
    }
}

/// Registration handle for a filter
#[derive(Clone)]
pub struct FilterRegistration {
    name: String,
    context: Weak<Context>,
}

impl FilterRegistration {
    pub(crate) fn new(name: impl Into<String>, context: Weak<Context>) -> Self {
        Self {
            name: name.into(),
            context,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn class_name(&self) -> Option<String> {
        self.context
            .upgrade()?
            .find_filter_def(&self.name)
            .and_then(|def| def.filter_class)
    }

    /// Map the filter to URL patterns. `match_after` appends the mappings after
    /// those already declared, otherwise they go in front of them.
    pub fn add_mapping_for_url_patterns(
        &self,
        dispatchers: &[DispatcherType],
        match_after: bool,
        patterns: &[&str],
    ) -> Result<(), ContainerError> {
        let context = check_mutable(&self.context, "filter", &self.name)?;
        if patterns.is_empty() {
            return Err(ContainerError::IllegalArgument(format!(
                "no URL patterns given for filter '{}'",
                self.name
            )));
        }
        let maps = patterns
            .iter()
            .map(|p| FilterMap::for_url(self.name.clone(), *p).with_dispatchers(dispatchers))
            .collect::<Vec<_>>();
        for map in ordered(maps, match_after) {
            context.add_filter_map(map, match_after)?;
        }
        Ok(())
    }

    pub fn add_mapping_for_servlet_names(
        &self,
        dispatchers: &[DispatcherType],
        match_after: bool,
        servlet_names: &[&str],
    ) -> Result<(), ContainerError> {
        let context = check_mutable(&self.context, "filter", &self.name)?;
        if servlet_names.is_empty() {
            return Err(ContainerError::IllegalArgument(format!(
                "no servlet names given for filter '{}'",
                self.name
            )));
        }
        let maps = servlet_names
            .iter()
            .map(|s| FilterMap::for_servlet(self.name.clone(), *s).with_dispatchers(dispatchers))
            .collect::<Vec<_>>();
        for map in ordered(maps, match_after) {
            context.add_filter_map(map, match_after)?;
        }
        Ok(())
    }

    pub fn url_pattern_mappings(&self) -> Vec<String> {
        self.maps()
            .into_iter()
            .filter_map(|m| m.url_pattern)
            .collect()
    }

    pub fn servlet_name_mappings(&self) -> Vec<String> {
        self.maps()
            .into_iter()
            .filter_map(|m| m.servlet_name)
            .collect()
    }

    fn maps(&self) -> Vec<FilterMap> {
        match self.context.upgrade() {
            Some(context) => context
                .find_filter_maps()
                .iter()
                .filter(|m| m.filter_name == self.name)
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    /// Returns `false` when the parameter is already set
    pub fn set_init_parameter(&self, name: &str, value: &str) -> Result<bool, ContainerError> {
        let context = check_mutable(&self.context, "filter", &self.name)?;
        context
            .update_filter_def(&self.name, |def| {
                if def.init_params.contains_key(name) {
                    false
                } else {
                    def.init_params.insert(name.to_string(), value.to_string());
                    true
                }
            })
            .ok_or_else(|| ContainerError::UnknownFilter(self.name.clone()))
    }

    pub fn set_async_supported(&self, supported: bool) -> Result<(), ContainerError> {
        let context = check_mutable(&self.context, "filter", &self.name)?;
        context
            .update_filter_def(&self.name, |def| def.async_supported = supported)
            .ok_or_else(|| ContainerError::UnknownFilter(self.name.clone()))
    }
}

/// Keep declared order for both insertion modes. Front insertion reverses,
/// so the batch is fed in reverse.
fn ordered(mut maps: Vec<FilterMap>, match_after: bool) -> Vec<FilterMap> {
    if !match_after {
        maps.reverse();
    }
    maps
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_url_pattern() {
        assert!(validate_url_pattern(""));
        assert!(validate_url_pattern("/"));
        assert!(validate_url_pattern("/foo/*"));
        assert!(validate_url_pattern("*.jsp"));
        assert!(!validate_url_pattern("foo"));
        assert!(!validate_url_pattern("*.jsp/x"));
        assert!(!validate_url_pattern("/foo/*.jsp"));
        assert!(!validate_url_pattern("/foo\nbar"));
    }

    #[test]
    fn test_adjust_only_for_servlet22() {
        assert_eq!(adjust_url_pattern("foo", true), "/foo");
        assert_eq!(adjust_url_pattern("foo", false), "foo");
        assert_eq!(adjust_url_pattern("*.do", true), "*.do");
        assert_eq!(adjust_url_pattern("/bar", true), "/bar");
    }
}
