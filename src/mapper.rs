// URL mapping table
// Resolves a context-relative path to a servlet name with servlet-mapping precedence

use std::collections::HashMap;
use tracing::debug;

/// Which rule matched a request path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchType {
    ContextRoot,
    Exact,
    Path,
    Extension,
    Welcome,
    Default,
}

/// Scratch result of a mapping operation. Reused between calls via [`MappingData::recycle`].
#[derive(Debug, Default, Clone)]
pub struct MappingData {
    pub wrapper_name: Option<String>,
    pub servlet_path: String,
    pub path_info: Option<String>,
    pub match_type: Option<MatchType>,
    /// Path actually mapped; differs from the input for welcome-file matches
    pub request_path: String,
}

impl MappingData {
    pub fn recycle(&mut self) {
        self.wrapper_name = None;
        self.servlet_path.clear();
        self.path_info = None;
        self.match_type = None;
        self.request_path.clear();
    }

    pub fn is_mapped(&self) -> bool {
        self.wrapper_name.is_some()
    }

    fn set(&mut self, name: &str, servlet_path: &str, path_info: Option<&str>, kind: MatchType) {
        self.wrapper_name = Some(name.to_string());
        self.servlet_path.clear();
        self.servlet_path.push_str(servlet_path);
        self.path_info = path_info.map(str::to_string);
        self.match_type = Some(kind);
    }
}

/// Immutable-by-convention mapping table; contexts copy, modify and swap it
#[derive(Debug, Default, Clone)]
pub struct Mapper {
    exact: HashMap<String, String>,
    /// Prefix patterns without the trailing `/*`, longest first
    prefix: Vec<(String, String)>,
    extension: HashMap<String, String>,
    default: Option<String>,
    context_root: Option<String>,
    welcome_files: Vec<String>,
}

impl Mapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `pattern` for `wrapper`. Patterns must already be validated.
    pub fn add_mapping(&mut self, pattern: &str, wrapper: &str) {
        let wrapper = wrapper.to_string();
        if pattern.is_empty() {
            self.context_root = Some(wrapper);
        } else if pattern == "/" {
            self.default = Some(wrapper);
        } else if let Some(ext) = pattern.strip_prefix("*.") {
            self.extension.insert(ext.to_string(), wrapper);
        } else if let Some(base) = pattern.strip_suffix("/*") {
            self.prefix.retain(|(p, _)| p != base);
            self.prefix.push((base.to_string(), wrapper));
            self.prefix.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        } else {
            self.exact.insert(pattern.to_string(), wrapper);
        }
        debug!(pattern = %pattern, "Mapping registered");
    }

    pub fn remove_mapping(&mut self, pattern: &str) {
        if pattern.is_empty() {
            self.context_root = None;
        } else if pattern == "/" {
            self.default = None;
        } else if let Some(ext) = pattern.strip_prefix("*.") {
            self.extension.remove(ext);
        } else if let Some(base) = pattern.strip_suffix("/*") {
            self.prefix.retain(|(p, _)| p != base);
        } else {
            self.exact.remove(pattern);
        }
    }

    /// Remove every pattern pointing at `wrapper`
    pub fn remove_wrapper(&mut self, wrapper: &str) {
        self.exact.retain(|_, w| w != wrapper);
        self.prefix.retain(|(_, w)| w != wrapper);
        self.extension.retain(|_, w| w != wrapper);
        if self.default.as_deref() == Some(wrapper) {
            self.default = None;
        }
        if self.context_root.as_deref() == Some(wrapper) {
            self.context_root = None;
        }
    }

    pub fn set_welcome_files(&mut self, files: Vec<String>) {
        self.welcome_files = files;
    }

    /// Wrapper name registered for exactly this pattern
    pub fn wrapper_for_pattern(&self, pattern: &str) -> Option<&str> {
        if pattern.is_empty() {
            self.context_root.as_deref()
        } else if pattern == "/" {
            self.default.as_deref()
        } else if let Some(ext) = pattern.strip_prefix("*.") {
            self.extension.get(ext).map(String::as_str)
        } else if let Some(base) = pattern.strip_suffix("/*") {
            self.prefix
                .iter()
                .find(|(p, _)| p == base)
                .map(|(_, w)| w.as_str())
        } else {
            self.exact.get(pattern).map(String::as_str)
        }
    }

    /// All (pattern, wrapper) pairs, sorted by pattern
    pub fn patterns(&self) -> Vec<(String, String)> {
        let mut all: Vec<(String, String)> = Vec::new();
        if let Some(w) = &self.context_root {
            all.push((String::new(), w.clone()));
        }
        if let Some(w) = &self.default {
            all.push(("/".to_string(), w.clone()));
        }
        all.extend(self.exact.iter().map(|(p, w)| (p.clone(), w.clone())));
        all.extend(self.prefix.iter().map(|(p, w)| (format!("{}/*", p), w.clone())));
        all.extend(self.extension.iter().map(|(e, w)| (format!("*.{}", e), w.clone())));
        all.sort();
        all
    }

    /// Map a context-relative `path`.
    ///
    /// `resource_exists` tells whether a static resource exists at a context-relative
    /// path; it is only consulted for welcome files.
    pub fn map(&self, path: &str, data: &mut MappingData, resource_exists: &dyn Fn(&str) -> bool) {
        data.recycle();
        let path = if path.is_empty() { "/" } else { path };
        data.request_path.push_str(path);

        if path == "/" {
            if let Some(root) = &self.context_root {
                data.set(root, "", Some("/"), MatchType::ContextRoot);
                return;
            }
        }

        if self.map_exact(path, data)
            || self.map_prefix(path, data)
            || self.map_extension(path, data)
        {
            return;
        }

        if path.ends_with('/') && self.map_welcome(path, data, resource_exists) {
            return;
        }

        if let Some(default) = &self.default {
            data.set(default, path, None, MatchType::Default);
        }
    }

    fn map_exact(&self, path: &str, data: &mut MappingData) -> bool {
        match self.exact.get(path) {
            Some(w) => {
                data.set(w, path, None, MatchType::Exact);
                true
            }
            None => false,
        }
    }

    fn map_prefix(&self, path: &str, data: &mut MappingData) -> bool {
        for (base, w) in &self.prefix {
            if base.is_empty() {
                data.set(w, "", Some(path), MatchType::Path);
                return true;
            }
            if path == base {
                data.set(w, base, None, MatchType::Path);
                return true;
            }
            if let Some(rest) = path.strip_prefix(base.as_str()) {
                if rest.starts_with('/') {
                    data.set(w, base, Some(rest), MatchType::Path);
                    return true;
                }
            }
        }
        false
    }

    fn map_extension(&self, path: &str, data: &mut MappingData) -> bool {
        let last_segment = path.rsplit('/').next().unwrap_or(path);
        let Some((_, ext)) = last_segment.rsplit_once('.') else {
            return false;
        };
        match self.extension.get(ext) {
            Some(w) => {
                data.set(w, path, None, MatchType::Extension);
                true
            }
            None => false,
        }
    }

    fn map_welcome(
        &self,
        path: &str,
        data: &mut MappingData,
        resource_exists: &dyn Fn(&str) -> bool,
    ) -> bool {
        for file in &self.welcome_files {
            let candidate = format!("{}{}", path, file);
            if self.map_exact(&candidate, data) {
                data.match_type = Some(MatchType::Welcome);
                data.request_path = candidate;
                return true;
            }
            if resource_exists(&candidate) {
                if self.map_extension(&candidate, data) {
                    data.match_type = Some(MatchType::Welcome);
                    data.request_path = candidate;
                    return true;
                }
                if let Some(default) = &self.default {
                    data.set(default, &candidate, None, MatchType::Welcome);
                    data.request_path = candidate;
                    return true;
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapper() -> Mapper {
        let mut m = Mapper::new();
        m.add_mapping("/echo", "echo");
        m.add_mapping("/api/*", "api");
        m.add_mapping("/api/v2/*", "api2");
        m.add_mapping("*.jsp", "jsp");
        m.add_mapping("/", "default");
        m.set_welcome_files(vec!["index.jsp".into(), "index.html".into()]);
        m
    }

    fn no_resources(_: &str) -> bool {
        false
    }

    #[test]
    fn test_precedence() {
        let m = mapper();
        let mut data = MappingData::default();

        m.map("/echo", &mut data, &no_resources);
        assert_eq!(data.wrapper_name.as_deref(), Some("echo"));
        assert_eq!(data.match_type, Some(MatchType::Exact));

        m.map("/api/v2/users", &mut data, &no_resources);
        assert_eq!(data.wrapper_name.as_deref(), Some("api2"));
        assert_eq!(data.servlet_path, "/api/v2");
        assert_eq!(data.path_info.as_deref(), Some("/users"));

        m.map("/api", &mut data, &no_resources);
        assert_eq!(data.wrapper_name.as_deref(), Some("api"));
        assert_eq!(data.path_info, None);

        m.map("/apix", &mut data, &no_resources);
        assert_eq!(data.wrapper_name.as_deref(), Some("default"));

        m.map("/api/page.jsp", &mut data, &no_resources);
        assert_eq!(data.wrapper_name.as_deref(), Some("api"), "prefix beats extension");

        m.map("/shop/cart.jsp", &mut data, &no_resources);
        assert_eq!(data.wrapper_name.as_deref(), Some("jsp"));
    }

    #[test]
    fn test_welcome_files() {
        let m = mapper();
        let mut data = MappingData::default();

        m.map("/docs/", &mut data, &|p| p == "/docs/index.html");
        assert_eq!(data.wrapper_name.as_deref(), Some("default"));
        assert_eq!(data.match_type, Some(MatchType::Welcome));
        assert_eq!(data.request_path, "/docs/index.html");

        m.map("/", &mut data, &|p| p == "/index.jsp");
        assert_eq!(data.wrapper_name.as_deref(), Some("jsp"));
    }

    #[test]
    fn test_context_root_and_removal() {
        let mut m = mapper();
        m.add_mapping("", "home");
        let mut data = MappingData::default();

        m.map("/", &mut data, &no_resources);
        assert_eq!(data.wrapper_name.as_deref(), Some("home"));
        assert_eq!(data.servlet_path, "");
        assert_eq!(data.path_info.as_deref(), Some("/"));

        m.remove_mapping("/echo");
        m.map("/echo", &mut data, &no_resources);
        assert_eq!(data.wrapper_name.as_deref(), Some("default"));

        m.remove_wrapper("default");
        m.map("/echo", &mut data, &no_resources);
        assert!(!data.is_mapped());
    }

    #[test]
    fn test_catch_all_prefix() {
        let mut m = Mapper::new();
        m.add_mapping("/*", "all");
        let mut data = MappingData::default();
        m.map("/anything/here", &mut data, &no_resources);
        assert_eq!(data.wrapper_name.as_deref(), Some("all"));
        assert_eq!(data.servlet_path, "");
        assert_eq!(data.path_info.as_deref(), Some("/anything/here"));
    }
}
