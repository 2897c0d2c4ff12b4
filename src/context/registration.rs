// Servlet, filter and listener registration for a context
// Name uniqueness, preliminary registrations and URL mapping conflicts

use super::{display_path, Context, ServletContainerInitializer};
use crate::error::ContainerError;
use crate::filter_chain::{ApplicationFilterConfig, FilterDef, FilterMap};
use crate::lifecycle::{ContainerEvent, LifecycleState};
use crate::listener::EventListener;
use crate::registry::{adjust_url_pattern, validate_url_pattern, FilterRegistration, ServletRegistration};
use crate::servlet::{Filter, FilterClass, Servlet, ServletClass};
use crate::wrapper::{Wrapper, DEFAULT_SERVLET_NAME, JSP_SERVLET_NAME};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How a servlet is supplied to [`Context::add_servlet`]
pub enum ServletSource {
    ClassName(String),
    Class(ServletClass),
    Instance(Arc<dyn Servlet>),
}

/// How a filter is supplied to [`Context::add_filter`]
pub enum FilterSource {
    ClassName(String),
    Class(FilterClass),
    Instance(Arc<dyn Filter>),
}

fn is_container_servlet(name: &str) -> bool {
    name == DEFAULT_SERVLET_NAME || name == JSP_SERVLET_NAME
}

impl Context {
    fn check_not_initialized(&self, operation: &str) -> Result<(), ContainerError> {
        if self.is_context_initialized() {
            return Err(ContainerError::IllegalState(format!(
                "{} is not allowed: context {} has already been initialized",
                operation,
                display_path(self.path())
            )));
        }
        Ok(())
    }

    /// New wrapper carrying this context's wrapper defaults
    pub fn create_wrapper(&self, name: impl Into<String>) -> Arc<Wrapper> {
        let wrapper = Arc::new(Wrapper::new(name));
        let defaults = self.wrapper_defaults();
        wrapper.set_unload_delay(defaults.unload_delay);
        wrapper.set_max_instances(defaults.max_instances);
        wrapper.set_default_unavailable_secs(defaults.default_unavailable_secs);
        wrapper.set_context(self.weak());
        wrapper
    }

    // ---- servlets ----

    /// Add a servlet declared by the deployment descriptor.
    ///
    /// A wrapper with neither a class nor a JSP file only creates a preliminary
    /// registration; [`Context::add_servlet`] completes it later.
    pub fn add_child(&self, wrapper: Arc<Wrapper>) -> Result<(), ContainerError> {
        self.add_child_internal(wrapper, false, true)
    }

    fn add_child_internal(
        &self,
        wrapper: Arc<Wrapper>,
        programmatic: bool,
        create_registration: bool,
    ) -> Result<(), ContainerError> {
        let name = wrapper.name().to_string();
        if name.is_empty() {
            return Err(ContainerError::IllegalArgument(
                "servlet name must not be empty".to_string(),
            ));
        }
        if name != JSP_SERVLET_NAME && self.child_index.contains_key(&name) {
            return Err(ContainerError::Duplicate {
                kind: "servlet",
                name,
            });
        }
        wrapper.set_context(self.weak());

        if create_registration {
            let dynamic = programmatic || !wrapper.has_servlet_source();
            self.servlet_registrations.insert(
                name.clone(),
                ServletRegistration::new(wrapper.clone(), self.weak(), dynamic),
            );
            if !wrapper.has_servlet_source() {
                debug!(context = %display_path(self.path()), servlet = %name, "Preliminary servlet registration");
                return Ok(());
            }
        }

        if let Some(jsp_file) = wrapper.jsp_file() {
            if !jsp_file.starts_with('/') {
                if !self.is_servlet22() {
                    return Err(ContainerError::IllegalArgument(format!(
                        "JSP file '{}' of servlet '{}' must start with '/'",
                        jsp_file, name
                    )));
                }
                wrapper.set_jsp_file(format!("/{}", jsp_file));
            }
        }

        // The application may replace the container's JSP servlet and inherits its mappings
        let replaced_jsp = if name == JSP_SERVLET_NAME {
            self.detach_child(JSP_SERVLET_NAME)
        } else {
            None
        };

        {
            let mut children = self.children.write();
            if self.child_index.contains_key(&name) {
                return Err(ContainerError::Duplicate {
                    kind: "servlet",
                    name,
                });
            }
            children.push(wrapper.clone());
            self.child_index.insert(name.clone(), wrapper.clone());
        }
        if matches!(
            self.lifecycle_state(),
            LifecycleState::Starting | LifecycleState::Available
        ) {
            wrapper.start();
        }
        self.fire_container_event(ContainerEvent::AddChild(name.clone()));

        if let Some(old) = replaced_jsp {
            for pattern in old.mappings() {
                self.add_servlet_mapping(&pattern, &name)?;
            }
            stop_detached(old);
        }
        Ok(())
    }

    /// Unlink a child and its URL mappings without stopping it
    fn detach_child(&self, name: &str) -> Option<Arc<Wrapper>> {
        let wrapper = {
            let mut children = self.children.write();
            let (_, wrapper) = self.child_index.remove(name)?;
            children.retain(|c| !Arc::ptr_eq(c, &wrapper));
            wrapper
        };
        {
            let mut mappings = self.servlet_mappings.write();
            let owned: Vec<String> = mappings
                .iter()
                .filter(|(_, servlet)| servlet.as_str() == name)
                .map(|(pattern, _)| pattern.clone())
                .collect();
            for pattern in &owned {
                mappings.remove(pattern);
            }
            self.update_mapper(|m| m.remove_wrapper(name));
        }
        self.fire_container_event(ContainerEvent::RemoveChild(name.to_string()));
        Some(wrapper)
    }

    /// Remove a servlet, unloading it if it was started
    pub async fn remove_child(&self, name: &str) -> Option<Arc<Wrapper>> {
        let wrapper = self.detach_child(name)?;
        self.servlet_registrations.remove(name);
        if wrapper.lifecycle_state() == LifecycleState::Available {
            wrapper.stop().await;
        }
        Some(wrapper)
    }

    pub fn find_child(&self, name: &str) -> Option<Arc<Wrapper>> {
        self.child_index.get(name).map(|w| w.value().clone())
    }

    /// Servlets in declaration order
    pub fn find_children(&self) -> Vec<Arc<Wrapper>> {
        self.children.read().clone()
    }

    /// Register a servlet programmatically. Completes a preliminary registration of
    /// the same name; fails once the context has been initialized.
    pub fn add_servlet(&self, name: &str, source: ServletSource) -> Result<ServletRegistration, ContainerError> {
        self.check_not_initialized("add_servlet")?;
        if name.is_empty() {
            return Err(ContainerError::IllegalArgument(
                "servlet name must not be empty".to_string(),
            ));
        }
        if self.child_index.contains_key(name) {
            return Err(ContainerError::Duplicate {
                kind: "servlet",
                name: name.to_string(),
            });
        }
        if let ServletSource::Instance(servlet) = &source {
            let shared = self
                .find_children()
                .iter()
                .any(|w| w.servlet().is_some_and(|s| Arc::ptr_eq(&s, servlet)));
            if shared {
                return Err(ContainerError::Duplicate {
                    kind: "servlet instance",
                    name: name.to_string(),
                });
            }
        }

        let preliminary = self
            .servlet_registrations
            .get(name)
            .map(|r| r.wrapper().clone());
        let wrapper = preliminary
            .clone()
            .unwrap_or_else(|| self.create_wrapper(name));
        match source {
            ServletSource::ClassName(class_name) => wrapper.set_servlet_class_name(class_name)?,
            ServletSource::Class(class) => wrapper.set_servlet_class(class)?,
            ServletSource::Instance(servlet) => wrapper.set_servlet(servlet)?,
        }

        self.add_child_internal(wrapper.clone(), true, true)?;
        info!(context = %display_path(self.path()), servlet = %name, "Servlet registered");
        Ok(ServletRegistration::new(wrapper, self.weak(), true))
    }

    pub fn servlet_registration(&self, name: &str) -> Option<ServletRegistration> {
        self.servlet_registrations.get(name).map(|r| r.value().clone())
    }

    pub fn servlet_registrations(&self) -> Vec<ServletRegistration> {
        self.servlet_registrations
            .iter()
            .map(|r| r.value().clone())
            .collect()
    }

    // ---- servlet mappings ----

    /// Map `pattern` to servlet `name`.
    ///
    /// A user servlet silently takes over a pattern held by the container's default
    /// or JSP servlet; the container servlets never displace a user mapping. Any other
    /// collision fails.
    pub fn add_servlet_mapping(&self, pattern: &str, name: &str) -> Result<(), ContainerError> {
        let registration = self
            .servlet_registration(name)
            .ok_or_else(|| ContainerError::IllegalArgument(format!("unknown servlet '{}'", name)))?;

        let pattern = adjust_url_pattern(&percent_decode(pattern), self.is_servlet22());
        if !validate_url_pattern(&pattern) {
            return Err(ContainerError::InvalidUrlPattern(pattern));
        }

        {
            let mut mappings = self.servlet_mappings.write();
            if let Some(existing) = mappings.get(&pattern).cloned() {
                if existing == name {
                    return Ok(());
                }
                if !is_container_servlet(&existing) && !is_container_servlet(name) {
                    return Err(ContainerError::DuplicateMapping {
                        name: name.to_string(),
                        pattern,
                        existing,
                    });
                }
                if !is_container_servlet(&existing) {
                    debug!(pattern = %pattern, existing = %existing, servlet = %name, "Keeping application mapping over container servlet");
                    return Ok(());
                }
                if let Some(previous) = self.find_child(&existing) {
                    previous.remove_mapping(&pattern);
                }
                self.update_mapper(|m| m.remove_mapping(&pattern));
                debug!(pattern = %pattern, existing = %existing, servlet = %name, "Overriding container servlet mapping");
            }
            mappings.insert(pattern.clone(), name.to_string());
            self.update_mapper(|m| m.add_mapping(&pattern, name));
        }

        registration.wrapper().add_mapping(pattern.clone());
        self.fire_container_event(ContainerEvent::AddServletMapping(pattern));
        Ok(())
    }

    /// Map servlet `name` to every pattern, or to none of them. Returns the patterns
    /// already held by other application servlets.
    pub fn add_servlet_mappings(&self, name: &str, patterns: &[&str]) -> Result<HashSet<String>, ContainerError> {
        if self.servlet_registration(name).is_none() {
            return Err(ContainerError::IllegalArgument(format!("unknown servlet '{}'", name)));
        }
        let servlet22 = self.is_servlet22();
        let mut conflicts = HashSet::new();
        {
            let mappings = self.servlet_mappings.read();
            for raw in patterns {
                let pattern = adjust_url_pattern(&percent_decode(raw), servlet22);
                if !validate_url_pattern(&pattern) {
                    return Err(ContainerError::InvalidUrlPattern(pattern));
                }
                if let Some(existing) = mappings.get(&pattern) {
                    if existing != name && !is_container_servlet(existing) && !is_container_servlet(name) {
                        conflicts.insert(pattern);
                    }
                }
            }
        }
        if !conflicts.is_empty() {
            warn!(servlet = %name, conflicts = ?conflicts, "Servlet mappings rejected");
            return Ok(conflicts);
        }
        for pattern in patterns {
            self.add_servlet_mapping(pattern, name)?;
        }
        Ok(conflicts)
    }

    pub fn find_servlet_mapping(&self, pattern: &str) -> Option<String> {
        self.servlet_mappings.read().get(pattern).cloned()
    }

    /// Pattern to servlet name
    pub fn servlet_mappings(&self) -> BTreeMap<String, String> {
        self.servlet_mappings.read().clone()
    }

    pub fn remove_servlet_mapping(&self, pattern: &str) {
        let removed = {
            let mut mappings = self.servlet_mappings.write();
            let removed = mappings.remove(pattern);
            if removed.is_some() {
                self.update_mapper(|m| m.remove_mapping(pattern));
            }
            removed
        };
        if let Some(name) = removed {
            if let Some(wrapper) = self.find_child(&name) {
                wrapper.remove_mapping(pattern);
            }
            self.fire_container_event(ContainerEvent::RemoveServletMapping(pattern.to_string()));
        }
    }

    // ---- filters ----

    /// Add a filter declared by the deployment descriptor. A definition without a
    /// class only creates a preliminary registration.
    pub fn add_filter_def(&self, def: FilterDef) -> Result<(), ContainerError> {
        if def.filter_name.is_empty() {
            return Err(ContainerError::IllegalArgument(
                "filter name must not be empty".to_string(),
            ));
        }
        let name = def.filter_name.clone();
        self.filter_registrations
            .insert(name.clone(), FilterRegistration::new(name.clone(), self.weak()));
        if !def.has_class() {
            debug!(context = %display_path(self.path()), filter = %name, "Preliminary filter registration");
        }
        let mut defs = self.filter_defs.write();
        match defs.iter_mut().find(|d| d.filter_name == name) {
            Some(existing) => *existing = def,
            None => defs.push(def),
        }
        Ok(())
    }

    /// Register a filter programmatically, completing a preliminary registration of
    /// the same name
    pub fn add_filter(&self, name: &str, source: FilterSource) -> Result<FilterRegistration, ContainerError> {
        self.check_not_initialized("add_filter")?;
        if name.is_empty() {
            return Err(ContainerError::IllegalArgument(
                "filter name must not be empty".to_string(),
            ));
        }
        let apply = |def: FilterDef| match source {
            FilterSource::ClassName(class_name) => def.with_class_name(class_name),
            FilterSource::Class(class) => def.with_class(class),
            FilterSource::Instance(filter) => def.with_filter(filter),
        };

        {
            let mut defs = self.filter_defs.write();
            match defs.iter_mut().find(|d| d.filter_name == name) {
                Some(existing) if existing.has_class() => {
                    return Err(ContainerError::Duplicate {
                        kind: "filter",
                        name: name.to_string(),
                    });
                }
                Some(existing) => {
                    let completed = apply(std::mem::take(existing));
                    *existing = completed;
                }
                None => defs.push(apply(FilterDef::new(name))),
            }
        }

        let registration = FilterRegistration::new(name, self.weak());
        self.filter_registrations
            .insert(name.to_string(), registration.clone());
        info!(context = %display_path(self.path()), filter = %name, "Filter registered");
        Ok(registration)
    }

    pub fn find_filter_def(&self, name: &str) -> Option<FilterDef> {
        self.filter_defs
            .read()
            .iter()
            .find(|d| d.filter_name == name)
            .cloned()
    }

    /// Filter definitions in declaration order
    pub fn filter_defs(&self) -> Vec<FilterDef> {
        self.filter_defs.read().clone()
    }

    pub(crate) fn update_filter_def<R>(&self, name: &str, f: impl FnOnce(&mut FilterDef) -> R) -> Option<R> {
        let mut defs = self.filter_defs.write();
        defs.iter_mut().find(|d| d.filter_name == name).map(f)
    }

    pub fn remove_filter_def(&self, name: &str) {
        self.filter_defs.write().retain(|d| d.filter_name != name);
        self.filter_registrations.remove(name);
    }

    pub fn filter_registration(&self, name: &str) -> Option<FilterRegistration> {
        self.filter_registrations.get(name).map(|r| r.value().clone())
    }

    /// Add a filter mapping after (`match_after`) or before the existing ones
    pub fn add_filter_map(&self, map: FilterMap, match_after: bool) -> Result<(), ContainerError> {
        if !self.filter_registrations.contains_key(&map.filter_name) {
            return Err(ContainerError::UnknownFilter(map.filter_name));
        }
        match (&map.servlet_name, &map.url_pattern) {
            (Some(_), Some(_)) | (None, None) => {
                return Err(ContainerError::IllegalArgument(format!(
                    "filter mapping for '{}' needs either a servlet name or a URL pattern",
                    map.filter_name
                )));
            }
            (None, Some(pattern)) if !validate_url_pattern(pattern) => {
                return Err(ContainerError::InvalidUrlPattern(pattern.clone()));
            }
            _ => {}
        }

        let name = map.filter_name.clone();
        {
            let mut maps = self.filter_maps.write();
            let mut next = Vec::clone(&maps);
            if match_after {
                next.push(map);
            } else {
                next.insert(0, map);
            }
            *maps = Arc::new(next);
        }
        self.fire_container_event(ContainerEvent::AddFilterMap(name));
        Ok(())
    }

    pub fn remove_filter_map(&self, map: &FilterMap) {
        let mut maps = self.filter_maps.write();
        let next: Vec<FilterMap> = maps.iter().filter(|m| *m != map).cloned().collect();
        *maps = Arc::new(next);
    }

    /// Snapshot of the filter mappings in match order
    pub fn find_filter_maps(&self) -> Arc<Vec<FilterMap>> {
        self.filter_maps.read().clone()
    }

    /// Started filter configuration, present once filters have started
    pub fn find_filter_config(&self, name: &str) -> Option<Arc<ApplicationFilterConfig>> {
        self.filter_configs.read().get(name).cloned()
    }

    // ---- listeners and initializers ----

    /// Declare a listener by class name; it is instantiated at every start
    pub fn add_listener_class(&self, class_name: impl Into<String>) -> Result<(), ContainerError> {
        self.check_not_initialized("add_listener")?;
        let class_name = class_name.into();
        let mut classes = self.listener_classes.write();
        if !classes.contains(&class_name) {
            classes.push(class_name);
        }
        Ok(())
    }

    pub fn listener_classes(&self) -> Vec<String> {
        self.listener_classes.read().clone()
    }

    /// Register a listener instance
    pub fn add_listener(&self, listener: EventListener) -> Result<(), ContainerError> {
        self.check_not_initialized("add_listener")?;
        self.declared_listeners.write().push(listener);
        Ok(())
    }

    /// Register a container initializer with the classes it declared interest in
    pub fn add_servlet_container_initializer(
        &self,
        initializer: Arc<dyn ServletContainerInitializer>,
        classes: Vec<String>,
    ) {
        self.initializers.write().push((initializer, classes));
    }

    /// Forget every registration. Used when the context is destroyed.
    pub(crate) fn clear_registrations(&self) {
        self.children.write().clear();
        self.child_index.clear();
        self.servlet_registrations.clear();
        self.filter_defs.write().clear();
        self.filter_registrations.clear();
        *self.filter_maps.write() = Arc::new(Vec::new());
        self.servlet_mappings.write().clear();
        self.update_mapper(|m| *m = crate::mapper::Mapper::new());
        self.listener_classes.write().clear();
        self.declared_listeners.write().clear();
        self.initializers.write().clear();
        self.error_pages.write().clear();
    }
}

/// Stop a wrapper that is no longer reachable through the context
fn stop_detached(wrapper: Arc<Wrapper>) {
    if wrapper.servlet().is_none() {
        return;
    }
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move { wrapper.stop().await });
        }
        Err(_) => warn!(servlet = %wrapper.name(), "Replaced servlet left loaded: no runtime to unload it"),
    }
}

/// Decode `%XX` escapes; malformed escapes are kept verbatim
fn percent_decode(input: &str) -> String {
    if !input.contains('%') {
        return input.to_string();
    }
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(value) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(value);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServletError;
    use crate::http::{Request, Response};
    use async_trait::async_trait;

    struct Hello;

    #[async_trait]
    impl Servlet for Hello {
        async fn service(&self, _req: &mut Request, resp: &mut Response) -> Result<(), ServletError> {
            resp.write_str("hello");
            Ok(())
        }
    }

    fn with_servlets(names: &[&str]) -> Arc<Context> {
        let context = Context::new("/app");
        for name in names {
            context
                .add_servlet(name, ServletSource::Instance(Arc::new(Hello)))
                .unwrap();
        }
        context
    }

    #[test]
    fn test_duplicate_mapping_between_user_servlets_fails() {
        let context = with_servlets(&["a", "b"]);
        context.add_servlet_mapping("/foo", "a").unwrap();
        let err = context.add_servlet_mapping("/foo", "b").unwrap_err();
        assert!(matches!(err, ContainerError::DuplicateMapping { ref existing, .. } if existing == "a"));
        assert_eq!(context.find_servlet_mapping("/foo").as_deref(), Some("a"));
    }

    #[test]
    fn test_user_servlet_overrides_default_servlet() {
        let context = with_servlets(&["c"]);
        let default = context.create_wrapper(DEFAULT_SERVLET_NAME);
        default
            .set_servlet_class_name(crate::loader::DEFAULT_SERVLET_CLASS)
            .unwrap();
        context.add_child(default.clone()).unwrap();
        context.add_servlet_mapping("/foo", DEFAULT_SERVLET_NAME).unwrap();

        context.add_servlet_mapping("/foo", "c").unwrap();

        assert_eq!(context.find_servlet_mapping("/foo").as_deref(), Some("c"));
        assert!(default.mappings().is_empty());
        assert_eq!(context.mapper().wrapper_for_pattern("/foo"), Some("c"));

        // The default servlet cannot take the pattern back
        context.add_servlet_mapping("/foo", DEFAULT_SERVLET_NAME).unwrap();
        assert_eq!(context.find_servlet_mapping("/foo").as_deref(), Some("c"));
    }

    #[test]
    fn test_bulk_mapping_reports_conflicts_and_maps_nothing() {
        let context = with_servlets(&["a", "b"]);
        context.add_servlet_mapping("/taken", "a").unwrap();

        let conflicts = context.add_servlet_mappings("b", &["/free", "/taken"]).unwrap();
        assert_eq!(conflicts, HashSet::from(["/taken".to_string()]));
        assert!(context.find_servlet_mapping("/free").is_none());

        let conflicts = context.add_servlet_mappings("b", &["/free", "/other"]).unwrap();
        assert!(conflicts.is_empty());
        assert_eq!(context.find_servlet_mapping("/other").as_deref(), Some("b"));
    }

    #[test]
    fn test_invalid_and_unknown_mappings() {
        let context = with_servlets(&["a"]);
        assert!(matches!(
            context.add_servlet_mapping("nope", "a"),
            Err(ContainerError::InvalidUrlPattern(_))
        ));
        assert!(matches!(
            context.add_servlet_mapping("/x", "ghost"),
            Err(ContainerError::IllegalArgument(_))
        ));

        context.set_effective_version("2.2");
        context.add_servlet_mapping("legacy", "a").unwrap();
        assert_eq!(context.find_servlet_mapping("/legacy").as_deref(), Some("a"));
    }

    #[test]
    fn test_preliminary_servlet_registration_is_completed() {
        let context = Context::new("/app");
        context.add_child(context.create_wrapper("later")).unwrap();
        assert!(context.find_child("later").is_none());
        assert!(context.servlet_registration("later").is_some());

        context
            .add_servlet("later", ServletSource::Instance(Arc::new(Hello)))
            .unwrap();
        assert!(context.find_child("later").is_some());
        assert!(matches!(
            context.add_servlet("later", ServletSource::ClassName("x".into())),
            Err(ContainerError::Duplicate { .. })
        ));
    }

    #[test]
    fn test_same_instance_cannot_be_registered_twice() {
        let context = Context::new("/app");
        let servlet: Arc<dyn Servlet> = Arc::new(Hello);
        context.add_servlet("one", ServletSource::Instance(servlet.clone())).unwrap();
        assert!(context.add_servlet("two", ServletSource::Instance(servlet)).is_err());
    }

    #[test]
    fn test_filter_maps_before_and_after() {
        let context = Context::new("/app");
        context.add_filter("first", FilterSource::ClassName("F1".into())).unwrap();
        context.add_filter("second", FilterSource::ClassName("F2".into())).unwrap();
        context.add_filter_map(FilterMap::for_url("first", "/*"), true).unwrap();
        context.add_filter_map(FilterMap::for_url("second", "/*"), false).unwrap();

        let names: Vec<String> = context
            .find_filter_maps()
            .iter()
            .map(|m| m.filter_name.clone())
            .collect();
        assert_eq!(names, vec!["second", "first"]);

        assert!(matches!(
            context.add_filter_map(FilterMap::for_url("ghost", "/*"), true),
            Err(ContainerError::UnknownFilter(_))
        ));
        assert!(context.add_filter("first", FilterSource::ClassName("F3".into())).is_err());
    }

    #[test]
    fn test_error_page_with_both_keys_is_rejected() {
        let context = Context::new("/app");
        let page = crate::error_page::ErrorPage {
            location: "/oops".to_string(),
            error_code: Some(500),
            exception_type: Some("RuntimeException".to_string()),
        };
        assert!(matches!(
            context.add_error_page(page),
            Err(ContainerError::IllegalArgument(_))
        ));
        assert!(context.find_error_page_for_status(500).is_none());
        assert!(context.find_error_page_for_exception("RuntimeException").is_none());
        assert!(context.error_pages().is_empty());
    }

    #[test]
    fn test_percent_decode() {
        assert_eq!(percent_decode("/a%20b"), "/a b");
        assert_eq!(percent_decode("/100%"), "/100%");
        assert_eq!(percent_decode("/plain"), "/plain");
    }
}
