// Error taxonomy for the servlet container
// Request-time failures, configuration mistakes and lifecycle failures are kept apart

use std::any::Any;
use std::fmt;
use thiserror::Error;

/// Maximum number of cause hops followed when looking for a root cause
const ROOT_CAUSE_MAX_DEPTH: usize = 20;

/// Errors raised while servicing a request (by servlets, filters or the container itself)
#[derive(Debug, Error)]
pub enum ServletError {
    /// Generic service failure, optionally wrapping the error that caused it
    #[error("{message}")]
    Service {
        message: String,
        #[source]
        cause: Option<Box<ServletError>>,
    },

    /// The servlet or filter is unavailable. `seconds == None` means permanently.
    #[error("unavailable: {message}")]
    Unavailable {
        message: String,
        seconds: Option<u64>,
    },

    /// Input/output failure while reading the request or writing the response
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The remote client went away mid-request
    #[error("client aborted the request: {0}")]
    ClientAbort(String),

    /// Error raised by application code, carrying its own type hierarchy
    #[error(transparent)]
    Application(#[from] ApplicationError),
}

impl ServletError {
    /// Create a service error without a cause
    pub fn service(message: impl Into<String>) -> Self {
        ServletError::Service {
            message: message.into(),
            cause: None,
        }
    }

    /// Create a service error wrapping another error
    pub fn wrap(message: impl Into<String>, cause: ServletError) -> Self {
        ServletError::Service {
            message: message.into(),
            cause: Some(Box::new(cause)),
        }
    }

    /// Temporary unavailability for the given number of seconds
    pub fn unavailable_for(message: impl Into<String>, seconds: u64) -> Self {
        ServletError::Unavailable {
            message: message.into(),
            seconds: Some(seconds),
        }
    }

    /// Permanent unavailability
    pub fn permanently_unavailable(message: impl Into<String>) -> Self {
        ServletError::Unavailable {
            message: message.into(),
            seconds: None,
        }
    }

    /// Is this an unavailability signal with no retry window?
    pub fn is_permanent(&self) -> bool {
        matches!(self, ServletError::Unavailable { seconds: None, .. })
    }

    /// Follow the chain of wrapped service errors down to the innermost one
    pub fn root_cause(&self) -> &ServletError {
        let mut current = self;
        for _ in 0..ROOT_CAUSE_MAX_DEPTH {
            match current {
                ServletError::Service {
                    cause: Some(cause), ..
                } => current = cause,
                _ => break,
            }
        }
        current
    }

    /// Is the innermost cause a client abort?
    pub fn is_client_abort(&self) -> bool {
        matches!(self.root_cause(), ServletError::ClientAbort(_))
    }

    /// Type names of this error, most specific first.
    ///
    /// Error pages are resolved by walking this chain; application errors bring their
    /// own chain, container errors use fixed ones.
    pub fn exception_types(&self) -> Vec<&str> {
        match self {
            ServletError::Service { .. } => vec![SERVLET_EXCEPTION, EXCEPTION, THROWABLE],
            ServletError::Unavailable { .. } => {
                vec![UNAVAILABLE_EXCEPTION, SERVLET_EXCEPTION, EXCEPTION, THROWABLE]
            }
            ServletError::Io(_) => vec![IO_EXCEPTION, EXCEPTION, THROWABLE],
            ServletError::ClientAbort(_) => {
                vec![CLIENT_ABORT_EXCEPTION, IO_EXCEPTION, EXCEPTION, THROWABLE]
            }
            ServletError::Application(e) => e.type_chain().iter().map(String::as_str).collect(),
        }
    }

    /// Most specific type name
    pub fn exception_type(&self) -> &str {
        self.exception_types().first().copied().unwrap_or(THROWABLE)
    }

    /// Convert a caught panic payload from application code into a service error
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let detail = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        ServletError::Application(ApplicationError::runtime(PANIC, detail))
    }
}

pub const THROWABLE: &str = "Throwable";
pub const EXCEPTION: &str = "Exception";
pub const SERVLET_EXCEPTION: &str = "ServletException";
pub const UNAVAILABLE_EXCEPTION: &str = "UnavailableException";
pub const IO_EXCEPTION: &str = "IOException";
pub const CLIENT_ABORT_EXCEPTION: &str = "ClientAbortException";
pub const RUNTIME_EXCEPTION: &str = "RuntimeException";
/// Type name given to panics caught in servlets and filters
pub const PANIC: &str = "Panic";

/// An error raised by application code.
///
/// The supertype chain replaces a runtime class hierarchy: it lists type names from the
/// most specific one to the root, e.g. `["IllegalStateException", "RuntimeException",
/// "Exception", "Throwable"]`.
#[derive(Debug, Clone)]
pub struct ApplicationError {
    type_chain: Vec<String>,
    message: String,
    cause: Option<Box<ApplicationError>>,
}

impl ApplicationError {
    /// Create an error whose type is `type_name`, extending `RuntimeException`
    pub fn runtime(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        let type_name = type_name.into();
        let mut chain = vec![type_name];
        if chain[0] != RUNTIME_EXCEPTION {
            chain.push(RUNTIME_EXCEPTION.to_string());
        }
        chain.push(EXCEPTION.to_string());
        chain.push(THROWABLE.to_string());
        Self {
            type_chain: chain,
            message: message.into(),
            cause: None,
        }
    }

    /// Create an error with an explicit supertype chain (most specific first)
    pub fn with_chain<I, S>(chain: I, message: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut type_chain: Vec<String> = chain.into_iter().map(Into::into).collect();
        if type_chain.is_empty() {
            type_chain.push(THROWABLE.to_string());
        }
        Self {
            type_chain,
            message: message.into(),
            cause: None,
        }
    }

    /// Attach a cause
    pub fn caused_by(mut self, cause: ApplicationError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn type_name(&self) -> &str {
        &self.type_chain[0]
    }

    pub fn type_chain(&self) -> &[String] {
        &self.type_chain
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn cause(&self) -> Option<&ApplicationError> {
        self.cause.as_deref()
    }
}

impl fmt::Display for ApplicationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.type_name(), self.message)
    }
}

impl std::error::Error for ApplicationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|c| c as &(dyn std::error::Error + 'static))
    }
}

/// Configuration errors reported synchronously to whoever tried to register something
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ContainerError {
    #[error("illegal argument: {0}")]
    IllegalArgument(String),

    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("invalid URL pattern '{0}'")]
    InvalidUrlPattern(String),

    #[error("servlet '{name}' cannot be mapped to '{pattern}': already mapped to '{existing}'")]
    DuplicateMapping {
        name: String,
        pattern: String,
        existing: String,
    },

    #[error("no servlet named '{0}' is registered")]
    UnknownServlet(String),

    #[error("no filter named '{0}' is registered")]
    UnknownFilter(String),

    #[error("a {kind} named '{name}' already exists")]
    Duplicate { kind: &'static str, name: String },
}

/// Lifecycle failures (init/start/stop/reload/destroy)
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("{component} cannot {operation} while {state}")]
    InvalidState {
        component: String,
        state: String,
        operation: &'static str,
    },

    #[error("context '{0}' was not configured during startup")]
    NotConfigured(String),

    #[error("required extension '{extension}' is not available to context '{context}'")]
    MissingExtension { context: String, extension: String },

    #[error("component '{name}' failed: {message}")]
    Component { name: String, message: String },

    #[error("container initializer '{name}' failed: {source}")]
    Initializer {
        name: String,
        #[source]
        source: ServletError,
    },

    #[error("listener '{name}' failed during context initialization: {source}")]
    Listener {
        name: String,
        #[source]
        source: ServletError,
    },

    #[error("{kind} '{name}' was declared without a class")]
    PreliminaryRegistration { kind: &'static str, name: String },

    #[error(transparent)]
    Container(#[from] ContainerError),

    #[error("startup of context '{path}' failed: {source}")]
    Startup {
        path: String,
        #[source]
        source: Box<LifecycleError>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_cause_unwraps_nested_service_errors() {
        let inner = ServletError::Application(ApplicationError::runtime("IllegalStateException", "boom"));
        let wrapped = ServletError::wrap("outer", ServletError::wrap("middle", inner));

        assert_eq!(wrapped.root_cause().exception_type(), "IllegalStateException");
        assert_eq!(wrapped.exception_type(), SERVLET_EXCEPTION);
    }

    #[test]
    fn test_runtime_chain() {
        let err = ApplicationError::runtime("IllegalStateException", "bad");
        assert_eq!(
            err.type_chain(),
            &["IllegalStateException", "RuntimeException", "Exception", "Throwable"]
        );
        assert_eq!(err.to_string(), "IllegalStateException: bad");
    }

    #[test]
    fn test_unavailable_permanence() {
        assert!(ServletError::permanently_unavailable("gone").is_permanent());
        assert!(!ServletError::unavailable_for("busy", 5).is_permanent());
    }

    #[test]
    fn test_client_abort_detected_through_wrapping() {
        let err = ServletError::wrap("write failed", ServletError::ClientAbort("reset".into()));
        assert!(err.is_client_abort());
        assert_eq!(err.root_cause().exception_types()[1], IO_EXCEPTION);
    }
}
