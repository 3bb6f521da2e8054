use thiserror::Error;

use crate::driver::DriverError;

pub type Result<T, E = MapperError> = std::result::Result<T, E>;

/// Every failure the mapping core can surface. Bootstrap-time kinds are
/// fatal; invocation-time kinds propagate out of the call and leave the
/// session usable unless the driver reports a broken connection.
#[derive(Debug, Error)]
pub enum MapperError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("could not resolve {kind} '{name}' after mapping compilation")]
    IncompleteElement { kind: &'static str, name: String },

    #[error("cyclic <include> chain through sql fragment '{0}'")]
    CyclicInclude(String),

    #[error("cyclic resultMap extends chain through '{0}'")]
    CyclicResultMapExtension(String),

    #[error("unknown parameter option '{option}' in placeholder '{placeholder}'")]
    UnknownParameterOption { option: String, placeholder: String },

    #[error("binding failed for statement '{statement}' on property '{property}': {detail}")]
    Binding {
        statement: String,
        property: String,
        detail: String,
    },

    #[error(
        "execution of statement '{statement}' failed: {source}\nsql: {sql}\nparameters: [{parameters}]"
    )]
    Execution {
        statement: String,
        sql: String,
        parameters: String,
        source: DriverError,
    },

    #[error("could not map column '{column}' of statement '{statement}': {detail}")]
    Mapping {
        statement: String,
        column: String,
        detail: String,
    },

    #[error("malformed property path '{path}': {detail}")]
    MalformedPath { path: String, detail: String },

    #[error("cannot apply index to {kind} value at '{path}'")]
    UnindexableNode { kind: &'static str, path: String },

    #[error("type '{0}' has no nullary constructor")]
    NoDefaultConstructor(String),

    #[error("no constructor of type '{type_name}' accepts {arity} argument(s)")]
    NoMatchingConstructor { type_name: String, arity: usize },

    #[error("type '{type_name}' has no {access} property '{property}'")]
    UnknownProperty {
        type_name: String,
        access: &'static str,
        property: String,
    },

    #[error("ambiguous accessors for property '{property}' on type '{type_name}'")]
    AmbiguousAccessor {
        type_name: String,
        property: String,
    },

    #[error("<foreach> collection expression '{0}' evaluated to null")]
    NullForEachCollection(String),

    #[error("driver error: {0}")]
    Driver(#[from] DriverError),
}

impl MapperError {
    pub fn config(message: impl Into<String>) -> Self {
        MapperError::Config(message.into())
    }

    /// Whether the error invalidates the whole catalog rather than the
    /// single invocation that raised it.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MapperError::Config(_)
                | MapperError::IncompleteElement { .. }
                | MapperError::CyclicInclude(_)
                | MapperError::CyclicResultMapExtension(_)
                | MapperError::UnknownParameterOption { .. }
        )
    }
}
