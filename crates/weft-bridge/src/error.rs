//! Bridge failure taxonomy
//!
//! Marshalling and dispatch failures are diagnostics, not faults: at the
//! trampoline boundary every error is logged and the script caller sees
//! `null`, so a bad script call can never abort the VM or unwind into
//! native code. Native-facing entry points (`Bridge` methods, the gateway)
//! return these as `Err` instead and leave logging to the caller.

use weft_vm::VmError;

/// Everything that can go wrong between a slot and a native entry point.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BridgeError {
    /// No conversion from the slot content to the expected native type.
    #[error("cannot convert argument `{param}` of `{callable}`: expected {expected}, got {got}")]
    Conversion {
        callable: String,
        param: String,
        expected: String,
        got: String,
    },

    /// Fewer arguments than the callable requires.
    #[error("`{callable}` takes at least {required} argument(s), got {provided}")]
    Arity {
        callable: String,
        provided: usize,
        required: usize,
    },

    /// Null passed for a parameter that does not accept it.
    #[error("argument `{param}` of `{callable}` is not nullable")]
    Nullability { callable: String, param: String },

    /// A generated declaration failed to interpret. The entity stays
    /// undeclared; other declarations proceed.
    #[error("declaration of `{name}` failed: {source}")]
    Declaration {
        name: String,
        #[source]
        source: VmError,
    },

    /// No marshalling rule, or no class handle, for a value being pushed.
    /// The value crosses as null and the call goes on.
    #[error("no script dispatch for type `{type_name}`")]
    DispatchMiss { type_name: String },

    /// A handle-table lookup for something never declared to the VM.
    #[error("{what} is not declared to the VM")]
    NotDeclared { what: String },

    /// A binding was invoked while already executing.
    #[error("`{callable}` is already executing")]
    ReentrantCall { callable: String },

    /// The VM itself reported a failure.
    #[error(transparent)]
    Vm(#[from] VmError),
}

impl BridgeError {
    /// Log at the level the failure warrants. Dispatch misses are
    /// recoverable (the value crossed as null); everything else aborted
    /// the call it happened in.
    pub fn report(&self) {
        match self {
            BridgeError::DispatchMiss { .. } => log::warn!("{self}"),
            _ => log::error!("{self}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BridgeError::Arity {
            callable: "clamp".to_owned(),
            provided: 1,
            required: 2,
        };
        assert_eq!(err.to_string(), "`clamp` takes at least 2 argument(s), got 1");

        let err = BridgeError::Nullability {
            callable: "link".to_owned(),
            param: "other".to_owned(),
        };
        assert!(err.to_string().contains("not nullable"));
    }

    #[test]
    fn test_vm_error_wraps_transparently() {
        let vm_err = VmError::Runtime {
            message: "stack trace".to_owned(),
        };
        let err = BridgeError::from(vm_err.clone());
        assert_eq!(err.to_string(), vm_err.to_string());
    }
}
