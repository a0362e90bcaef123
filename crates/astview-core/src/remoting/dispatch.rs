//! Per-endpoint dispatch table.
//!
//! Maps contract ids to local implementations. Filled while a session is
//! being set up and only read once calls flow.

use crate::remoting::contract::{CallArgs, MethodDescriptor, ServiceDispatch};
use crate::remoting::protocol::CallEnvelope;
use crate::{RemotingError, Result};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// A call that passed validation and is ready to run.
pub(crate) struct RoutedCall {
    pub dispatcher: Arc<dyn ServiceDispatch>,
    pub method: &'static MethodDescriptor,
    pub args: CallArgs,
}

#[derive(Default)]
pub(crate) struct DispatchTable {
    entries: RwLock<HashMap<&'static str, Arc<dyn ServiceDispatch>>>,
}

impl std::fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let contracts: Vec<&str> = self
            .entries
            .read()
            .map(|entries| entries.keys().copied().collect())
            .unwrap_or_default();
        f.debug_struct("DispatchTable")
            .field("contracts", &contracts)
            .finish()
    }
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a dispatcher. A contract can only be served once per table.
    pub fn insert(&self, dispatcher: Arc<dyn ServiceDispatch>) -> Result<()> {
        let id = dispatcher.contract().id;
        let mut entries = self
            .entries
            .write()
            .map_err(|_| RemotingError::Other("dispatch table lock poisoned".to_string()))?;

        if entries.contains_key(id) {
            return Err(RemotingError::ContractAlreadyRegistered {
                contract: id.to_string(),
            });
        }
        entries.insert(id, dispatcher);
        Ok(())
    }

    /// Drop every dispatcher. Called when the channel closes so that
    /// implementations holding endpoint handles do not keep it alive.
    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
    }

    /// Resolve an incoming call against the registered contracts.
    ///
    /// A call whose contract, method name or kind does not match a declaration
    /// is a `MethodNotFound`; a wrong argument count is `InvalidArguments`.
    pub fn route(&self, call: CallEnvelope) -> Result<RoutedCall> {
        let not_found = || RemotingError::MethodNotFound {
            contract: call.contract.clone(),
            method: call.method.clone(),
        };

        let dispatcher = self
            .entries
            .read()
            .ok()
            .and_then(|entries| entries.get(call.contract.as_str()).cloned())
            .ok_or_else(not_found)?;

        let method = dispatcher
            .contract()
            .method(&call.method)
            .filter(|m| m.kind == call.kind)
            .ok_or_else(not_found)?;

        if call.args.len() != method.arity {
            return Err(RemotingError::InvalidArguments {
                method: method.name.to_string(),
                message: format!("expected {} arguments, got {}", method.arity, call.args.len()),
            });
        }

        Ok(RoutedCall {
            dispatcher,
            method,
            args: CallArgs::new(method.name, call.args),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remoting::contract::{MethodDescriptor, MethodKind, ServiceContract};
    use serde_json::{json, Value};

    static ECHO: ServiceContract = ServiceContract {
        id: "Echo",
        methods: &[
            MethodDescriptor::request("echo", 1),
            MethodDescriptor::notification("poke", 0),
        ],
    };

    struct EchoDispatch;

    #[async_trait::async_trait]
    impl ServiceDispatch for EchoDispatch {
        fn contract(&self) -> &'static ServiceContract {
            &ECHO
        }

        async fn dispatch(&self, method: &'static str, args: CallArgs) -> Result<Value> {
            match method {
                "echo" => args.get::<Value>(0),
                _ => Ok(Value::Null),
            }
        }
    }

    #[test]
    fn test_duplicate_contract_fails_fast() {
        let table = DispatchTable::new();
        table.insert(Arc::new(EchoDispatch)).unwrap();
        let err = table.insert(Arc::new(EchoDispatch)).unwrap_err();
        assert!(matches!(err, RemotingError::ContractAlreadyRegistered { .. }));
    }

    #[test]
    fn test_route_unknown_contract() {
        let table = DispatchTable::new();
        let call = CallEnvelope::request(1, "Echo", "echo", vec![json!(1)]);
        assert!(matches!(
            table.route(call),
            Err(RemotingError::MethodNotFound { .. })
        ));
    }

    #[test]
    fn test_route_kind_mismatch_is_method_not_found() {
        let table = DispatchTable::new();
        table.insert(Arc::new(EchoDispatch)).unwrap();

        let call = CallEnvelope::notification("Echo", "echo", vec![json!(1)]);
        assert!(matches!(
            table.route(call),
            Err(RemotingError::MethodNotFound { .. })
        ));
    }

    #[test]
    fn test_route_checks_arity() {
        let table = DispatchTable::new();
        table.insert(Arc::new(EchoDispatch)).unwrap();

        let call = CallEnvelope::request(1, "Echo", "echo", vec![]);
        assert!(matches!(
            table.route(call),
            Err(RemotingError::InvalidArguments { .. })
        ));
    }

    #[test]
    fn test_route_success() {
        let table = DispatchTable::new();
        table.insert(Arc::new(EchoDispatch)).unwrap();

        let routed = table
            .route(CallEnvelope::notification("Echo", "poke", vec![]))
            .unwrap();
        assert_eq!(routed.method.kind, MethodKind::Notification);
        assert!(routed.args.is_empty());

        table.clear();
        assert!(matches!(
            table.route(CallEnvelope::notification("Echo", "poke", vec![])),
            Err(RemotingError::MethodNotFound { .. })
        ));
    }
}
