//! Server-side RPC routing: service descriptors, parameter validation, and
//! request execution.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use patchbay_wire::{Message, ResponseCode, RpcRequest, RpcResponse};
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::error::PatchbayError;
use crate::net::Connection;

/// Type tag for one RPC parameter or return value.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ParamKind {
    Bool,
    Integral,
    Numeric,
    String,
    Array,
    Object,
}

impl ParamKind {
    /// Whether `value` matches this tag. `Numeric` accepts integers too.
    pub fn matches(self, value: &Value) -> bool {
        match self {
            ParamKind::Bool => value.is_boolean(),
            ParamKind::Integral => value.is_i64() || value.is_u64(),
            ParamKind::Numeric => value.is_number(),
            ParamKind::String => value.is_string(),
            ParamKind::Array => value.is_array(),
            ParamKind::Object => value.is_object(),
        }
    }
}

/// The user function behind a method. Returns the result value, or `None`
/// when the call could not be served (surfaced as INTERNAL_ERROR).
pub type ServiceCallback = Arc<dyn Fn(&Value) -> Option<Value> + Send + Sync>;

/// Immutable description of one published method: name, typed parameter
/// list, return type, and the callback that serves it.
pub struct ServiceDescriptor {
    method: String,
    params: Vec<(String, ParamKind)>,
    returns: ParamKind,
    callback: ServiceCallback,
}

impl ServiceDescriptor {
    pub fn builder(method: impl Into<String>) -> ServiceDescriptorBuilder {
        ServiceDescriptorBuilder {
            method: method.into(),
            params: Vec::new(),
            returns: ParamKind::Object,
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Every declared parameter must be present and well-typed.
    fn check_params(&self, params: &Value) -> bool {
        for (name, kind) in &self.params {
            match params.get(name) {
                Some(value) if kind.matches(value) => {}
                Some(_) => {
                    warn!(method = %self.method, param = %name, "parameter has wrong type");
                    return false;
                }
                None => {
                    warn!(method = %self.method, param = %name, "parameter is missing");
                    return false;
                }
            }
        }
        true
    }

    /// Runs the callback and type-checks its result.
    fn invoke(&self, params: &Value) -> Result<Value, ResponseCode> {
        let Some(result) = (self.callback)(params) else {
            error!(method = %self.method, "service callback failed");
            return Err(ResponseCode::InternalError);
        };
        if !self.returns.matches(&result) {
            error!(method = %self.method, "service callback returned a badly typed value");
            return Err(ResponseCode::InternalError);
        }
        Ok(result)
    }
}

/// Builds a [`ServiceDescriptor`]; the callback is supplied at [`build`]
/// time so a descriptor can never be published half-initialized.
///
/// [`build`]: ServiceDescriptorBuilder::build
pub struct ServiceDescriptorBuilder {
    method: String,
    params: Vec<(String, ParamKind)>,
    returns: ParamKind,
}

impl ServiceDescriptorBuilder {
    /// Appends one declared parameter; order is preserved.
    pub fn param(mut self, name: impl Into<String>, kind: ParamKind) -> Self {
        self.params.push((name.into(), kind));
        self
    }

    pub fn returns(mut self, kind: ParamKind) -> Self {
        self.returns = kind;
        self
    }

    pub fn build<F>(self, callback: F) -> ServiceDescriptor
    where
        F: Fn(&Value) -> Option<Value> + Send + Sync + 'static,
    {
        ServiceDescriptor {
            method: self.method,
            params: self.params,
            returns: self.returns,
            callback: Arc::new(callback),
        }
    }
}

/// Executes RPC requests against the registered descriptors.
#[derive(Default)]
pub struct Router {
    services: Mutex<HashMap<String, Arc<ServiceDescriptor>>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes a method. Registration is write-once: a duplicate is
    /// rejected and the first descriptor stays in place.
    pub fn register(&self, descriptor: ServiceDescriptor) -> Result<(), PatchbayError> {
        let mut services = self.services.lock().expect("service map lock poisoned");
        if services.contains_key(descriptor.method()) {
            error!(method = descriptor.method(), "method is already registered");
            return Err(PatchbayError::DuplicateMethod {
                method: descriptor.method().to_string(),
            });
        }
        services.insert(descriptor.method().to_string(), Arc::new(descriptor));
        Ok(())
    }

    /// Dispatcher handler for REQ_RPC.
    pub fn on_request(&self, conn: &Arc<Connection>, req: RpcRequest) {
        let method = req.method().unwrap_or_default().to_string();
        let descriptor = self
            .services
            .lock()
            .expect("service map lock poisoned")
            .get(&method)
            .cloned();
        let Some(descriptor) = descriptor else {
            warn!(%method, "request for unknown method");
            respond(conn, &req, ResponseCode::NotFoundService, Value::Null);
            return;
        };

        let params = req.params().cloned().unwrap_or(Value::Null);
        if !descriptor.check_params(&params) {
            respond(conn, &req, ResponseCode::InvalidParams, Value::Null);
            return;
        }

        match descriptor.invoke(&params) {
            Ok(result) => respond(conn, &req, ResponseCode::Ok, result),
            Err(code) => respond(conn, &req, code, Value::Null),
        }
    }
}

fn respond(conn: &Arc<Connection>, req: &RpcRequest, code: ResponseCode, result: Value) {
    let reply: Message = RpcResponse::new(req.id(), code, result).into();
    if let Err(err) = conn.send(reply) {
        debug!(conn = conn.id(), %err, "could not send rpc response");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn add_descriptor() -> ServiceDescriptor {
        ServiceDescriptor::builder("Add")
            .param("num1", ParamKind::Integral)
            .param("num2", ParamKind::Integral)
            .returns(ParamKind::Integral)
            .build(|params| {
                let a = params.get("num1")?.as_i64()?;
                let b = params.get("num2")?.as_i64()?;
                Some(json!(a + b))
            })
    }

    #[test]
    fn param_kinds_match_json_values() {
        assert!(ParamKind::Integral.matches(&json!(7)));
        assert!(!ParamKind::Integral.matches(&json!(7.5)));
        assert!(ParamKind::Numeric.matches(&json!(7)));
        assert!(ParamKind::Numeric.matches(&json!(7.5)));
        assert!(ParamKind::String.matches(&json!("x")));
        assert!(ParamKind::Array.matches(&json!([1])));
        assert!(ParamKind::Object.matches(&json!({})));
        assert!(ParamKind::Bool.matches(&json!(true)));
    }

    #[test]
    fn declared_params_are_enforced() {
        let descriptor = add_descriptor();
        assert!(descriptor.check_params(&json!({ "num1": 1, "num2": 2 })));
        assert!(!descriptor.check_params(&json!({ "num1": "x", "num2": 2 })));
        assert!(!descriptor.check_params(&json!({ "num1": 1 })));
        // Extra fields are not an error.
        assert!(descriptor.check_params(&json!({ "num1": 1, "num2": 2, "extra": true })));
    }

    #[test]
    fn badly_typed_return_is_internal_error() {
        let descriptor = ServiceDescriptor::builder("Broken")
            .returns(ParamKind::Integral)
            .build(|_| Some(json!("not an int")));
        assert_eq!(
            descriptor.invoke(&json!({})).unwrap_err(),
            ResponseCode::InternalError
        );

        let failing = ServiceDescriptor::builder("Failing")
            .returns(ParamKind::Integral)
            .build(|_| None);
        assert_eq!(
            failing.invoke(&json!({})).unwrap_err(),
            ResponseCode::InternalError
        );
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let router = Router::new();
        router.register(add_descriptor()).unwrap();
        let err = router.register(add_descriptor()).unwrap_err();
        assert!(matches!(err, PatchbayError::DuplicateMethod { .. }));
    }
}
