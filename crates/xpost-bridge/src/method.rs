//! Function references that can travel inside a payload.
//!
//! A local function cannot cross a window boundary. Instead it is registered here
//! and its [`MethodRef`] is sent; the peer invokes it with an `xpost_method` request.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use xpost_core::{unique_id, XpostError, XpostResult};

/// A callable that receives its arguments verbatim.
pub type MethodFn = Arc<dyn Fn(Vec<Value>) -> XpostResult<Value> + Send + Sync>;

/// Serializable stand-in for a function registered in a [`MethodTable`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodRef {
    #[serde(rename = "__xpost_method__")]
    pub id: String,
    pub name: String,
}

/// Body of an `xpost_method` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodCall {
    pub id: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

#[derive(Default)]
pub struct MethodTable {
    methods: Mutex<HashMap<String, (String, MethodFn)>>,
}

impl MethodTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: &str, method: MethodFn) -> MethodRef {
        let id = unique_id();
        self.methods
            .lock()
            .insert(id.clone(), (name.to_string(), method));
        debug!(id = %id, name = %name, "method registered");
        MethodRef {
            id,
            name: name.to_string(),
        }
    }

    pub fn unregister(&self, id: &str) -> bool {
        self.methods.lock().remove(id).is_some()
    }

    /// Invoke the method registered under `id`.
    pub fn call(&self, id: &str, args: Vec<Value>) -> XpostResult<Value> {
        // Clone out so the method may use the table itself.
        let method = self.methods.lock().get(id).map(|(_, f)| f.clone());
        match method {
            Some(f) => f(args),
            None => Err(XpostError::Validation(format!("unknown method id {id}"))),
        }
    }

    pub fn len(&self) -> usize {
        self.methods.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn registered_method_receives_args_verbatim() {
        let table = MethodTable::new();
        let m = table.register("sum", Arc::new(|args: Vec<Value>| -> XpostResult<Value> {
            Ok(json!(args.iter().filter_map(Value::as_i64).sum::<i64>()))
        }));
        assert_eq!(table.call(&m.id, vec![json!(2), json!(5)]).unwrap(), json!(7));
        assert!(table.unregister(&m.id));
        assert!(table.call(&m.id, vec![]).is_err());
    }

    #[test]
    fn method_ref_serializes_with_marker_key() {
        let m = MethodRef { id: "abc".into(), name: "relay".into() };
        let v = serde_json::to_value(&m).unwrap();
        assert_eq!(v, json!({"__xpost_method__": "abc", "name": "relay"}));
    }
}
