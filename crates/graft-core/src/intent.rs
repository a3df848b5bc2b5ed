//! Intents: addressable requests for component dispatch.
//!
//! An [`Intent`] addresses a component either explicitly (by
//! [`ComponentName`]) or implicitly (by action string), and carries
//! JSON-typed extras. The stub routing protocol stores its bookkeeping in
//! reserved extra keys under the `graft.` prefix; see [`extras`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::{CoreError, CoreResult};
use crate::manifest::ComponentDescriptor;
use crate::package::ComponentName;

/// Reserved extra keys used by the stub routing protocol.
pub mod extras {
    /// Descriptor of the real plugin component a stub intent targets.
    pub const TARGET_DESCRIPTOR: &str = "graft.target.descriptor";
    /// Descriptor of the stub component carrying a rewritten intent.
    pub const STUB_DESCRIPTOR: &str = "graft.stub.descriptor";
    /// The caller's original intent, preserved across the rewrite.
    pub const ORIGIN_INTENT: &str = "graft.origin.intent";
    /// Start/stop discriminator for stub service dispatch.
    pub const SERVICE_OP: &str = "graft.service.op";
    /// Request code of a start-for-result activity launch.
    pub const REQUEST_CODE: &str = "graft.request.code";
}

/// Start/stop discriminator carried by rewritten service intents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceOp {
    /// The stub dispatch should start the target service.
    Start,
    /// The stub dispatch should stop the target service.
    Stop,
}

/// An addressable component request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    component: Option<ComponentName>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    extras: BTreeMap<String, serde_json::Value>,
}

impl Intent {
    /// An empty intent.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// An explicit intent addressing `component`.
    #[must_use]
    pub fn to(component: ComponentName) -> Self {
        Self {
            component: Some(component),
            ..Self::default()
        }
    }

    /// An implicit intent matching components by `action`.
    #[must_use]
    pub fn for_action(action: impl Into<String>) -> Self {
        Self {
            action: Some(action.into()),
            ..Self::default()
        }
    }

    /// The action filter, if any.
    #[must_use]
    pub fn action(&self) -> Option<&str> {
        self.action.as_deref()
    }

    /// The explicit component, if any.
    #[must_use]
    pub fn component(&self) -> Option<&ComponentName> {
        self.component.as_ref()
    }

    /// Whether this intent addresses a component explicitly.
    #[must_use]
    pub fn is_explicit(&self) -> bool {
        self.component.is_some()
    }

    /// Replace the explicit component.
    pub fn set_component(&mut self, component: Option<ComponentName>) {
        self.component = component;
    }

    /// Replace the action filter.
    pub fn set_action(&mut self, action: Option<String>) {
        self.action = action;
    }

    /// Store a raw JSON value under `key`, replacing any previous value.
    pub fn put_value(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.extras.insert(key.into(), value);
    }

    /// Encode and store `value` under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ExtraEncode`] when `value` cannot be encoded as
    /// JSON.
    pub fn put_extra<T: Serialize>(&mut self, key: impl Into<String>, value: &T) -> CoreResult<()> {
        let key = key.into();
        let value = serde_json::to_value(value).map_err(|e| CoreError::ExtraEncode {
            key: key.clone(),
            message: e.to_string(),
        })?;
        self.extras.insert(key, value);
        Ok(())
    }

    /// Decode the extra stored under `key`.
    ///
    /// Returns `None` when the key is absent or the stored value does not
    /// decode as `T` (logged at debug level).
    #[must_use]
    pub fn extra<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.extras.get(key)?;
        match serde_json::from_value(value.clone()) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                debug!(key, error = %e, "Intent extra failed to decode");
                None
            }
        }
    }

    /// Whether an extra is stored under `key`.
    #[must_use]
    pub fn has_extra(&self, key: &str) -> bool {
        self.extras.contains_key(key)
    }

    /// Remove and return the raw extra stored under `key`.
    pub fn remove_extra(&mut self, key: &str) -> Option<serde_json::Value> {
        self.extras.remove(key)
    }

    // Stub protocol helpers. These keys are written by the coordinator's
    // intent rewrite and read back by stub components.

    /// Attach the target component descriptor of a rewritten intent.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ExtraEncode`] when encoding fails.
    pub fn set_target_descriptor(&mut self, descriptor: &ComponentDescriptor) -> CoreResult<()> {
        self.put_extra(extras::TARGET_DESCRIPTOR, descriptor)
    }

    /// The target component descriptor of a rewritten intent, if present.
    #[must_use]
    pub fn target_descriptor(&self) -> Option<ComponentDescriptor> {
        self.extra(extras::TARGET_DESCRIPTOR)
    }

    /// Attach the stub component descriptor of a rewritten intent.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ExtraEncode`] when encoding fails.
    pub fn set_stub_descriptor(&mut self, descriptor: &ComponentDescriptor) -> CoreResult<()> {
        self.put_extra(extras::STUB_DESCRIPTOR, descriptor)
    }

    /// The stub component descriptor of a rewritten intent, if present.
    #[must_use]
    pub fn stub_descriptor(&self) -> Option<ComponentDescriptor> {
        self.extra(extras::STUB_DESCRIPTOR)
    }

    /// Preserve the caller's original intent across a rewrite.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ExtraEncode`] when encoding fails.
    pub fn set_origin_intent(&mut self, origin: &Intent) -> CoreResult<()> {
        self.put_extra(extras::ORIGIN_INTENT, origin)
    }

    /// The preserved original intent, if present.
    #[must_use]
    pub fn origin_intent(&self) -> Option<Intent> {
        self.extra(extras::ORIGIN_INTENT)
    }

    /// Mark a rewritten service intent as a start or stop request.
    pub fn set_service_op(&mut self, op: ServiceOp) {
        // ServiceOp is a unit enum, encoding cannot fail
        let value = serde_json::to_value(op).unwrap_or(serde_json::Value::Null);
        self.extras.insert(extras::SERVICE_OP.to_string(), value);
    }

    /// The start/stop mark of a rewritten service intent, if present.
    #[must_use]
    pub fn service_op(&self) -> Option<ServiceOp> {
        self.extra(extras::SERVICE_OP)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::{ComponentKind, PackageName};

    fn component(name: &str) -> ComponentName {
        ComponentName::new(PackageName::from_static("com.example.notes"), name).unwrap()
    }

    fn descriptor(name: &str, kind: ComponentKind) -> ComponentDescriptor {
        ComponentDescriptor {
            name: component(name),
            kind,
            process: None,
            exported: false,
            actions: Vec::new(),
            authority: None,
        }
    }

    #[test]
    fn explicit_and_implicit_constructors() {
        let explicit = Intent::to(component("NotesActivity"));
        assert!(explicit.is_explicit());
        assert_eq!(explicit.component().unwrap().name(), "NotesActivity");

        let implicit = Intent::for_action("com.example.notes.action.OPEN");
        assert!(!implicit.is_explicit());
        assert_eq!(implicit.action(), Some("com.example.notes.action.OPEN"));
    }

    #[test]
    fn typed_extras_round_trip() {
        let mut intent = Intent::new();
        intent.put_extra("count", &7_u32).unwrap();
        intent.put_extra("label", &"hello").unwrap();
        assert_eq!(intent.extra::<u32>("count"), Some(7));
        assert_eq!(intent.extra::<String>("label").as_deref(), Some("hello"));
        assert_eq!(intent.extra::<u32>("missing"), None);
        // wrong type decodes to None rather than panicking
        assert_eq!(intent.extra::<u32>("label"), None);
    }

    #[test]
    fn stub_protocol_extras() {
        let target = descriptor("SyncService", ComponentKind::Service);
        let stub = descriptor("StubServiceP0S0", ComponentKind::Service);
        let origin = Intent::to(component("SyncService"));

        let mut rewritten = Intent::to(stub.name.clone());
        rewritten.set_target_descriptor(&target).unwrap();
        rewritten.set_stub_descriptor(&stub).unwrap();
        rewritten.set_origin_intent(&origin).unwrap();
        rewritten.set_service_op(ServiceOp::Start);

        assert_eq!(rewritten.target_descriptor().unwrap(), target);
        assert_eq!(rewritten.stub_descriptor().unwrap(), stub);
        assert_eq!(rewritten.origin_intent().unwrap(), origin);
        assert_eq!(rewritten.service_op(), Some(ServiceOp::Start));
    }

    #[test]
    fn intent_serializes_compactly() {
        let intent = Intent::to(component("NotesActivity"));
        let json = serde_json::to_string(&intent).unwrap();
        assert_eq!(json, "{\"component\":\"com.example.notes/NotesActivity\"}");
        let back: Intent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, intent);
    }

    #[test]
    fn remove_extra_clears_mark() {
        let mut intent = Intent::new();
        intent.set_service_op(ServiceOp::Stop);
        assert_eq!(intent.service_op(), Some(ServiceOp::Stop));
        intent.remove_extra(extras::SERVICE_OP);
        assert_eq!(intent.service_op(), None);
    }
}
