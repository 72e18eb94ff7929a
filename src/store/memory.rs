use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;

use super::{Managed, ObjectStore};
use crate::controller::error::{Error, ErrorClass, Result};

/// Store verbs; reads only take part in fault matching
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Verb {
    Get,
    List,
    Create,
    Update,
    Patch,
    Delete,
    PatchStatus,
}

/// One recorded write
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mutation {
    pub verb: Verb,
    pub kind: String,
    pub name: String,
}

/// An injected failure, matched by verb, kind and optionally name
#[derive(Clone, Debug)]
pub struct Fault {
    pub verb: Verb,
    pub kind: String,
    pub name: Option<String>,
    pub class: ErrorClass,
    /// Number of calls to fail; `None` fails until cleared
    pub times: Option<u32>,
}

impl Fault {
    pub fn new(verb: Verb, kind: &str, class: ErrorClass) -> Self {
        Self {
            verb,
            kind: kind.to_string(),
            name: None,
            class,
            times: None,
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn times(mut self, n: u32) -> Self {
        self.times = Some(n);
        self
    }

    fn matches(&self, verb: Verb, kind: &str, name: &str) -> bool {
        self.verb == verb
            && self.kind == kind
            && self.name.as_deref().is_none_or(|n| n == name)
            && self.times != Some(0)
    }

    fn error(&self, name: &str) -> Error {
        let msg = format!("injected {:?} on {:?} {}/{}", self.class, self.verb, self.kind, name);
        match self.class {
            ErrorClass::NotFound => Error::NotFound(msg),
            ErrorClass::Conflict => Error::ConflictError(msg),
            ErrorClass::Transient => Error::TransientError(msg),
            ErrorClass::ResourceExhausted => Error::ResourceExhausted(msg),
            ErrorClass::Validation => Error::ValidationError(msg),
        }
    }
}

type Key = (String, String, String);

#[derive(Default)]
struct State {
    objects: BTreeMap<Key, Value>,
    mutations: Vec<Mutation>,
    faults: Vec<Fault>,
    next_uid: u64,
}

/// In-memory [`ObjectStore`] for tests
///
/// Objects are held as JSON keyed by (kind, namespace, name). Server-side
/// apply replaces everything but `status` and server-owned metadata.
/// Every successful write is recorded so tests can assert that a converged
/// pass performs none.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panicking test thread must not wedge the remaining assertions
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Seed an object exactly as given (no mutation is recorded)
    pub fn insert<K: Managed>(&self, obj: &K) -> Result<()> {
        let ns = obj.meta().namespace.clone().unwrap_or_default();
        let name = obj.meta().name.clone().ok_or(Error::MissingObjectKey("metadata.name"))?;
        let value = serde_json::to_value(obj)?;
        self.lock().objects.insert(key::<K>(&ns, &name), value);
        Ok(())
    }

    /// Read an object without going through fault injection
    pub fn peek<K: Managed>(&self, ns: &str, name: &str) -> Option<K> {
        let value = self.lock().objects.get(&key::<K>(ns, name)).cloned()?;
        serde_json::from_value(value).ok()
    }

    /// Overwrite the status of a stored object, as a workload controller would
    pub fn set_status<K: Managed>(&self, ns: &str, name: &str, status: Value) -> bool {
        let mut state = self.lock();
        match state.objects.get_mut(&key::<K>(ns, name)) {
            Some(obj) => {
                obj["status"] = status;
                true
            }
            None => false,
        }
    }

    /// Remove an object behind the reconciler's back
    pub fn remove<K: Managed>(&self, ns: &str, name: &str) -> bool {
        self.lock().objects.remove(&key::<K>(ns, name)).is_some()
    }

    /// Names of every stored object of kind `K` in a namespace
    pub fn names<K: Managed>(&self, ns: &str) -> Vec<String> {
        let kind = K::kind(&()).to_string();
        self.lock()
            .objects
            .keys()
            .filter(|(k, n, _)| *k == kind && n == ns)
            .map(|(_, _, name)| name.clone())
            .collect()
    }

    pub fn inject(&self, fault: Fault) {
        self.lock().faults.push(fault);
    }

    pub fn clear_faults(&self) {
        self.lock().faults.clear();
    }

    /// Recorded writes since the last [`MemoryStore::clear_mutations`]
    pub fn mutations(&self) -> Vec<Mutation> {
        self.lock().mutations.clone()
    }

    pub fn clear_mutations(&self) {
        self.lock().mutations.clear();
    }

    fn check_fault(state: &mut State, verb: Verb, kind: &str, name: &str) -> Result<()> {
        if let Some(fault) = state
            .faults
            .iter_mut()
            .find(|f| f.matches(verb, kind, name))
        {
            if let Some(n) = fault.times.as_mut() {
                *n -= 1;
            }
            return Err(fault.error(name));
        }
        Ok(())
    }
}

fn key<K: Managed>(ns: &str, name: &str) -> Key {
    (K::kind(&()).to_string(), ns.to_string(), name.to_string())
}

fn record(state: &mut State, verb: Verb, kind: &str, name: &str) {
    state.mutations.push(Mutation {
        verb,
        kind: kind.to_string(),
        name: name.to_string(),
    });
}

fn labels_match(obj: &Value, selector: &BTreeMap<String, String>) -> bool {
    let labels = &obj["metadata"]["labels"];
    selector
        .iter()
        .all(|(k, v)| labels.get(k).and_then(Value::as_str) == Some(v.as_str()))
}

/// RFC 7386 JSON merge patch
pub(crate) fn merge_patch(target: &mut Value, patch: &Value) {
    match patch {
        Value::Object(fields) => {
            if !target.is_object() {
                *target = Value::Object(Default::default());
            }
            if let Value::Object(map) = target {
                for (k, v) in fields {
                    if v.is_null() {
                        map.remove(k);
                    } else {
                        merge_patch(map.entry(k.clone()).or_insert(Value::Null), v);
                    }
                }
            }
        }
        other => *target = other.clone(),
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get<K: Managed>(&self, ns: &str, name: &str) -> Result<Option<K>> {
        let mut state = self.lock();
        Self::check_fault(&mut state, Verb::Get, &K::kind(&()), name)?;
        match state.objects.get(&key::<K>(ns, name)) {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }

    async fn list<K: Managed>(
        &self,
        ns: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<K>> {
        let mut state = self.lock();
        let kind = K::kind(&()).to_string();
        Self::check_fault(&mut state, Verb::List, &kind, "")?;
        state
            .objects
            .iter()
            .filter(|((k, n, _), v)| *k == kind && n == ns && labels_match(v, labels))
            .map(|(_, v)| serde_json::from_value(v.clone()).map_err(Error::from))
            .collect()
    }

    async fn apply<K: Managed>(&self, ns: &str, obj: &K) -> Result<K> {
        let name = obj.meta().name.clone().ok_or(Error::MissingObjectKey("metadata.name"))?;
        let kind = K::kind(&()).to_string();
        let mut state = self.lock();
        let k = key::<K>(ns, &name);
        let verb = if state.objects.contains_key(&k) {
            Verb::Update
        } else {
            Verb::Create
        };
        Self::check_fault(&mut state, verb, &kind, &name)?;

        let mut value = serde_json::to_value(obj)?;
        value["metadata"]["namespace"] = Value::String(ns.to_string());
        match state.objects.get(&k) {
            Some(existing) => {
                value["metadata"]["uid"] = existing["metadata"]["uid"].clone();
                if let Some(status) = existing.get("status") {
                    value["status"] = status.clone();
                }
            }
            None => {
                state.next_uid += 1;
                value["metadata"]["uid"] = Value::String(format!("uid-{}", state.next_uid));
            }
        }
        state.objects.insert(k, value.clone());
        record(&mut state, verb, &kind, &name);
        Ok(serde_json::from_value(value)?)
    }

    async fn patch<K: Managed>(&self, ns: &str, name: &str, patch: Value) -> Result<K> {
        let kind = K::kind(&()).to_string();
        let mut state = self.lock();
        Self::check_fault(&mut state, Verb::Patch, &kind, name)?;
        let value = match state.objects.get_mut(&key::<K>(ns, name)) {
            Some(obj) => {
                merge_patch(obj, &patch);
                obj.clone()
            }
            None => return Err(Error::NotFound(format!("{}/{}", kind, name))),
        };
        record(&mut state, Verb::Patch, &kind, name);
        Ok(serde_json::from_value(value)?)
    }

    async fn delete<K: Managed>(&self, ns: &str, name: &str) -> Result<()> {
        let kind = K::kind(&()).to_string();
        let mut state = self.lock();
        Self::check_fault(&mut state, Verb::Delete, &kind, name)?;
        if state.objects.remove(&key::<K>(ns, name)).is_some() {
            record(&mut state, Verb::Delete, &kind, name);
        }
        Ok(())
    }

    async fn patch_status<K: Managed>(&self, ns: &str, name: &str, patch: Value) -> Result<K> {
        let kind = K::kind(&()).to_string();
        let mut state = self.lock();
        Self::check_fault(&mut state, Verb::PatchStatus, &kind, name)?;
        let value = match state.objects.get_mut(&key::<K>(ns, name)) {
            Some(obj) => {
                if let Some(status) = patch.get("status") {
                    merge_patch(&mut obj["status"], status);
                }
                obj.clone()
            }
            None => return Err(Error::NotFound(format!("{}/{}", kind, name))),
        };
        record(&mut state, Verb::PatchStatus, &kind, name);
        Ok(serde_json::from_value(value)?)
    }
}
