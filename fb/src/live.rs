//! Live objects shared between a state machine and the bridge
//!
//! A [`Live`] handle is the state machine's member object. Applying a worker
//! result overwrites the value inside the handle, so every clone of the handle
//! observes the new state.

use std::any::Any;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::codec;
use crate::domain::Payload;
use crate::error::Result;

/// Opaque transition context handed back to directed capabilities
pub type Context = Arc<dyn Any + Send + Sync>;

/// Wrap a value as a transition context
pub fn context<C: Any + Send + Sync>(value: C) -> Context {
    Arc::new(value)
}

/// Shared, mutable handle to a member object
#[derive(Debug, Default)]
pub struct Live<T>(Arc<RwLock<T>>);

impl<T> Clone for Live<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T> Live<T> {
    pub fn new(value: T) -> Self {
        Self(Arc::new(RwLock::new(value)))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.0.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.0.write()
    }

    /// Whether both handles point at the same object
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<T: Clone> Live<T> {
    /// Snapshot of the current value
    pub fn get(&self) -> T {
        self.0.read().clone()
    }
}

/// Decoded value did not have the target's type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeMismatch {
    pub expected: &'static str,
}

/// Type-erased member object the bridge can snapshot and update in place
pub trait LiveObject: Send + Sync {
    /// Runtime type name of the target
    fn type_name(&self) -> &'static str;

    /// Encode the current value
    fn encode(&self) -> Result<Payload>;

    /// Decode a payload into a value of the target's type
    fn decode_same_type(&self, payload: &Payload) -> Result<Box<dyn Any + Send>>;

    /// Copy a decoded value onto the target in place
    fn copy_from(&self, value: Box<dyn Any + Send>) -> std::result::Result<(), TypeMismatch>;
}

impl<T> LiveObject for Live<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn encode(&self) -> Result<Payload> {
        codec::encode(&*self.0.read())
    }

    fn decode_same_type(&self, payload: &Payload) -> Result<Box<dyn Any + Send>> {
        let value: T = codec::decode(payload)?;
        Ok(Box::new(value))
    }

    fn copy_from(&self, value: Box<dyn Any + Send>) -> std::result::Result<(), TypeMismatch> {
        let value = value.downcast::<T>().map_err(|_| TypeMismatch {
            expected: std::any::type_name::<T>(),
        })?;
        *self.0.write() = *value;
        Ok(())
    }
}

/// Apply an encoded member onto its live target
///
/// Returns whether the target was updated. A decoded value of the wrong type
/// is logged and skipped; decode failures are errors.
pub fn apply_payload(member: &str, target: &dyn LiveObject, payload: &Payload) -> Result<bool> {
    debug!(%member, target = target.type_name(), "apply_payload: called");
    let decoded = target.decode_same_type(payload)?;
    match target.copy_from(decoded) {
        Ok(()) => Ok(true),
        Err(mismatch) => {
            warn!(
                %member,
                expected = mismatch.expected,
                "Deserialized object type doesn't match required type, skipping"
            );
            Ok(false)
        }
    }
}
