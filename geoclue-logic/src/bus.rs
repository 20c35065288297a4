use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::prelude::*;

/// Path of an object exposed on the bus
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectPath(String);

impl ObjectPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ObjectPath {
    fn from(v: &str) -> Self {
        Self::new(v)
    }
}

impl From<String> for ObjectPath {
    fn from(v: String) -> Self {
        Self(v)
    }
}

/// A single value carried in the body of a bus call, reply or signal
#[derive(Debug, Clone, PartialEq)]
pub enum BusValue {
    Bool(bool),
    I64(i64),
    U64(u64),
    F64(f64),
    Str(String),
    Path(ObjectPath),
    /// Homogeneous sequence
    Array(Vec<BusValue>),
    /// Fixed-size tuple of (possibly) mixed values
    Struct(Vec<BusValue>),
}

impl BusValue {
    /// Short name of the value's type, used in decode errors
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::I64(_) => "i64",
            Self::U64(_) => "u64",
            Self::F64(_) => "f64",
            Self::Str(_) => "string",
            Self::Path(_) => "object path",
            Self::Array(_) => "array",
            Self::Struct(_) => "struct",
        }
    }
}

impl From<&str> for BusValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for BusValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<bool> for BusValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f64> for BusValue {
    fn from(v: f64) -> Self {
        Self::F64(v)
    }
}

impl From<u64> for BusValue {
    fn from(v: u64) -> Self {
        Self::U64(v)
    }
}

impl From<ObjectPath> for BusValue {
    fn from(v: ObjectPath) -> Self {
        Self::Path(v)
    }
}

/// An inbound signal delivered by the bus
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    /// Object that emitted the signal
    pub path: ObjectPath,
    /// Fully qualified name, `interface.Member`
    pub name: String,
    pub body: Vec<BusValue>,
}

impl Signal {
    pub fn new(path: impl Into<ObjectPath>, name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
            body: Vec::new(),
        }
    }
}

/// Connection to the message bus the location provider lives on.
pub trait BusConnection: Send + Sync + 'static {
    type Object: BusObject;

    /// Route every inbound signal on this connection into `sink`
    fn subscribe_signals(&self, sink: mpsc::Sender<Signal>);

    /// Get a reference to a remote object, this does not touch the bus
    fn object(&self, destination: &str, path: &ObjectPath) -> Self::Object;
}

/// A remote object that methods can be called on
pub trait BusObject: Clone + Send + Sync + 'static {
    fn path(&self) -> &ObjectPath;

    /// Call `member` (fully qualified, `interface.Member`) with `args`, returning the reply body
    fn call(
        &self,
        member: &str,
        args: Vec<BusValue>,
    ) -> impl Future<Output = Result<Vec<BusValue>>> + Send;
}
