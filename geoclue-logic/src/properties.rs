use std::error::Error as StdError;

use thiserror::Error;

use crate::{
    bus::{BusObject, BusValue, ObjectPath},
    config::GeoClueConfig,
    prelude::*,
};

/// A bus value didn't have the shape a field expected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueError {
    #[error("expected {expected}, got {found}")]
    WrongType {
        expected: &'static str,
        found: &'static str,
    },
    #[error("expected {expected} elements, got {found}")]
    WrongLength { expected: usize, found: usize },
}

/// Failure materializing a [BusRecord], no partial record is ever returned
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("failed to get property {property}")]
    Fetch {
        property: &'static str,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
    #[error("property {property} can't be stored in {field}")]
    Value {
        field: &'static str,
        property: &'static str,
        #[source]
        source: ValueError,
    },
}

/// Conversion out of a [BusValue]
pub trait FromBusValue: Sized {
    fn from_bus_value(value: BusValue) -> Result<Self, ValueError>;
}

fn wrong_type<T>(expected: &'static str, value: &BusValue) -> Result<T, ValueError> {
    Err(ValueError::WrongType {
        expected,
        found: value.kind(),
    })
}

impl FromBusValue for bool {
    fn from_bus_value(value: BusValue) -> Result<Self, ValueError> {
        match value {
            BusValue::Bool(v) => Ok(v),
            other => wrong_type("bool", &other),
        }
    }
}

impl FromBusValue for u64 {
    fn from_bus_value(value: BusValue) -> Result<Self, ValueError> {
        match value {
            BusValue::U64(v) => Ok(v),
            other => wrong_type("u64", &other),
        }
    }
}

impl FromBusValue for i64 {
    fn from_bus_value(value: BusValue) -> Result<Self, ValueError> {
        match value {
            BusValue::I64(v) => Ok(v),
            other => wrong_type("i64", &other),
        }
    }
}

impl FromBusValue for f64 {
    fn from_bus_value(value: BusValue) -> Result<Self, ValueError> {
        match value {
            BusValue::F64(v) => Ok(v),
            other => wrong_type("f64", &other),
        }
    }
}

impl FromBusValue for String {
    fn from_bus_value(value: BusValue) -> Result<Self, ValueError> {
        match value {
            BusValue::Str(v) => Ok(v),
            other => wrong_type("string", &other),
        }
    }
}

impl FromBusValue for ObjectPath {
    fn from_bus_value(value: BusValue) -> Result<Self, ValueError> {
        // Some providers hand paths back as plain strings
        match value {
            BusValue::Path(v) => Ok(v),
            BusValue::Str(v) => Ok(ObjectPath::from(v)),
            other => wrong_type("object path", &other),
        }
    }
}

impl<T: FromBusValue> FromBusValue for Vec<T> {
    fn from_bus_value(value: BusValue) -> Result<Self, ValueError> {
        match value {
            BusValue::Array(items) | BusValue::Struct(items) => {
                items.into_iter().map(T::from_bus_value).collect()
            }
            other => wrong_type("sequence", &other),
        }
    }
}

/// Decode `value` and store it in `slot`, used to build [Field] decoders
pub fn decode_into<T: FromBusValue>(slot: &mut T, value: BusValue) -> Result<(), ValueError> {
    *slot = T::from_bus_value(value)?;
    Ok(())
}

pub type Decoder<T> = fn(&mut T, BusValue) -> Result<(), ValueError>;

/// Maps one field of a record to the remote property it is read from
pub struct Field<T> {
    pub name: &'static str,
    pub property: &'static str,
    pub decode: Decoder<T>,
}

impl<T> Field<T> {
    pub fn new(name: &'static str, property: &'static str, decode: Decoder<T>) -> Self {
        Self {
            name,
            property,
            decode,
        }
    }
}

/// A record that can be read property-by-property off a remote object
pub trait BusRecord: Default {
    fn fields() -> Vec<Field<Self>>;
}

/// Property access on a single remote object
pub struct Properties<'a, O: BusObject> {
    object: &'a O,
    get_member: &'a str,
    set_member: &'a str,
}

impl<'a, O: BusObject> Properties<'a, O> {
    pub fn new(object: &'a O, config: &'a GeoClueConfig) -> Self {
        Self {
            object,
            get_member: &config.properties_get,
            set_member: &config.properties_set,
        }
    }

    pub async fn get(&self, interface: &str, name: &str) -> Result<BusValue> {
        let args = vec![BusValue::from(interface), BusValue::from(name)];
        let reply = self
            .object
            .call(self.get_member, args)
            .await
            .with_context(|| format!("Failed to get {interface}.{name} on {}", self.object.path()))?;
        reply
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Empty reply getting {interface}.{name}"))
    }

    pub async fn set(&self, interface: &str, name: &str, value: BusValue) -> Result {
        let args = vec![BusValue::from(interface), BusValue::from(name), value];
        self.object
            .call(self.set_member, args)
            .await
            .with_context(|| format!("Failed to set {interface}.{name} on {}", self.object.path()))?;
        Ok(())
    }

    /// Read every field of `T` from `interface`, one property get per field.
    /// A single failure discards the whole record.
    pub async fn fetch<T: BusRecord>(&self, interface: &str) -> Result<T, DecodeError> {
        let mut record = T::default();
        for field in T::fields() {
            let value = self
                .get(interface, field.property)
                .await
                .map_err(|why| DecodeError::Fetch {
                    property: field.property,
                    source: why.into(),
                })?;
            (field.decode)(&mut record, value).map_err(|source| DecodeError::Value {
                field: field.name,
                property: field.property,
                source,
            })?;
        }
        Ok(record)
    }
}
