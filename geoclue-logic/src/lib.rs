mod bus;
mod config;
mod distributor;
mod geoclue;
mod location;
mod properties;
mod session;

pub use bus::{BusConnection, BusObject, BusValue, ObjectPath, Signal};
pub use config::{DEFAULT_DESKTOP_ID, GeoClueConfig};
pub use distributor::{Distributor, Inbox, Subscriber, SubscriberId};
pub use geoclue::{GeoClue, WaitError};
pub use location::{Location, Timestamp, UNKNOWN, UNKNOWN_ALTITUDE};
pub use properties::{
    BusRecord, DecodeError, Decoder, Field, FromBusValue, Properties, ValueError, decode_into,
};
pub use session::{ClientSession, SessionManager};

pub mod prelude {
    use anyhow::Error as AnyhowError;
    use std::result::Result as StdResult;
    pub type Result<T = (), E = AnyhowError> = StdResult<T, E>;
    pub use anyhow::{Context, anyhow};
}
