use serde::{Deserialize, Serialize};

use crate::{bus::ObjectPath, prelude::*};

/// Desktop ID registered with the provider when none is configured
pub const DEFAULT_DESKTOP_ID: &str = "geoclue-logic";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
/// Names used to talk to the location provider, defaults point at GeoClue2 on the system bus
pub struct GeoClueConfig {
    /// ID the client session identifies itself with, empty means [DEFAULT_DESKTOP_ID]
    pub desktop_id: String,
    /// Well-known bus name of the provider
    pub service: String,
    /// Path of the manager object that hands out client sessions
    pub manager_path: ObjectPath,
    /// Manager method returning the path of a (new) client session
    pub manager_get_client: String,
    pub client_interface: String,
    /// Client method that begins location updates
    pub client_start: String,
    pub client_active_property: String,
    /// Client property holding the path of the current location object
    pub client_location_property: String,
    pub client_desktop_id_property: String,
    pub location_interface: String,
    /// Full name of the signal emitted by a client when its location changes
    pub location_updated_signal: String,
    pub properties_get: String,
    pub properties_set: String,
}

impl GeoClueConfig {
    /// Parse a config from JSON, any field not given keeps its default
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("Failed to parse GeoClue config")
    }

    pub fn with_desktop_id(mut self, desktop_id: impl Into<String>) -> Self {
        self.desktop_id = desktop_id.into();
        self
    }

    pub fn desktop_id(&self) -> &str {
        if self.desktop_id.is_empty() {
            DEFAULT_DESKTOP_ID
        } else {
            &self.desktop_id
        }
    }
}

impl Default for GeoClueConfig {
    fn default() -> Self {
        Self {
            desktop_id: DEFAULT_DESKTOP_ID.to_string(),
            service: "org.freedesktop.GeoClue2".to_string(),
            manager_path: ObjectPath::new("/org/freedesktop/GeoClue2/Manager"),
            manager_get_client: "org.freedesktop.GeoClue2.Manager.GetClient".to_string(),
            client_interface: "org.freedesktop.GeoClue2.Client".to_string(),
            client_start: "org.freedesktop.GeoClue2.Client.Start".to_string(),
            client_active_property: "Active".to_string(),
            client_location_property: "Location".to_string(),
            client_desktop_id_property: "DesktopId".to_string(),
            location_interface: "org.freedesktop.GeoClue2.Location".to_string(),
            location_updated_signal: "org.freedesktop.GeoClue2.Client.LocationUpdated"
                .to_string(),
            properties_get: "org.freedesktop.DBus.Properties.Get".to_string(),
            properties_set: "org.freedesktop.DBus.Properties.Set".to_string(),
        }
    }
}
