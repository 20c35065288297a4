use std::sync::Arc;

use log::{debug, info};

use crate::{
    bus::{BusConnection, BusObject, BusValue, ObjectPath},
    config::GeoClueConfig,
    prelude::*,
    properties::{FromBusValue, Properties},
};

/// A client registered with the provider that location updates are read through
#[derive(Debug, Clone)]
pub struct ClientSession<O: BusObject> {
    object: O,
    desktop_id: String,
}

impl<O: BusObject> ClientSession<O> {
    pub fn object(&self) -> &O {
        &self.object
    }

    pub fn path(&self) -> &ObjectPath {
        self.object.path()
    }

    pub fn desktop_id(&self) -> &str {
        &self.desktop_id
    }
}

/// Keeps a live [ClientSession] around, replacing it whenever the provider drops it.
///
/// Old sessions are never stopped explicitly, the provider cleans up after derelict clients.
pub struct SessionManager<C: BusConnection> {
    conn: Arc<C>,
    config: Arc<GeoClueConfig>,
    current: Option<ClientSession<C::Object>>,
}

impl<C: BusConnection> SessionManager<C> {
    pub fn new(conn: Arc<C>, config: Arc<GeoClueConfig>) -> Self {
        Self {
            conn,
            config,
            current: None,
        }
    }

    pub fn current(&self) -> Option<&ClientSession<C::Object>> {
        self.current.as_ref()
    }

    /// Make sure there's an active session, acquiring a new one if there's none or the current
    /// one is no longer active. Cheap when the session is fine, safe to call on every iteration.
    pub async fn ensure(&mut self) -> Result {
        let active = match &self.current {
            Some(session) => self.is_active(session).await,
            None => false,
        };

        if active {
            Ok(())
        } else {
            self.acquire().await
        }
    }

    async fn is_active(&self, session: &ClientSession<C::Object>) -> bool {
        let props = Properties::new(session.object(), &self.config);
        let res = props
            .get(
                &self.config.client_interface,
                &self.config.client_active_property,
            )
            .await
            .and_then(|v| bool::from_bus_value(v).map_err(Into::into));

        match res {
            Ok(active) => {
                if !active {
                    debug!("Client {} is no longer active", session.path());
                }
                active
            }
            Err(why) => {
                debug!("Failed to check if client is active: {why:?}");
                false
            }
        }
    }

    /// Register a new client with the provider and start it. The current session is only
    /// replaced once every step succeeded.
    pub async fn acquire(&mut self) -> Result {
        let config = &self.config;

        let manager = self.conn.object(&config.service, &config.manager_path);
        let reply = manager
            .call(&config.manager_get_client, vec![])
            .await
            .context("Failed to get client from manager")?;
        let path = reply
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Manager returned no client path"))
            .and_then(|v| ObjectPath::from_bus_value(v).map_err(Into::into))
            .context("Manager returned an invalid client path")?;

        let client = self.conn.object(&config.service, &path);
        let desktop_id = config.desktop_id().to_string();

        Properties::new(&client, config)
            .set(
                &config.client_interface,
                &config.client_desktop_id_property,
                BusValue::from(desktop_id.as_str()),
            )
            .await
            .context("Failed to set client desktop ID")?;

        client
            .call(&config.client_start, vec![])
            .await
            .context("Failed to start client")?;

        info!("Started client {path} as {desktop_id}");

        self.current = Some(ClientSession {
            object: client,
            desktop_id,
        });

        Ok(())
    }
}
