use std::{sync::Arc, time::Duration};

use log::{debug, error, info, warn};
use thiserror::Error;
use tokio::{
    sync::{Mutex, mpsc, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::{
    bus::BusConnection,
    config::GeoClueConfig,
    distributor::{Distributor, Inbox, Subscriber, SubscriberId},
    location::Location,
};

/// Why [GeoClue::wait_for_next] returned without a location
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WaitError {
    /// The caller's cancellation token fired first
    #[error("waiting for a location was cancelled")]
    Cancelled,
    /// The distributor has shut down, no more locations will come
    #[error("location distributor stopped")]
    Stopped,
}

enum LoopState<C: BusConnection> {
    Idle(Distributor<C>),
    Running(JoinHandle<()>),
    Stopped,
}

/// Receives location updates from a GeoClue-style provider and hands them out to any number of
/// waiters.
///
/// All state lives in a [Distributor] running on its own task once [GeoClue::start] is called,
/// this struct only relays requests to it.
pub struct GeoClue<C: BusConnection> {
    state: Mutex<LoopState<C>>,
    subscribe: mpsc::UnboundedSender<Subscriber>,
    unsubscribe: mpsc::UnboundedSender<SubscriberId>,
    latest: watch::Receiver<Option<Location>>,
    quit: CancellationToken,
}

impl<C: BusConnection> GeoClue<C> {
    pub fn new(conn: Arc<C>, config: GeoClueConfig) -> Self {
        let (subscribe, subscribe_rx) = mpsc::unbounded_channel();
        let (unsubscribe, unsubscribe_rx) = mpsc::unbounded_channel();
        let (latest_tx, latest) = watch::channel(None);
        let quit = CancellationToken::new();

        let inbox = Inbox {
            subscribe: subscribe_rx,
            unsubscribe: unsubscribe_rx,
            quit: quit.clone(),
        };
        let distributor = Distributor::new(conn, Arc::new(config), latest_tx, inbox);

        Self {
            state: Mutex::new(LoopState::Idle(distributor)),
            subscribe,
            unsubscribe,
            latest,
            quit,
        }
    }

    /// Spawn the distributor loop, returns right away
    pub async fn start(&self) {
        let mut state = self.state.lock().await;
        match std::mem::replace(&mut *state, LoopState::Stopped) {
            LoopState::Idle(distributor) => {
                info!("Starting up");
                *state = LoopState::Running(tokio::spawn(distributor.run()));
            }
            LoopState::Stopped => {
                warn!("Distributor was stopped, it can't be started again");
            }
            running => {
                warn!("Distributor was already started");
                *state = running;
            }
        }
    }

    /// Stop the distributor loop and wait for it to exit. Every pending
    /// [GeoClue::wait_for_next] returns [WaitError::Stopped].
    pub async fn stop(&self) {
        debug!("Stop requested");
        self.quit.cancel();

        let mut state = self.state.lock().await;
        if let LoopState::Running(handle) = std::mem::replace(&mut *state, LoopState::Stopped) {
            if let Err(why) = handle.await {
                error!("Distributor loop did not exit cleanly: {why:?}");
            }
        }

        info!("Stopped");
    }

    /// The last location received, if any
    pub fn get_latest(&self) -> Option<Location> {
        self.latest.borrow().clone()
    }

    /// Wait for the next location update, or until `cancel` fires.
    ///
    /// The subscription is always cleaned up on the way out, including when cancelled.
    pub async fn wait_for_next(&self, cancel: &CancellationToken) -> Result<Location, WaitError> {
        if self.quit.is_cancelled() {
            return Err(WaitError::Stopped);
        }

        let (sub, recv) = Subscriber::channel();
        let id = sub.id;
        self.subscribe.send(sub).map_err(|_| WaitError::Stopped)?;

        let res = tokio::select! {
            biased;

            _ = cancel.cancelled() => Err(WaitError::Cancelled),

            res = recv => res.map_err(|_| WaitError::Stopped),
        };

        if let Err(why) = &res {
            debug!("Subscriber {id} finished waiting without a location: {why}");
        }

        // Already gone from the set if it got a value, the loop ignores unknown IDs
        self.unsubscribe.send(id).ok();

        res
    }

    /// Same as [GeoClue::wait_for_next] but gives up with [WaitError::Cancelled] after `timeout`
    pub async fn wait_for_next_within(&self, timeout: Duration) -> Result<Location, WaitError> {
        let cancel = CancellationToken::new();
        let wait = self.wait_for_next(&cancel);
        tokio::pin!(wait);

        tokio::select! {
            res = &mut wait => res,
            _ = tokio::time::sleep(timeout) => {
                cancel.cancel();
                wait.await
            }
        }
    }
}

impl<C: BusConnection> Drop for GeoClue<C> {
    fn drop(&mut self) {
        self.quit.cancel();
    }
}
