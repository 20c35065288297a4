use std::{collections::HashMap, sync::Arc};

use log::{debug, info, trace, warn};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    bus::{BusConnection, ObjectPath, Signal},
    config::GeoClueConfig,
    location::Location,
    prelude::*,
    properties::{FromBusValue, Properties},
    session::SessionManager,
};

pub type SubscriberId = Uuid;

/// Caller waiting on the next location update
pub struct Subscriber {
    pub id: SubscriberId,
    pub sender: oneshot::Sender<Location>,
}

impl Subscriber {
    pub fn channel() -> (Self, oneshot::Receiver<Location>) {
        let (sender, recv) = oneshot::channel();
        let sub = Self {
            id: Uuid::new_v4(),
            sender,
        };
        (sub, recv)
    }
}

/// Receiving ends of every channel the distributor is driven by
pub struct Inbox {
    pub subscribe: mpsc::UnboundedReceiver<Subscriber>,
    pub unsubscribe: mpsc::UnboundedReceiver<SubscriberId>,
    pub quit: CancellationToken,
}

enum LoopEvent {
    Subscribe(Subscriber),
    Unsubscribe(SubscriberId),
    Signal(Signal),
    Quit,
}

const SIGNAL_QUEUE_SIZE: usize = 15;

/// Single owner of the session, the latest location and the subscriber set.
///
/// Everything else talks to it through the channels in [Inbox], so none of its state needs
/// locking.
pub struct Distributor<C: BusConnection> {
    conn: Arc<C>,
    config: Arc<GeoClueConfig>,
    session: SessionManager<C>,
    subscribers: HashMap<SubscriberId, oneshot::Sender<Location>>,
    latest: watch::Sender<Option<Location>>,
    inbox: Inbox,
}

impl<C: BusConnection> Distributor<C> {
    pub fn new(
        conn: Arc<C>,
        config: Arc<GeoClueConfig>,
        latest: watch::Sender<Option<Location>>,
        inbox: Inbox,
    ) -> Self {
        Self {
            session: SessionManager::new(conn.clone(), config.clone()),
            conn,
            config,
            subscribers: HashMap::with_capacity(10),
            latest,
            inbox,
        }
    }

    async fn next_event(&mut self, signals: &mut mpsc::Receiver<Signal>) -> LoopEvent {
        let inbox = &mut self.inbox;
        tokio::select! {
            _ = inbox.quit.cancelled() => LoopEvent::Quit,
            Some(sub) = inbox.subscribe.recv() => LoopEvent::Subscribe(sub),
            Some(id) = inbox.unsubscribe.recv() => LoopEvent::Unsubscribe(id),
            Some(signal) = signals.recv() => LoopEvent::Signal(signal),
        }
    }

    /// Main loop, runs until the quit token in the [Inbox] is cancelled.
    pub async fn run(mut self) {
        info!("Starting location distributor");

        let (signal_tx, mut signals) = mpsc::channel(SIGNAL_QUEUE_SIZE);
        self.conn.subscribe_signals(signal_tx);

        loop {
            if self.inbox.quit.is_cancelled() {
                break;
            }

            if let Err(why) = self.session.ensure().await {
                warn!("Failed to ensure GeoClue client: {why:?}");
            }

            let event = self.next_event(&mut signals).await;
            if !self.handle_event(event).await {
                break;
            }
        }

        self.shutdown();
    }

    /// Returns `false` once the loop should exit
    async fn handle_event(&mut self, event: LoopEvent) -> bool {
        match event {
            LoopEvent::Subscribe(sub) => {
                // The waiter may have given up and unsubscribed before we got here
                if sub.sender.is_closed() {
                    trace!("Subscriber {} left before registering", sub.id);
                } else {
                    debug!("New subscriber {}", sub.id);
                    self.subscribers.insert(sub.id, sub.sender);
                }
            }
            LoopEvent::Unsubscribe(id) => {
                if self.subscribers.remove(&id).is_some() {
                    debug!("Subscriber {id} gone");
                }
            }
            LoopEvent::Signal(signal) => self.handle_signal(signal).await,
            LoopEvent::Quit => return false,
        }
        true
    }

    fn shutdown(&mut self) {
        info!(
            "Shutting down location distributor, closing {} subscribers",
            self.subscribers.len()
        );
        // Dropping the senders closes every waiting receiver
        self.subscribers.clear();
        // Same for anyone who subscribed after the quit was picked up
        self.inbox.subscribe.close();
        while self.inbox.subscribe.try_recv().is_ok() {}
    }

    async fn handle_signal(&mut self, signal: Signal) {
        if signal.name != self.config.location_updated_signal {
            trace!("Ignoring signal {} from {}", signal.name, signal.path);
            return;
        }

        debug!("Got location update");

        match self.fetch_location().await {
            Ok(location) => {
                self.latest.send_replace(Some(location.clone()));
                self.broadcast(location);
            }
            Err(why) => {
                warn!("Failed to read updated location: {why:?}");
            }
        }
    }

    /// Read the location the current client points to
    async fn fetch_location(&self) -> Result<Location> {
        let session = self
            .session
            .current()
            .context("No GeoClue client to read location from")?;

        let path = Properties::new(session.object(), &self.config)
            .get(
                &self.config.client_interface,
                &self.config.client_location_property,
            )
            .await
            .context("Failed to get location path")?;
        let path = ObjectPath::from_bus_value(path).context("Location path has wrong type")?;

        let obj = self.conn.object(&self.config.service, &path);
        let location = Properties::new(&obj, &self.config)
            .fetch::<Location>(&self.config.location_interface)
            .await
            .with_context(|| format!("Failed to read location object {path}"))?;

        Ok(location)
    }

    /// Hand `location` to every current subscriber and forget them, each only ever gets one
    /// value. Subscribers that went away are skipped, nobody is waited on.
    fn broadcast(&mut self, location: Location) {
        debug!(
            "Broadcasting location update to {} subscribers",
            self.subscribers.len()
        );

        for (id, sender) in self.subscribers.drain() {
            if sender.send(location.clone()).is_err() {
                trace!("Subscriber {id} left before the update");
            }
        }
    }
}

#[cfg(test)]
impl<C: BusConnection> Distributor<C> {
    /// Handle every queued subscribe, then every queued unsubscribe, and report how many
    /// subscribers are left
    pub(crate) async fn apply_pending(&mut self) -> usize {
        while let Ok(sub) = self.inbox.subscribe.try_recv() {
            self.handle_event(LoopEvent::Subscribe(sub)).await;
        }
        while let Ok(id) = self.inbox.unsubscribe.try_recv() {
            self.handle_event(LoopEvent::Unsubscribe(id)).await;
        }
        self.subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{GeoClueFixture, MockConnection, test_location};
    use std::time::Duration;
    use tokio::{sync::oneshot::error::TryRecvError, time::timeout};

    const BOUND: Duration = Duration::from_secs(5);

    struct Harness {
        distributor: Distributor<MockConnection>,
        latest: watch::Receiver<Option<Location>>,
        _subscribe: mpsc::UnboundedSender<Subscriber>,
        unsubscribe: mpsc::UnboundedSender<SubscriberId>,
    }

    fn harness(fixture: &GeoClueFixture) -> Harness {
        let (latest_tx, latest) = watch::channel(None);
        let (sub_tx, sub_rx) = mpsc::unbounded_channel();
        let (unsub_tx, unsub_rx) = mpsc::unbounded_channel();
        let inbox = Inbox {
            subscribe: sub_rx,
            unsubscribe: unsub_rx,
            quit: CancellationToken::new(),
        };
        let distributor = Distributor::new(
            fixture.conn.clone(),
            fixture.config.clone(),
            latest_tx,
            inbox,
        );
        Harness {
            distributor,
            latest,
            _subscribe: sub_tx,
            unsubscribe: unsub_tx,
        }
    }

    fn subscribe_with_id(
        distributor: &mut Distributor<MockConnection>,
    ) -> (SubscriberId, oneshot::Receiver<Location>) {
        let (sub, recv) = Subscriber::channel();
        let id = sub.id;
        distributor.subscribers.insert(id, sub.sender);
        (id, recv)
    }

    fn subscribe(distributor: &mut Distributor<MockConnection>) -> oneshot::Receiver<Location> {
        subscribe_with_id(distributor).1
    }

    fn location_updated(fixture: &GeoClueFixture) -> Signal {
        Signal::new(
            crate::tests::CLIENT_PATH,
            fixture.config.location_updated_signal.as_str(),
        )
    }

    #[test]
    fn broadcast_reaches_everyone_once() {
        let fixture = GeoClueFixture::new();
        let Harness {
            mut distributor, ..
        } = harness(&fixture);

        let mut recvs = (0..5)
            .map(|_| subscribe(&mut distributor))
            .collect::<Vec<_>>();

        distributor.broadcast(test_location());
        assert!(distributor.subscribers.is_empty());

        // A later update must not reach anyone that already got one
        distributor.broadcast(Location::default());

        for recv in recvs.iter_mut() {
            assert_eq!(recv.try_recv(), Ok(test_location()));
        }
    }

    #[test]
    fn gone_subscriber_does_not_block_others() {
        let fixture = GeoClueFixture::new();
        let Harness {
            mut distributor, ..
        } = harness(&fixture);

        let gone = subscribe(&mut distributor);
        let mut stays = subscribe(&mut distributor);
        drop(gone);

        distributor.broadcast(test_location());

        assert_eq!(stays.try_recv(), Ok(test_location()));
        assert!(distributor.subscribers.is_empty());
    }

    #[test]
    fn subscriber_after_broadcast_waits_for_next() {
        let fixture = GeoClueFixture::new();
        let Harness {
            mut distributor, ..
        } = harness(&fixture);

        distributor.broadcast(test_location());
        let mut late = subscribe(&mut distributor);
        assert!(late.try_recv().is_err());

        let next = Location {
            latitude: 50.0,
            ..test_location()
        };
        distributor.broadcast(next.clone());
        assert_eq!(late.try_recv(), Ok(next));
    }

    #[tokio::test]
    async fn location_signal_updates_latest_and_broadcasts() {
        let fixture = GeoClueFixture::new();
        let Harness {
            mut distributor,
            latest,
            ..
        } = harness(&fixture);
        distributor.session.ensure().await.expect("Failed to ensure");
        let mut recv = subscribe(&mut distributor);

        distributor
            .handle_signal(location_updated(&fixture))
            .await;

        assert_eq!(*latest.borrow(), Some(test_location()));
        assert_eq!(recv.try_recv(), Ok(test_location()));
    }

    #[tokio::test]
    async fn decode_failure_keeps_latest_and_skips_broadcast() {
        let fixture = GeoClueFixture::new();
        let Harness {
            mut distributor,
            latest,
            ..
        } = harness(&fixture);
        distributor.session.ensure().await.expect("Failed to ensure");

        distributor
            .handle_signal(location_updated(&fixture))
            .await;
        assert_eq!(*latest.borrow(), Some(test_location()));

        fixture.set_location(Location {
            latitude: 9.0,
            ..test_location()
        });
        fixture.fail_property("Speed");
        let mut recv = subscribe(&mut distributor);

        distributor
            .handle_signal(location_updated(&fixture))
            .await;

        assert_eq!(*latest.borrow(), Some(test_location()));
        assert!(recv.try_recv().is_err());
        assert_eq!(distributor.subscribers.len(), 1);
    }

    #[tokio::test]
    async fn other_signals_are_ignored() {
        let fixture = GeoClueFixture::new();
        let Harness {
            mut distributor,
            latest,
            ..
        } = harness(&fixture);
        distributor.session.ensure().await.expect("Failed to ensure");
        let location_gets = fixture.location.calls().len();

        distributor
            .handle_signal(Signal::new(
                crate::tests::CLIENT_PATH,
                "org.freedesktop.DBus.Properties.PropertiesChanged",
            ))
            .await;

        assert_eq!(*latest.borrow(), None);
        assert_eq!(fixture.location.calls().len(), location_gets);
    }

    #[tokio::test]
    async fn no_session_skips_update() {
        let fixture = GeoClueFixture::new();
        let Harness {
            mut distributor,
            latest,
            ..
        } = harness(&fixture);
        let mut recv = subscribe(&mut distributor);

        distributor
            .handle_signal(location_updated(&fixture))
            .await;

        assert_eq!(*latest.borrow(), None);
        assert!(recv.try_recv().is_err());
    }

    #[tokio::test]
    async fn shutdown_closes_subscribers() {
        let fixture = GeoClueFixture::new();
        let Harness {
            mut distributor, ..
        } = harness(&fixture);
        let mut recv = subscribe(&mut distributor);

        distributor.shutdown();

        assert_eq!(recv.try_recv(), Err(TryRecvError::Closed));
    }

    #[tokio::test]
    async fn unsubscribe_removes_only_named_id() {
        let fixture = GeoClueFixture::new();
        let Harness {
            mut distributor, ..
        } = harness(&fixture);
        let (id, _recv) = subscribe_with_id(&mut distributor);
        let (other, _other_recv) = subscribe_with_id(&mut distributor);

        assert!(
            distributor
                .handle_event(LoopEvent::Unsubscribe(Uuid::new_v4()))
                .await
        );
        assert_eq!(distributor.subscribers.len(), 2);

        assert!(distributor.handle_event(LoopEvent::Unsubscribe(id)).await);
        assert!(distributor.handle_event(LoopEvent::Unsubscribe(id)).await);
        assert_eq!(distributor.subscribers.len(), 1);
        assert!(distributor.subscribers.contains_key(&other));
    }

    #[tokio::test]
    async fn unsubscribe_overtaking_subscribe_leaves_nothing() {
        let fixture = GeoClueFixture::new();
        let Harness {
            mut distributor, ..
        } = harness(&fixture);

        let (sub, recv) = Subscriber::channel();
        let id = sub.id;
        drop(recv);

        distributor.handle_event(LoopEvent::Unsubscribe(id)).await;
        distributor.handle_event(LoopEvent::Subscribe(sub)).await;

        assert!(distributor.subscribers.is_empty());
    }

    #[tokio::test]
    async fn loop_handles_duplicate_and_unknown_unsubscribes() {
        let fixture = GeoClueFixture::new();
        let Harness {
            mut distributor,
            unsubscribe,
            ..
        } = harness(&fixture);
        let (gone_id, mut gone) = subscribe_with_id(&mut distributor);
        let (last_id, mut last) = subscribe_with_id(&mut distributor);
        let mut stays = subscribe(&mut distributor);
        let quit = distributor.inbox.quit.clone();

        for id in [gone_id, gone_id, Uuid::new_v4(), last_id] {
            unsubscribe.send(id).expect("Unsubscribe channel closed");
        }

        let handle = tokio::spawn(distributor.run());

        // Unsubscribes come out in order, once the last one is handled so are the rest
        let res = timeout(BOUND, &mut last)
            .await
            .expect("Unsubscribe never handled");
        assert!(res.is_err());
        assert_eq!(gone.try_recv(), Err(TryRecvError::Closed));
        assert_eq!(stays.try_recv(), Err(TryRecvError::Empty));

        // Still running and still serving whoever is left
        fixture.conn.emit(location_updated(&fixture)).await;
        let res = timeout(BOUND, &mut stays)
            .await
            .expect("Remaining subscriber never served");
        assert_eq!(res, Ok(test_location()));

        quit.cancel();
        timeout(BOUND, handle)
            .await
            .expect("Loop hung")
            .expect("Loop panicked");
    }

    #[tokio::test]
    async fn quit_skips_session_attempt() {
        let fixture = GeoClueFixture::new();
        fixture.manager.fail_all(true);
        let Harness { distributor, .. } = harness(&fixture);

        distributor.inbox.quit.cancel();
        timeout(BOUND, distributor.run()).await.expect("Loop hung");

        assert_eq!(fixture.manager.count(&fixture.config.manager_get_client), 0);
    }
}
