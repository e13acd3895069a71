//! Tokio driver for running the engine against real time.
//!
//! The engine itself is synchronous and deterministic; this module adds the
//! production pump: a task that sleeps until the next timer deadline and
//! forwards transport events from channels into the engine. Tests never use
//! this; they drive the virtual clock directly.

use std::sync::Arc;
use std::time::Duration;

use mooring_core::Response;
use tokio::sync::{mpsc, Mutex};
use tokio::time;
use tracing::debug;

use crate::engine::RegistrarEngine;
use crate::events::SessionEvent;
use crate::session::SessionId;
use crate::transport::{TransportEvent, TxnId};

/// Messages the transport side feeds into the driver.
#[derive(Debug)]
pub enum Inbound {
    Response { txn: TxnId, response: Response },
    Timeout { txn: TxnId },
    Transport { session: SessionId, event: TransportEvent },
}

/// Pumps an engine from an inbound-message channel and its own timers.
///
/// Emitted session events are forwarded to `events_tx`; the loop ends when
/// the inbound channel closes.
pub async fn drive(
    engine: Arc<Mutex<RegistrarEngine>>,
    mut inbound: mpsc::Receiver<Inbound>,
    events_tx: mpsc::Sender<SessionEvent>,
) {
    loop {
        let sleep_for = {
            let mut engine = engine.lock().await;
            engine.run_until_idle();
            for event in engine.drain_events() {
                if events_tx.send(event).await.is_err() {
                    debug!("event receiver dropped; stopping driver");
                    return;
                }
            }
            engine
                .next_deadline()
                .map(|deadline| deadline.saturating_sub(engine.now()))
        };

        let message = match sleep_for {
            Some(wait) if wait > Duration::ZERO => {
                tokio::select! {
                    message = inbound.recv() => message,
                    _ = time::sleep(wait) => continue,
                }
            }
            Some(_) => continue,
            None => inbound.recv().await,
        };

        let Some(message) = message else {
            debug!("inbound channel closed; stopping driver");
            return;
        };

        let mut engine = engine.lock().await;
        match message {
            Inbound::Response { txn, response } => engine.on_response(txn, response),
            Inbound::Timeout { txn } => engine.on_timeout(txn),
            Inbound::Transport { session, event } => engine.on_transport_event(session, event),
        }
    }
}
