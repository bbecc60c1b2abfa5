//! Session driver.
//!
//! Owns all the I/O the sans-IO core refuses to do: the tokio task that
//! pumps commands, wire events, and timer ticks through the [`Router`] and
//! [`Supervisor`], executes their actions, and holds the cross-tab advisory
//! lock for the lifetime of the connection. The lock is released
//! unconditionally on the way out, error paths included.

use std::time::Duration;

use chatwire_core::{
    AdvisoryLock, ClientRole, Environment, QueueEntry, Router, RouterAction, RouterConfig,
    RouterEvent, SinkUpdate, StateStore,
};
use chatwire_proto::{ParticipantId, SessionId};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::{
    env::SystemEnv,
    error::{SessionError, TransportError},
    probe::{HealthProbe, ProbeConfig},
    supervisor::{ConnectionState, Supervisor, SupervisorAction, SupervisorConfig},
    transport::{self, ConnectedTransport},
};

/// How often the driver ticks the state machines.
const TICK_INTERVAL: Duration = Duration::from_millis(500);

/// Poll cadence while another tab holds the connection lock.
const LOCK_POLL: Duration = Duration::from_millis(2_500);

/// Reachability check cadence while the retry budget is exhausted.
const REACHABILITY_POLL: Duration = Duration::from_secs(10);

/// Capacity of the command and sink channels.
const CHANNEL_CAPACITY: usize = 64;

/// Everything needed to run one client session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// WebSocket endpoint of the chat backend.
    pub ws_url: String,
    /// Health/reachability probe settings.
    pub probe: ProbeConfig,
    /// Which side of the conversation this client is.
    pub role: ClientRole,
    /// Our participant id.
    pub identity: ParticipantId,
    /// The conversation session (key scope, queue namespace).
    pub session_id: SessionId,
    /// Stable id of this tab/process for the advisory lock.
    pub tab_id: String,
    /// Router policy knobs.
    pub router: RouterConfig,
    /// Connection policy knobs.
    pub supervisor: SupervisorConfig,
}

/// Handle to a running session.
pub struct SessionHandle {
    /// Feed application intents and UI state changes here.
    pub commands: mpsc::Sender<RouterEvent>,
    /// Updates for the external application state sink.
    pub sink: mpsc::Receiver<SinkUpdate>,
    /// Observe the connection state (owned by the supervisor).
    pub state: watch::Receiver<ConnectionState>,
    task: tokio::task::JoinHandle<()>,
}

impl SessionHandle {
    /// Graceful shutdown: close the command channel and wait for teardown.
    pub async fn shutdown(self) {
        drop(self.commands);
        let _ = self.task.await;
    }
}

/// Spawn the session driver task.
///
/// # Errors
///
/// - `SessionError::Config` when the configuration is unusable.
/// - `SessionError::Storage` when the probe client cannot be built.
pub fn spawn<S: StateStore>(
    config: SessionConfig,
    store: S,
) -> Result<SessionHandle, SessionError> {
    if config.ws_url.is_empty() {
        return Err(SessionError::Config("ws_url must not be empty".to_string()));
    }

    let env = SystemEnv;
    let probe = HealthProbe::new(config.probe.clone())
        .map_err(|e| SessionError::Config(e.to_string()))?;

    let router = Router::new(
        env,
        store.clone(),
        config.role,
        config.identity.clone(),
        config.session_id.clone(),
        config.router.clone(),
    );

    let lock_key = format!("chatwire:lock:{}", config.session_id);
    let lock = AdvisoryLock::new(store, lock_key, config.tab_id.clone());

    let supervisor = Supervisor::new(config.supervisor.clone());

    let (command_tx, command_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (sink_tx, sink_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (state_tx, state_rx) = watch::channel(ConnectionState::Closed);

    let task = tokio::spawn(run_session(
        env,
        config.ws_url,
        router,
        supervisor,
        probe,
        lock,
        command_rx,
        sink_tx,
        state_tx,
    ));

    Ok(SessionHandle { commands: command_tx, sink: sink_rx, state: state_rx, task })
}

/// One resolved step of the main select loop. Resolving into a value first
/// releases the select's borrows before any state is touched.
enum Step {
    Command(Option<RouterEvent>),
    Inbound(Option<chatwire_proto::ClientBound>),
    Tick,
}

#[allow(clippy::too_many_arguments, reason = "driver wiring, called once")]
async fn run_session<S: StateStore>(
    env: SystemEnv,
    ws_url: String,
    mut router: Router<SystemEnv, S>,
    mut supervisor: Supervisor,
    mut probe: HealthProbe,
    lock: AdvisoryLock<S>,
    mut commands: mpsc::Receiver<RouterEvent>,
    sink: mpsc::Sender<SinkUpdate>,
    state_tx: watch::Sender<ConnectionState>,
) {
    let mut transport: Option<ConnectedTransport> = None;

    // Hold the advisory lock before any connection attempt; a tab that
    // finds it held skips connecting and waits for it to free up.
    loop {
        match lock.acquire(env.unix_millis()) {
            Ok(true) => break,
            Ok(false) => {
                debug!("connection lock held by another tab, waiting");
            },
            Err(e) => {
                // A broken shared store must not wedge the client out of
                // connecting entirely; proceed without coordination.
                warn!("advisory lock unavailable, connecting anyway: {e}");
                break;
            },
        }

        tokio::select! {
            command = commands.recv() => match command {
                Some(event) => {
                    route_event(&env, &mut router, &mut transport, &sink, event).await;
                },
                None => return,
            },
            () = env.sleep(LOCK_POLL) => {},
        }
    }

    let mut pending = supervisor.start();
    let mut ticker = tokio::time::interval(TICK_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut last_reachability = env.now();
    let mut shutting_down = false;

    loop {
        execute_supervisor_actions(
            &env,
            &ws_url,
            &mut router,
            &mut supervisor,
            &mut probe,
            &mut transport,
            &sink,
            &state_tx,
            &mut pending,
        )
        .await;

        if shutting_down && supervisor.state() == ConnectionState::Closed {
            break;
        }

        let step = {
            let inbound = async {
                match transport.as_mut() {
                    Some(t) => t.from_server.recv().await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                command = commands.recv() => Step::Command(command),
                event = inbound => Step::Inbound(event),
                _ = ticker.tick() => Step::Tick,
            }
        };

        match step {
            Step::Command(Some(event)) => {
                route_event(&env, &mut router, &mut transport, &sink, event).await;
            },
            Step::Command(None) => {
                shutting_down = true;
                pending.extend(supervisor.shutdown());
            },
            Step::Inbound(Some(event)) => {
                supervisor.on_activity(env.now());
                route_event(&env, &mut router, &mut transport, &sink, RouterEvent::WireReceived(event))
                    .await;
            },
            Step::Inbound(None) => {
                info!("transport closed by peer");
                transport = None;
                route_event(&env, &mut router, &mut transport, &sink, RouterEvent::TransportClosed)
                    .await;
                pending.extend(supervisor.on_transport_closed(env.now(), "peer closed"));
            },
            Step::Tick => {
                pending.extend(supervisor.tick(env.now()));
                route_event(&env, &mut router, &mut transport, &sink, RouterEvent::Tick).await;

                if let Err(e) = lock.refresh(env.unix_millis()) {
                    debug!("advisory lock refresh failed: {e}");
                }

                // While fail-stopped, watch for the network coming back -
                // the one trigger that restarts the retry budget.
                if supervisor.state() == ConnectionState::Error
                    && env.now() - last_reachability >= REACHABILITY_POLL
                {
                    last_reachability = env.now();
                    if probe.is_network_reachable().await {
                        info!("network reachable again, resuming reconnects");
                        pending.extend(supervisor.on_network_restored());
                    }
                }
            },
        }
    }

    // Cleanup path: detach the pumps before the socket drops, release the
    // lock no matter how we got here.
    if let Some(t) = transport.take() {
        t.stop();
    }
    if let Err(e) = lock.release() {
        warn!("advisory lock release failed: {e}");
    }
}

/// Execute queued supervisor actions, feeding results back until none are
/// produced.
#[allow(clippy::too_many_arguments, reason = "driver wiring, called once")]
async fn execute_supervisor_actions<S: StateStore>(
    env: &SystemEnv,
    ws_url: &str,
    router: &mut Router<SystemEnv, S>,
    supervisor: &mut Supervisor,
    probe: &mut HealthProbe,
    transport: &mut Option<ConnectedTransport>,
    sink: &mpsc::Sender<SinkUpdate>,
    state_tx: &watch::Sender<ConnectionState>,
    pending: &mut Vec<SupervisorAction>,
) {
    while !pending.is_empty() {
        for action in std::mem::take(pending) {
            match action {
                SupervisorAction::Probe => {
                    let healthy = match probe.check(env.now()).await {
                        Ok(healthy) => healthy,
                        Err(TransportError::RateLimited { min_interval_ms }) => {
                            debug!("probe rate-limited ({min_interval_ms}ms), treating as unhealthy");
                            false
                        },
                        Err(e) => {
                            warn!("probe failed: {e}");
                            false
                        },
                    };
                    pending.extend(supervisor.on_probe_result(healthy, env.now()));
                },
                SupervisorAction::Dial => match transport::connect(ws_url).await {
                    Ok(connected) => {
                        *transport = Some(connected);
                        pending.extend(supervisor.on_dial_result(true, env.now()));
                    },
                    Err(e) => {
                        warn!("dial failed: {e}");
                        pending.extend(supervisor.on_dial_result(false, env.now()));
                    },
                },
                SupervisorAction::CloseTransport => {
                    if let Some(t) = transport.take() {
                        t.stop();
                    }
                    route_event(env, router, transport, sink, RouterEvent::TransportClosed).await;
                    pending.extend(supervisor.on_transport_closed(env.now(), "closed by supervisor"));
                },
                SupervisorAction::StateChanged(state) => {
                    state_tx.send_replace(state);
                    if state == ConnectionState::Open {
                        route_event(env, router, transport, sink, RouterEvent::TransportOpen).await;
                    }
                },
                SupervisorAction::Terminal { reason } => {
                    error!("connection failed terminally: {reason}");
                },
            }
        }
    }
}

/// Run one router event (plus any follow-ups it spawns) and execute the
/// resulting actions.
async fn route_event<S: StateStore>(
    env: &SystemEnv,
    router: &mut Router<SystemEnv, S>,
    transport: &mut Option<ConnectedTransport>,
    sink: &mpsc::Sender<SinkUpdate>,
    event: RouterEvent,
) {
    let mut events = std::collections::VecDeque::from([event]);

    while let Some(event) = events.pop_front() {
        let actions = match router.handle(event) {
            Ok(actions) => actions,
            Err(e) => {
                warn!("router rejected event: {e}");
                continue;
            },
        };

        for action in actions {
            match action {
                RouterAction::Emit(wire) => {
                    let rejected = match transport.as_ref() {
                        Some(t) => t.to_server.send(wire).await.err().map(|e| e.0),
                        None => Some(wire),
                    };

                    // The transport vanished mid-flush; hand the event back
                    // so the bucket keeps its order.
                    if let Some(wire) = rejected {
                        events.push_back(RouterEvent::EmitRejected {
                            entry: QueueEntry { event: wire, timestamp: env.unix_millis() },
                        });
                    }
                },
                RouterAction::Sink(update) => {
                    if sink.send(update).await.is_err() {
                        debug!("sink receiver dropped, discarding update");
                    }
                },
                RouterAction::Log { message } => debug!("{message}"),
            }
        }
    }
}
