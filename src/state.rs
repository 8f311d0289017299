//! The hierarchical connection state machine.
//!
//! This is the single authority over the session lifecycle. The machine is
//! expressed as a pure transition function over tagged-variant states: given
//! the current state, an event token, and a snapshot of the session context,
//! it yields the next state plus an ordered list of [`Effect`]s. Side effects
//! (timers, sockets, event emission) are executed by the session driver, so
//! the whole table unit-tests without touching a socket or a clock.

use std::sync::Arc;

use crate::{
    auth::{ApiError, ConnectionOpen},
    error::SocketModeError,
    recovery,
};

/// Nested sub-state shared by `connecting` and `connected.refreshing-connection`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SetupState {
    /// Awaiting the credential-exchange result.
    Authenticating,
    /// Credential exchange succeeded; a websocket is being opened.
    Authenticated,
    /// The websocket is open; awaiting the server `hello` frame.
    Handshaking,
    /// Setup failed terminally; a `failure` token is in flight.
    Failed,
}

/// Sub-state of `connected`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectedState {
    /// Serving traffic.
    Ready,
    /// Preparing a replacement connection while the primary keeps serving.
    RefreshingConnection(SetupState),
    /// Retiring the superseded primary after a server `refresh_requested`.
    ClosingSocket,
}

/// Top-level connection state. Exactly one leaf is active at any time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting(SetupState),
    Connected(ConnectedState),
    Disconnecting,
    Reconnecting,
}

impl ConnectionState {
    /// Whether the session may carry traffic.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Connected(ConnectedState::Ready))
    }

    /// Derived `connected` flag: a pure projection of the current state.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected(_))
    }

    /// Derived `authenticated` flag: a credential exchange has succeeded and
    /// has not been invalidated by leaving the connection lifecycle.
    pub fn is_authenticated(&self) -> bool {
        matches!(
            self,
            Self::Connected(_)
                | Self::Connecting(SetupState::Authenticated | SetupState::Handshaking)
        )
    }

    /// Name of the top-level state, used for logging and lifecycle events.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting(_) => "connecting",
            Self::Connected(_) => "connected",
            Self::Disconnecting => "disconnecting",
            Self::Reconnecting => "reconnecting",
        }
    }
}

/// Event tokens consumed by the machine.
///
/// External tokens originate from the facade, the transports, and the
/// heartbeat monitor; `Failure`, `SocketRetired`, and `TeardownComplete` are
/// synthetic follow-ups dispatched by the machine itself.
#[derive(Clone, Debug, PartialEq)]
pub enum StateEvent {
    Start,
    WebSocketOpen,
    WebSocketClose,
    ServerHello,
    ServerDisconnectWarning,
    ServerDisconnectOldSocket,
    ServerPingsNotReceived,
    ExplicitDisconnect,
    Failure(Arc<SocketModeError>),
    AuthSuccess(ConnectionOpen),
    AuthFailure(Arc<ApiError>),
    SocketRetired,
    TeardownComplete,
}

/// Side effects requested by a transition, executed in order by the driver.
#[derive(Clone, Debug, PartialEq)]
pub enum Effect {
    EmitConnecting,
    EmitConnected,
    EmitReady,
    EmitDisconnecting,
    EmitReconnecting,
    EmitDisconnected(Option<Arc<SocketModeError>>),
    EmitAuthenticated(ConnectionOpen),
    EmitUnableToStart(Arc<ApiError>),
    /// Invoke the credential-exchange collaborator.
    OpenConnection,
    /// Open a websocket against the given URL (primary, or secondary if a
    /// primary already exists).
    OpenTransport(String),
    /// Detach the superseded transport (promote the secondary if present).
    TeardownTransport,
    /// Gracefully close the serving transport.
    CloseTransport,
    StartHeartbeat,
    CancelHeartbeat,
    ClearBadConnection,
    /// Synthetic follow-up token, processed before any external event.
    Dispatch(StateEvent),
}

/// Snapshot of session context consulted by guards and entry actions.
#[derive(Clone, Copy, Debug)]
pub struct TransitionContext {
    pub auto_reconnect: bool,
    pub bad_connection: bool,
    pub has_transport: bool,
}

/// A fully resolved transition.
#[derive(Clone, Debug, PartialEq)]
pub struct Transition {
    pub next: ConnectionState,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn new(next: ConnectionState, effects: Vec<Effect>) -> Self {
        Self { next, effects }
    }
}

/// The transition table. Returns `None` when the event is not accepted in
/// the current state (stale results, unguarded tokens); ignored events leave
/// the machine untouched.
pub fn transition(
    state: &ConnectionState,
    event: &StateEvent,
    ctx: &TransitionContext,
) -> Option<Transition> {
    use ConnectedState as C;
    use ConnectionState as S;
    use SetupState as Sub;

    match (state, event) {
        (S::Disconnected, StateEvent::Start) => Some(enter_connecting(Vec::new())),

        // A disconnect request while already disconnected resolves cleanly
        // instead of leaving the caller waiting for an event that will never
        // fire.
        (S::Disconnected, StateEvent::ExplicitDisconnect) => Some(Transition::new(
            S::Disconnected,
            vec![Effect::EmitDisconnected(None)],
        )),

        // ---- connecting sub-machine -------------------------------------
        (S::Connecting(Sub::Authenticating), StateEvent::AuthSuccess(open)) => {
            Some(Transition::new(
                S::Connecting(Sub::Authenticated),
                vec![
                    Effect::EmitAuthenticated(open.clone()),
                    Effect::OpenTransport(open.url.clone()),
                ],
            ))
        }
        (S::Connecting(Sub::Authenticating), StateEvent::AuthFailure(error)) => {
            let mut effects = vec![Effect::EmitUnableToStart(Arc::clone(error))];
            if recovery::may_reconnect(error, ctx.auto_reconnect) {
                effects.extend(reconnecting_entry());
                Some(Transition::new(S::Reconnecting, effects))
            } else {
                effects.push(Effect::Dispatch(StateEvent::Failure(Arc::new(
                    SocketModeError::Api((**error).clone()),
                ))));
                Some(Transition::new(S::Connecting(Sub::Failed), effects))
            }
        }
        (S::Connecting(Sub::Authenticated), StateEvent::WebSocketOpen) => {
            Some(Transition::new(S::Connecting(Sub::Handshaking), Vec::new()))
        }
        (S::Connecting(Sub::Handshaking), StateEvent::ServerHello) => {
            let mut effects = vec![Effect::EmitConnected];
            effects.extend(ready_entry(ctx));
            Some(Transition::new(S::Connected(C::Ready), effects))
        }
        (S::Connecting(_), StateEvent::WebSocketClose) => Some(close_fallback(ctx, false)),
        (S::Connecting(_), StateEvent::Failure(error)) => Some(fail(Arc::clone(error), false)),
        (S::Connecting(_), StateEvent::ExplicitDisconnect) => Some(enter_disconnecting(ctx, false)),

        // ---- connected --------------------------------------------------
        (S::Connected(C::Ready), StateEvent::ServerDisconnectWarning) if ctx.auto_reconnect => {
            Some(Transition::new(
                S::Connected(C::RefreshingConnection(Sub::Authenticating)),
                vec![Effect::OpenConnection],
            ))
        }
        (S::Connected(C::Ready), StateEvent::ServerPingsNotReceived) if ctx.auto_reconnect => {
            Some(Transition::new(
                S::Connected(C::RefreshingConnection(Sub::Authenticating)),
                vec![Effect::OpenConnection],
            ))
        }
        (S::Connected(C::Ready), StateEvent::ServerDisconnectOldSocket) => Some(Transition::new(
            S::Connected(C::ClosingSocket),
            vec![
                Effect::CancelHeartbeat,
                Effect::Dispatch(StateEvent::SocketRetired),
            ],
        )),
        (S::Connected(C::ClosingSocket), StateEvent::SocketRetired) => {
            let mut effects = vec![Effect::TeardownTransport];
            effects.extend(ready_entry(ctx));
            Some(Transition::new(S::Connected(C::Ready), effects))
        }
        (
            S::Connected(C::RefreshingConnection(Sub::Authenticating)),
            StateEvent::AuthSuccess(open),
        ) => Some(Transition::new(
            S::Connected(C::RefreshingConnection(Sub::Authenticated)),
            vec![
                Effect::EmitAuthenticated(open.clone()),
                Effect::OpenTransport(open.url.clone()),
            ],
        )),
        (
            S::Connected(C::RefreshingConnection(Sub::Authenticating)),
            StateEvent::AuthFailure(error),
        ) => {
            let mut effects = vec![Effect::EmitUnableToStart(Arc::clone(error))];
            if recovery::may_reconnect(error, ctx.auto_reconnect) {
                // The refresh sub-machine retries in place; the serving
                // primary keeps carrying traffic meanwhile.
                effects.push(Effect::OpenConnection);
                Some(Transition::new(
                    S::Connected(C::RefreshingConnection(Sub::Authenticating)),
                    effects,
                ))
            } else {
                effects.push(Effect::Dispatch(StateEvent::Failure(Arc::new(
                    SocketModeError::Api((**error).clone()),
                ))));
                Some(Transition::new(
                    S::Connected(C::RefreshingConnection(Sub::Failed)),
                    effects,
                ))
            }
        }
        (
            S::Connected(C::RefreshingConnection(Sub::Authenticated)),
            StateEvent::WebSocketOpen,
        ) => Some(Transition::new(
            S::Connected(C::RefreshingConnection(Sub::Handshaking)),
            Vec::new(),
        )),
        (S::Connected(C::RefreshingConnection(_)), StateEvent::ServerHello) => Some(
            Transition::new(S::Connected(C::Ready), ready_entry(ctx)),
        ),
        (S::Connected(_), StateEvent::WebSocketClose) => Some(close_fallback(ctx, true)),
        (S::Connected(_), StateEvent::Failure(error)) => Some(fail(Arc::clone(error), true)),
        (S::Connected(_), StateEvent::ExplicitDisconnect) => Some(enter_disconnecting(ctx, true)),

        // ---- disconnecting / reconnecting -------------------------------
        (S::Disconnecting, StateEvent::WebSocketClose) => Some(Transition::new(
            S::Disconnected,
            vec![Effect::TeardownTransport, Effect::EmitDisconnected(None)],
        )),
        (S::Reconnecting, StateEvent::TeardownComplete) => {
            Some(enter_connecting(vec![Effect::TeardownTransport]))
        }

        _ => None,
    }
}

fn enter_connecting(mut effects: Vec<Effect>) -> Transition {
    effects.push(Effect::EmitConnecting);
    effects.push(Effect::OpenConnection);
    Transition::new(
        ConnectionState::Connecting(SetupState::Authenticating),
        effects,
    )
}

/// Entry effects for `connected.ready`.
///
/// A connection flagged bad got here via a ping-timeout refresh; its stale
/// primary never closed on its own and is retired now, before the heartbeat
/// restarts.
fn ready_entry(ctx: &TransitionContext) -> Vec<Effect> {
    let mut effects = Vec::new();
    if ctx.bad_connection {
        effects.push(Effect::TeardownTransport);
        effects.push(Effect::ClearBadConnection);
    }
    effects.push(Effect::StartHeartbeat);
    effects.push(Effect::EmitReady);
    effects
}

fn reconnecting_entry() -> Vec<Effect> {
    vec![
        Effect::EmitReconnecting,
        Effect::CancelHeartbeat,
        Effect::Dispatch(StateEvent::TeardownComplete),
    ]
}

/// A websocket close outside `disconnecting`. With auto-reconnect the
/// session cycles back through `reconnecting`; without it the session drops
/// straight to `disconnected`, running the transport teardown the skipped
/// `disconnecting` state would have run.
fn close_fallback(ctx: &TransitionContext, from_connected: bool) -> Transition {
    if ctx.auto_reconnect {
        return Transition::new(ConnectionState::Reconnecting, reconnecting_entry());
    }
    let mut effects = Vec::new();
    if from_connected {
        effects.push(Effect::CancelHeartbeat);
    }
    effects.push(Effect::TeardownTransport);
    effects.push(Effect::EmitDisconnected(None));
    Transition::new(ConnectionState::Disconnected, effects)
}

fn fail(error: Arc<SocketModeError>, from_connected: bool) -> Transition {
    let mut effects = Vec::new();
    if from_connected {
        effects.push(Effect::CancelHeartbeat);
    }
    effects.push(Effect::TeardownTransport);
    effects.push(Effect::EmitDisconnected(Some(error)));
    Transition::new(ConnectionState::Disconnected, effects)
}

fn enter_disconnecting(ctx: &TransitionContext, from_connected: bool) -> Transition {
    let mut effects = Vec::new();
    if from_connected {
        effects.push(Effect::CancelHeartbeat);
    }
    effects.push(Effect::EmitDisconnecting);
    if ctx.has_transport {
        effects.push(Effect::CloseTransport);
    } else {
        // No socket will ever deliver the close; synthesize it so the
        // machine still reaches `disconnected`.
        effects.push(Effect::Dispatch(StateEvent::WebSocketClose));
    }
    Transition::new(ConnectionState::Disconnecting, effects)
}
