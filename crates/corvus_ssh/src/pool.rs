//! Multiplexes many short-lived channels over a small number of sessions.

use std::sync::Arc;

use corvus_core::prelude::*;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::Endpoint;

/// One authenticated transport session to a host.
pub trait RemoteSession: Send + Sync + 'static {
    /// Channel for running one remote command.
    type Exec: Send + 'static;
    /// Channel speaking the file transfer subsystem.
    type Sftp: Send + 'static;

    fn open_exec(&self) -> impl Future<Output = Result<Self::Exec, SchedulerError>> + Send;

    fn open_sftp(&self) -> impl Future<Output = Result<Self::Sftp, SchedulerError>> + Send;

    /// Starts forwarding a local port to `host:port` as seen from this session's
    /// host. Returns the bound local port.
    fn forward_local(
        &self,
        host: &str,
        port: u16,
    ) -> impl Future<Output = Result<u16, SchedulerError>> + Send;

    fn cancel_forward(&self, port: u16) -> impl Future<Output = Result<(), SchedulerError>> + Send;

    fn disconnect(&self) -> impl Future<Output = Result<(), SchedulerError>> + Send;
}

/// Creates sessions. `user` is taken from the endpoint the pool was configured
/// with, even when the session itself goes through a tunnel on `127.0.0.1`.
pub trait SessionConnector: Send + Sync + 'static {
    type Session: RemoteSession;

    fn connect(
        &self,
        address: &Endpoint,
        user: &str,
    ) -> impl Future<Output = Result<Self::Session, SchedulerError>> + Send;
}

/// A channel on loan from a [`ChannelPool`]. Hand it back with one of the
/// `release_*` methods or [`ChannelPool::fail_channel`].
#[derive(Debug)]
pub struct ChannelLease<T> {
    /// The session the channel belongs to.
    pub session: usize,
    pub channel: T,
}

struct SessionSlot<S: RemoteSession> {
    session: Arc<S>,
    open_channels: usize,
    idle_sftp: Option<S::Sftp>,
    tunnel_port: Option<u16>,
}

struct PoolState<S: RemoteSession> {
    sessions: Vec<SessionSlot<S>>,
    gateway: Option<Arc<S>>,
    closed: bool,
}

/// Pool of remote sessions, each carrying at most `max_channels` open channels.
///
/// Sessions are created lazily when every existing one is at its cap, optionally
/// through a local port forward on a gateway session, and live until
/// [`ChannelPool::close`]. Each session keeps at most one idle sftp channel around
/// for reuse.
pub struct ChannelPool<C: SessionConnector> {
    adaptor: String,
    connector: C,
    target: Endpoint,
    user: String,
    gateway: Option<(Endpoint, String)>,
    max_channels: usize,
    state: Mutex<PoolState<C::Session>>,
    connecting: Mutex<()>,
}

impl<C: SessionConnector> ChannelPool<C> {
    pub fn new(
        adaptor: impl Into<String>,
        connector: C,
        target: Endpoint,
        user: impl Into<String>,
        max_channels: usize,
    ) -> Self {
        Self {
            adaptor: adaptor.into(),
            connector,
            target,
            user: user.into(),
            gateway: None,
            max_channels: max_channels.max(1),
            state: Mutex::new(PoolState {
                sessions: Vec::new(),
                gateway: None,
                closed: false,
            }),
            connecting: Mutex::new(()),
        }
    }

    /// Reach the target through `gateway`, logging in there as `user`.
    pub fn with_gateway(mut self, gateway: Endpoint, user: impl Into<String>) -> Self {
        self.gateway = Some((gateway, user.into()));
        self
    }

    pub fn adaptor_name(&self) -> &str {
        &self.adaptor
    }

    pub fn target(&self) -> &Endpoint {
        &self.target
    }

    pub fn max_channels(&self) -> usize {
        self.max_channels
    }

    pub async fn session_count(&self) -> usize {
        self.state.lock().await.sessions.len()
    }

    /// Open channels across all sessions, idle sftp channels included.
    pub async fn open_channels(&self) -> usize {
        let state = self.state.lock().await;
        state.sessions.iter().map(|s| s.open_channels).sum()
    }

    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }

    fn closed_error(&self) -> SchedulerError {
        SchedulerError::Closed {
            adaptor: self.adaptor.clone(),
        }
    }

    /// Reserves a slot on a session under its cap, creating a new session when all
    /// are full. Sessions connect one at a time, without holding the pool state.
    async fn reserve(&self) -> Result<(usize, Arc<C::Session>), SchedulerError> {
        if let Some(reserved) = self.reserve_existing().await? {
            return Ok(reserved);
        }

        let _connecting = self.connecting.lock().await;
        // a slot may have freed up, or another caller connected, while we waited
        if let Some(reserved) = self.reserve_existing().await? {
            return Ok(reserved);
        }

        let mut slot = self.create_session().await?;

        let mut state = self.state.lock().await;
        if state.closed {
            drop(state);
            if let Err(e) = slot.session.disconnect().await {
                warn!(error = %e, "Failed to disconnect session opened during close");
            }
            return Err(self.closed_error());
        }

        slot.open_channels = 1;
        let session = slot.session.clone();
        state.sessions.push(slot);
        Ok((state.sessions.len() - 1, session))
    }

    async fn reserve_existing(&self) -> Result<Option<(usize, Arc<C::Session>)>, SchedulerError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(self.closed_error());
        }

        let free = state
            .sessions
            .iter_mut()
            .enumerate()
            .find(|(_, s)| s.open_channels < self.max_channels);
        Ok(free.map(|(index, slot)| {
            slot.open_channels += 1;
            (index, slot.session.clone())
        }))
    }

    async fn unreserve(&self, index: usize) {
        let mut state = self.state.lock().await;
        if let Some(slot) = state.sessions.get_mut(index) {
            slot.open_channels = slot.open_channels.saturating_sub(1);
        }
    }

    async fn create_session(&self) -> Result<SessionSlot<C::Session>, SchedulerError> {
        let Some((gateway, gateway_user)) = &self.gateway else {
            let session = self.connector.connect(&self.target, &self.user).await?;
            info!(remote = %self.target, "Opened new session");
            return Ok(SessionSlot {
                session: Arc::new(session),
                open_channels: 0,
                idle_sftp: None,
                tunnel_port: None,
            });
        };

        let existing = self.state.lock().await.gateway.clone();
        let gateway_session = match existing {
            Some(session) => session,
            None => {
                let session = Arc::new(self.connector.connect(gateway, gateway_user).await?);
                info!(gateway = %gateway, "Opened gateway session");

                let mut state = self.state.lock().await;
                if state.closed {
                    drop(state);
                    if let Err(e) = session.disconnect().await {
                        warn!(error = %e, "Failed to disconnect gateway session");
                    }
                    return Err(self.closed_error());
                }
                state.gateway = Some(session.clone());
                session
            }
        };

        let port = gateway_session
            .forward_local(&self.target.host, self.target.port)
            .await?;
        let local = Endpoint::new("127.0.0.1", port);

        let session = match self.connector.connect(&local, &self.user).await {
            Ok(session) => session,
            Err(e) => {
                if let Err(e) = gateway_session.cancel_forward(port).await {
                    warn!(port, error = %e, "Failed to remove tunnel");
                }
                return Err(e);
            }
        };

        info!(remote = %self.target, via = %gateway, port, "Opened new tunnelled session");
        Ok(SessionSlot {
            session: Arc::new(session),
            open_channels: 0,
            idle_sftp: None,
            tunnel_port: Some(port),
        })
    }

    pub async fn acquire_exec(
        &self,
    ) -> Result<ChannelLease<<C::Session as RemoteSession>::Exec>, SchedulerError> {
        let (index, session) = self.reserve().await?;
        match session.open_exec().await {
            Ok(channel) => Ok(ChannelLease {
                session: index,
                channel,
            }),
            Err(e) => {
                self.unreserve(index).await;
                Err(e)
            }
        }
    }

    /// Hands out a cached sftp channel if any session has one, otherwise opens a
    /// new one.
    pub async fn acquire_sftp(
        &self,
    ) -> Result<ChannelLease<<C::Session as RemoteSession>::Sftp>, SchedulerError> {
        {
            let mut state = self.state.lock().await;
            if state.closed {
                return Err(self.closed_error());
            }
            for (index, slot) in state.sessions.iter_mut().enumerate() {
                if let Some(channel) = slot.idle_sftp.take() {
                    debug!(session = index, "Reusing cached sftp channel");
                    return Ok(ChannelLease {
                        session: index,
                        channel,
                    });
                }
            }
        }

        let (index, session) = self.reserve().await?;
        match session.open_sftp().await {
            Ok(channel) => Ok(ChannelLease {
                session: index,
                channel,
            }),
            Err(e) => {
                self.unreserve(index).await;
                Err(e)
            }
        }
    }

    /// Returns an exec channel. The channel itself is dropped, which closes it.
    pub async fn release_exec<T>(&self, lease: ChannelLease<T>) {
        let ChannelLease { session, channel } = lease;
        drop(channel);
        self.unreserve(session).await;
    }

    /// Returns an sftp channel. It is kept open for reuse if its session has no
    /// idle sftp channel yet.
    pub async fn release_sftp(&self, lease: ChannelLease<<C::Session as RemoteSession>::Sftp>) {
        let mut state = self.state.lock().await;
        let closed = state.closed;
        let Some(slot) = state.sessions.get_mut(lease.session) else {
            return;
        };

        if !closed && slot.idle_sftp.is_none() {
            slot.idle_sftp = Some(lease.channel);
        } else {
            slot.open_channels = slot.open_channels.saturating_sub(1);
        }
    }

    /// Returns a channel that misbehaved. It is never cached.
    pub async fn fail_channel<T>(&self, lease: ChannelLease<T>) {
        debug!(session = lease.session, "Discarding failed channel");
        self.release_exec(lease).await;
    }

    /// Disconnects every session, then removes the tunnels and disconnects the
    /// gateway. Errors are logged and otherwise ignored. Idempotent.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        if state.closed {
            return;
        }
        state.closed = true;

        let sessions = std::mem::take(&mut state.sessions);
        let mut tunnels = Vec::new();

        for slot in sessions {
            drop(slot.idle_sftp);
            if let Err(e) = slot.session.disconnect().await {
                warn!(error = %e, "Failed to disconnect session");
            }
            tunnels.extend(slot.tunnel_port);
        }

        if let Some(gateway) = state.gateway.take() {
            for port in tunnels {
                if let Err(e) = gateway.cancel_forward(port).await {
                    warn!(port, error = %e, "Failed to remove tunnel");
                }
            }
            if let Err(e) = gateway.disconnect().await {
                warn!(error = %e, "Failed to disconnect gateway session");
            }
        }

        info!(remote = %self.target, "Channel pool closed");
    }
}
