use super::{Channel, Chunk};
use crate::error::{Error, Result};
use async_trait::async_trait;
use russh::client::{self, Handle, Msg};
use russh::{ChannelMsg, Disconnect};
use russh_keys::key;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::{debug, trace, warn};

const DEFAULT_PORT: u16 = 22;

/// How to authenticate to the remote host.
#[derive(Clone)]
pub enum Credential {
    Password(String),
    KeyFile {
        path: PathBuf,
        passphrase: Option<String>,
    },
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Password(_) => f.write_str("Password(..)"),
            Credential::KeyFile { path, .. } => {
                f.debug_struct("KeyFile").field("path", path).finish()
            }
        }
    }
}

/// Accepts any host key; unknown hosts are trusted on first use.
struct AcceptingHandler;

#[async_trait]
impl client::Handler for AcceptingHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        Ok(true)
    }
}

/// An authenticated SSH connection that can open command channels.
pub struct SshConnection {
    handle: Handle<AcceptingHandler>,
    host: String,
    user: String,
}

/// Split `host[:port]`, falling back to port 22.
pub(crate) fn split_host(host: &str) -> (&str, u16) {
    match host.rsplit_once(':') {
        Some((name, port)) => match port.parse() {
            Ok(port) => (name, port),
            Err(_) => (host, DEFAULT_PORT),
        },
        None => (host, DEFAULT_PORT),
    }
}

impl SshConnection {
    /// Connect to `host` (optionally `host:port`) and authenticate as `user`.
    pub async fn connect(host: &str, user: &str, credential: &Credential) -> Result<Self> {
        let connection_error = |reason: String| Error::Connection {
            host: host.to_string(),
            reason,
        };
        let (name, port) = split_host(host);

        let config = Arc::new(client::Config::default());
        let mut handle = client::connect(config, format!("{name}:{port}"), AcceptingHandler)
            .await
            .map_err(|err| connection_error(err.to_string()))?;

        let authenticated = match credential {
            Credential::Password(password) => {
                handle.authenticate_password(user, password.clone()).await
            }
            Credential::KeyFile { path, passphrase } => {
                let key = russh_keys::load_secret_key(path, passphrase.as_deref()).map_err(
                    |err| connection_error(format!("failed to load {}: {err}", path.display())),
                )?;
                handle.authenticate_publickey(user, Arc::new(key)).await
            }
        }
        .map_err(|err| connection_error(err.to_string()))?;

        if !authenticated {
            return Err(connection_error(format!("authentication rejected for {user}")));
        }

        debug!(host, user, "ssh connection established");
        Ok(SshConnection {
            handle,
            host: host.to_string(),
            user: user.to_string(),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    /// Start `command` on the remote host. With `pty` set to `(cols, rows)` a
    /// pseudo-terminal of that size is requested first.
    pub async fn open_channel(&self, command: &str, pty: Option<(u16, u16)>) -> Result<SshChannel> {
        let connection_error = |err: russh::Error| Error::Connection {
            host: self.host.clone(),
            reason: err.to_string(),
        };

        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(connection_error)?;
        if let Some((cols, rows)) = pty {
            channel
                .request_pty(false, "xterm", cols as u32, rows as u32, 0, 0, &[])
                .await
                .map_err(connection_error)?;
        }
        channel.exec(true, command).await.map_err(connection_error)?;
        debug!(host = %self.host, command, "remote command started");

        let (request_tx, request_rx) = unbounded_channel();
        let (event_tx, event_rx) = unbounded_channel();
        tokio::spawn(pump(channel, request_rx, event_tx));

        Ok(SshChannel {
            requests: request_tx,
            events: event_rx,
            exit_status: None,
        })
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
            .map_err(Error::channel)
    }
}

enum Request {
    Write(Vec<u8>),
    Close,
}

enum Event {
    Data(Vec<u8>),
    Exit(i32),
    Failed(String),
}

/// Owns the SSH channel: applies queued writes and forwards output until
/// the remote side closes or a close is requested.
async fn pump(
    mut channel: russh::Channel<Msg>,
    mut requests: UnboundedReceiver<Request>,
    events: UnboundedSender<Event>,
) {
    let mut finished = false;
    loop {
        tokio::select! {
            request = requests.recv() => match request {
                Some(Request::Write(data)) => {
                    if let Err(err) = channel.data(&data[..]).await {
                        let _ = events.send(Event::Failed(err.to_string()));
                        break;
                    }
                }
                Some(Request::Close) | None => {
                    let _ = channel.eof().await;
                    let _ = channel.close().await;
                    break;
                }
            },
            msg = channel.wait() => {
                if !forward(msg, &mut finished, &events) {
                    break;
                }
            }
        }
    }
    trace!("ssh channel pump finished");
}

/// Turn one channel message into events. Returns whether the pump should
/// keep going.
///
/// The channel ending before the command has signalled EOF, an exit status
/// or a close means the connection dropped, which is reported as a failure
/// rather than a clean end of stream.
fn forward(msg: Option<ChannelMsg>, finished: &mut bool, events: &UnboundedSender<Event>) -> bool {
    match msg {
        Some(ChannelMsg::Data { data }) | Some(ChannelMsg::ExtendedData { data, .. }) => {
            events.send(Event::Data(data.to_vec())).is_ok()
        }
        Some(ChannelMsg::Eof) => {
            *finished = true;
            true
        }
        Some(ChannelMsg::ExitStatus { exit_status }) => {
            *finished = true;
            let _ = events.send(Event::Exit(exit_status as i32));
            true
        }
        Some(ChannelMsg::ExitSignal { signal_name, .. }) => {
            *finished = true;
            warn!(signal = ?signal_name, "remote command killed by signal");
            true
        }
        Some(ChannelMsg::Close) => false,
        Some(_) => true,
        None => {
            if !*finished {
                warn!("ssh channel dropped before the command finished");
                let _ = events.send(Event::Failed("connection to remote host lost".to_string()));
            }
            false
        }
    }
}

/// A command running on a remote host.
pub struct SshChannel {
    requests: UnboundedSender<Request>,
    events: UnboundedReceiver<Event>,
    exit_status: Option<i32>,
}

impl Channel for SshChannel {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.requests
            .send(Request::Write(data.to_vec()))
            .map_err(|_| Error::Channel("remote channel is closed".to_string()))
    }

    fn try_read(&mut self) -> Result<Chunk> {
        loop {
            match self.events.try_recv() {
                Ok(Event::Data(data)) => return Ok(Chunk::Data(data)),
                Ok(Event::Exit(status)) => self.exit_status = Some(status),
                Ok(Event::Failed(reason)) => return Err(Error::Channel(reason)),
                Err(TryRecvError::Empty) => return Ok(Chunk::Pending),
                Err(TryRecvError::Disconnected) => return Ok(Chunk::Closed),
            }
        }
    }

    fn exit_status(&mut self) -> Option<i32> {
        self.exit_status
    }

    fn close(&mut self) -> Result<()> {
        // The pump may already be gone if the remote side closed first.
        let _ = self.requests.send(Request::Close);
        Ok(())
    }
}
