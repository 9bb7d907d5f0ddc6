// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! `async-imap` implementation of the session seams.
//!
//! Each session is an actor task that owns the `async_imap::Session`. Callers
//! talk to it through a command channel; while no command is pending and a
//! mailbox is selected the actor sits in IDLE and turns `EXISTS` growth into
//! new-mail events.

use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_imap::extensions::idle::IdleResponse;
use async_imap::imap_proto::{MailboxDatum, Response};
use async_imap::types::Fetch;
use async_imap::{Client as AsyncImapClient, Session as AsyncImapSession};
use async_trait::async_trait;
use futures::io::{AsyncRead, AsyncWrite};
use futures::TryStreamExt;
use log::{debug, error, info, warn};
use rustls_pki_types::ServerName as PkiServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tokio_util::compat::TokioAsyncReadCompatExt;

use crate::config::ConnectionConfig;
use crate::error::MailError;
use crate::imap::events::ListenerSet;
use crate::imap::session::{Connector, LabelExtension, MailboxStatus, RawSession, SessionHandle};
use crate::imap::types::{Criteria, LabelOperation, MessageSource, RawMessage, RawPart};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Upper bound for a single command round trip. A stalled socket surfaces as a timeout.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(120);
const COMMAND_QUEUE_DEPTH: usize = 32;
const FETCH_ITEMS: &str = "(UID RFC822.SIZE BODY.PEEK[] BODYSTRUCTURE)";
const LABELS_CAPABILITY: &str = "X-GM-EXT-1";

/// Transport the protocol session runs over, TLS or plain.
pub trait ImapIo: AsyncRead + AsyncWrite + Unpin + Send + Debug {}

impl<T> ImapIo for T where T: AsyncRead + AsyncWrite + Unpin + Send + Debug {}

type ImapStream = Box<dyn ImapIo>;
type UnderlyingImapSession = AsyncImapSession<ImapStream>;

type Reply<T> = oneshot::Sender<Result<T, MailError>>;

enum Command {
    Select { name: String, reply: Reply<MailboxStatus> },
    Search { query: String, reply: Reply<Vec<RawMessage>> },
    SearchUids { query: String, reply: Reply<Vec<u32>> },
    StoreLabels { uid_set: String, query: String, reply: Reply<()> },
    Close { reply: Reply<()> },
    Logout { reply: Reply<()> },
}

// --- Connection ---

/// Establishes TCP connection and, for `imaps`, performs the TLS handshake.
async fn open_stream(config: &ConnectionConfig) -> Result<ImapStream, MailError> {
    debug!("Attempting TCP connection to {}:{}...", config.host, config.port);
    let tcp_stream = timeout(CONNECT_TIMEOUT, TcpStream::connect((config.host.as_str(), config.port))).await??;

    if !config.tls {
        debug!("TCP connected, continuing without TLS");
        return Ok(Box::new(tcp_stream.compat()));
    }

    let server_name = PkiServerName::try_from(config.host.clone())
        .map_err(|_| MailError::Connection(format!("Invalid server name format: {}", config.host)))?;

    let mut root_cert_store = RootCertStore::empty();
    let certs = rustls_native_certs::load_native_certs()?;
    let (added, ignored) = root_cert_store.add_parsable_certificates(certs);
    debug!("Loaded {} native certs, ignored {}.", added, ignored);
    if root_cert_store.is_empty() {
        warn!("Root certificate store is empty after loading native certs.");
    }

    let tls_config = ClientConfig::builder()
        .with_root_certificates(root_cert_store)
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(tls_config));

    debug!("TCP connected. Performing TLS handshake...");
    let tls_stream = timeout(CONNECT_TIMEOUT, connector.connect(server_name, tcp_stream)).await??;
    debug!("TLS handshake successful.");
    Ok(Box::new(tls_stream.compat()))
}

async fn login(stream: ImapStream, config: &ConnectionConfig) -> Result<UnderlyingImapSession, MailError> {
    let client = AsyncImapClient::new(stream);
    debug!("Attempting login for user '{}'...", config.user);

    match timeout(config.auth_timeout, client.login(&config.user, &config.password)).await {
        Ok(Ok(session)) => {
            info!("IMAP login successful for user: {}", config.user);
            Ok(session)
        }
        Ok(Err((e, _client))) => {
            error!("IMAP login failed for user {}: {:?}", config.user, e);
            Err(MailError::Connection(format!("Login failed: {}", e)))
        }
        Err(_) => {
            error!("IMAP login timed out for user {} after {:?}", config.user, config.auth_timeout);
            Err(MailError::Timeout("Login timed out".to_string()))
        }
    }
}

/// Opens sessions against a real server.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImapConnector;

impl ImapConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for ImapConnector {
    async fn connect(&self, config: &ConnectionConfig) -> Result<SessionHandle, MailError> {
        info!("Connecting to {}:{} (tls: {})", config.host, config.port, config.tls);

        let stream = open_stream(config).await?;
        let mut session = login(stream, config).await?;

        let has_labels = match timeout(COMMAND_TIMEOUT, session.capabilities()).await? {
            Ok(capabilities) => capabilities.has_str(LABELS_CAPABILITY),
            Err(e) => {
                warn!("CAPABILITY failed, assuming no label extension: {}", e);
                false
            }
        };
        debug!("Label extension available: {}", has_labels);

        Ok(Arc::new(ImapSession::spawn(session, has_labels, config.debug)))
    }
}

// --- Session handle ---

/// Handle to a running session actor.
pub struct ImapSession {
    commands: mpsc::Sender<Command>,
    events: Arc<ListenerSet>,
    actor: JoinHandle<()>,
    has_labels: bool,
}

impl ImapSession {
    fn spawn(session: UnderlyingImapSession, has_labels: bool, trace: bool) -> Self {
        let (commands, inbox) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let events = Arc::new(ListenerSet::new());
        let actor = SessionActor {
            inbox,
            events: Arc::clone(&events),
            selected: false,
            exists: 0,
            trace,
        };
        let actor = tokio::spawn(actor.run(session));
        Self { commands, events, actor, has_labels }
    }

    async fn request<T: Send>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T, MailError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| MailError::Connection("Session is closed".to_string()))?;
        response
            .await
            .map_err(|_| MailError::Connection("Session was destroyed before replying".to_string()))?
    }
}

#[async_trait]
impl RawSession for ImapSession {
    async fn open_mailbox(&self, name: &str) -> Result<MailboxStatus, MailError> {
        let name = name.to_string();
        self.request(|reply| Command::Select { name, reply }).await
    }

    async fn search(&self, criteria: &Criteria) -> Result<Vec<RawMessage>, MailError> {
        let query = criteria.to_query();
        self.request(|reply| Command::Search { query, reply }).await
    }

    async fn search_uids(&self, criteria: &Criteria) -> Result<Vec<u32>, MailError> {
        let query = criteria.to_query();
        self.request(|reply| Command::SearchUids { query, reply }).await
    }

    fn labels(&self) -> Option<&dyn LabelExtension> {
        if self.has_labels {
            Some(self)
        } else {
            None
        }
    }

    fn events(&self) -> &ListenerSet {
        &self.events
    }

    async fn close_mailbox(&self) -> Result<(), MailError> {
        self.request(|reply| Command::Close { reply }).await
    }

    async fn end(&self) -> Result<(), MailError> {
        self.request(|reply| Command::Logout { reply }).await
    }

    fn destroy(&self) {
        debug!("Aborting IMAP session actor");
        self.actor.abort();
    }
}

#[async_trait]
impl LabelExtension for ImapSession {
    async fn store_labels(
        &self,
        source: &MessageSource,
        operation: LabelOperation,
        labels: &[String],
    ) -> Result<(), MailError> {
        let uid_set = source.to_sequence_set();
        if uid_set.is_empty() {
            return Err(MailError::ProtocolCommand("Empty message source".to_string()));
        }
        let query = format!("{} ({})", operation.store_item(), quote_labels(labels));
        self.request(|reply| Command::StoreLabels { uid_set, query, reply }).await
    }
}

fn quote_labels(labels: &[String]) -> String {
    labels
        .iter()
        .map(|label| format!("\"{}\"", label.replace('\\', "\\\\").replace('"', "\\\"")))
        .collect::<Vec<_>>()
        .join(" ")
}

// --- Actor ---

enum Wake {
    Command(Option<Command>),
    Refresh,
}

struct SessionActor {
    inbox: mpsc::Receiver<Command>,
    events: Arc<ListenerSet>,
    selected: bool,
    exists: u32,
    trace: bool,
}

impl SessionActor {
    async fn run(mut self, mut session: UnderlyingImapSession) {
        loop {
            let command = if self.selected {
                match self.idle_until_command(session).await {
                    Ok((resumed, wake)) => {
                        session = resumed;
                        match wake {
                            Wake::Command(command) => command,
                            Wake::Refresh => continue,
                        }
                    }
                    Err(e) => {
                        error!("IDLE failed, session is unusable: {}", e);
                        self.events.emit_error(&e);
                        return;
                    }
                }
            } else {
                self.inbox.recv().await
            };

            let Some(command) = command else {
                debug!("All session handles dropped, logging out");
                let _ = timeout(COMMAND_TIMEOUT, session.logout()).await;
                return;
            };

            if !self.execute(&mut session, command).await {
                return;
            }
        }
    }

    /// Idles until a command arrives or the server asks for a refresh, then
    /// hands the session back.
    async fn idle_until_command(
        &mut self,
        session: UnderlyingImapSession,
    ) -> Result<(UnderlyingImapSession, Wake), MailError> {
        let mut idle = session.idle();
        idle.init().await?;
        self.trace_command("IDLE");

        let wake = loop {
            let (wait, stop) = idle.wait();
            tokio::select! {
                response = wait => {
                    match response? {
                        IdleResponse::NewData(data) => {
                            observe(data.parsed(), &mut self.exists, &self.events);
                            continue;
                        }
                        IdleResponse::Timeout | IdleResponse::ManualInterrupt => break Wake::Refresh,
                    }
                }
                command = self.inbox.recv() => {
                    drop(stop);
                    break Wake::Command(command);
                }
            }
        };

        let session = idle.done().await?;
        self.trace_command("DONE");
        Ok((session, wake))
    }

    /// Runs one command. Returns `false` once the session must not be used again.
    async fn execute(&mut self, session: &mut UnderlyingImapSession, command: Command) -> bool {
        match command {
            Command::Select { name, reply } => {
                self.trace_command(&format!("SELECT {}", name));
                let result = bounded(session.select(&name)).await.map(|mailbox| {
                    self.selected = true;
                    self.exists = mailbox.exists;
                    MailboxStatus { name: name.clone(), exists: mailbox.exists }
                });
                self.respond(reply, result)
            }
            Command::Search { query, reply } => {
                self.trace_command(&format!("UID SEARCH {}", query));
                let result = bounded(fetch_matching(session, &query)).await;
                self.respond(reply, result)
            }
            Command::SearchUids { query, reply } => {
                self.trace_command(&format!("UID SEARCH {}", query));
                let result = bounded(search_uids(session, &query)).await;
                self.respond(reply, result)
            }
            Command::StoreLabels { uid_set, query, reply } => {
                self.trace_command(&format!("UID STORE {} {}", uid_set, query));
                let result = bounded(store(session, &uid_set, &query)).await;
                self.respond(reply, result)
            }
            Command::Close { reply } => {
                self.trace_command("CLOSE");
                let result = bounded(session.close()).await;
                if result.is_ok() {
                    self.selected = false;
                }
                self.respond(reply, result)
            }
            Command::Logout { reply } => {
                self.trace_command("LOGOUT");
                let result = bounded(session.logout()).await;
                let _ = reply.send(result);
                false
            }
        }
    }

    /// Sends the reply. Transport-level failures are also reported to error
    /// listeners and end the session.
    fn respond<T>(&self, reply: Reply<T>, result: Result<T, MailError>) -> bool {
        let fatal = matches!(result, Err(MailError::Timeout(_)) | Err(MailError::Connection(_)));
        if let (true, Err(e)) = (fatal, &result) {
            self.events.emit_error(e);
        }
        let _ = reply.send(result);
        !fatal
    }

    fn trace_command(&self, command: &str) {
        if self.trace {
            info!("IMAP > {}", command);
        }
    }
}

async fn bounded<T, E>(operation: impl Future<Output = Result<T, E>>) -> Result<T, MailError>
where
    MailError: From<E>,
{
    Ok(timeout(COMMAND_TIMEOUT, operation).await??)
}

fn observe(response: &Response<'_>, exists: &mut u32, events: &ListenerSet) {
    match response {
        Response::MailboxData(MailboxDatum::Exists(count)) => {
            let count = *count;
            if count > *exists {
                let delta = count - *exists;
                debug!("{} new message(s) (exists: {})", delta, count);
                *exists = count;
                events.emit_new_mail(delta);
            } else {
                *exists = count;
            }
        }
        Response::Expunge(_) => {
            *exists = exists.saturating_sub(1);
        }
        other => debug!("Ignoring unsolicited response during IDLE: {:?}", other),
    }
}

async fn search_uids(session: &mut UnderlyingImapSession, query: &str) -> Result<Vec<u32>, MailError> {
    let mut uids: Vec<u32> = session.uid_search(query).await?.into_iter().collect();
    uids.sort_unstable();
    Ok(uids)
}

async fn fetch_matching(session: &mut UnderlyingImapSession, query: &str) -> Result<Vec<RawMessage>, MailError> {
    let uids = search_uids(session, query).await?;
    if uids.is_empty() {
        return Ok(Vec::new());
    }

    let uid_set = uids.iter().map(u32::to_string).collect::<Vec<_>>().join(",");
    let fetches: Vec<Fetch> = session.uid_fetch(&uid_set, FETCH_ITEMS).await?.try_collect().await?;
    debug!("Fetched {} of {} matching message(s)", fetches.len(), uids.len());

    Ok(fetches.iter().filter_map(raw_message).collect())
}

async fn store(session: &mut UnderlyingImapSession, uid_set: &str, query: &str) -> Result<(), MailError> {
    session.uid_store(uid_set, query).await?.try_collect::<Vec<_>>().await?;
    Ok(())
}

fn raw_message(fetch: &Fetch) -> Option<RawMessage> {
    let Some(uid) = fetch.uid else {
        warn!("Skipping FETCH response without UID (seq {})", fetch.message);
        return None;
    };
    let body = fetch.body().map(<[u8]>::to_vec).unwrap_or_default();
    Some(RawMessage {
        uid,
        size: fetch.size.unwrap_or(body.len() as u32),
        parts: vec![RawPart { which: String::new(), body }],
    })
}
