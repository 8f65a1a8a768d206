//! Service command implementation.
//!
//! Opens a duplex session on a REST service and bridges it to stdio as JSON
//! lines, so any program can implement or drive the service:
//!
//! ```text
//!   stdin ──── reply / notify / solicit ────►┌─────────┐
//!                                            │ Duplex  │◄────► node
//!   stdout ◄── consume / request / response ─│ Session │
//!                                            └─────────┘
//! ```
//!
//! Replies are matched to parked requests by `id`. The command ends when the
//! node closes the session, or once stdin is exhausted and every solicit has
//! been answered.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use sparkl_duplex::envelope::{ID, NOTIFY, REPLY, SOLICIT};
use sparkl_duplex::{
    Connector, DuplexSession, Endpoint, Hooks, ProtocolErrorPolicy, Registry, Reply, SessionConfig,
    SessionError,
};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::cli::ServiceArgs;
use crate::error::CliError;
use crate::output::write_json_line;
use crate::state::ConnectionRecord;

/// Service command executor.
///
/// Works on a connection already read from the state store and does no
/// file access of its own.
pub struct ServiceCommand {
    record: ConnectionRecord,
    alias: String,
}

impl ServiceCommand {
    /// Create a new service command for the connection stored as `alias`.
    #[must_use]
    pub fn new(record: ConnectionRecord, alias: impl Into<String>) -> Self {
        Self {
            record,
            alias: alias.into(),
        }
    }

    /// Run the service until the session ends.
    ///
    /// `input` supplies JSON terms one per line; inbound messages and
    /// solicit responses are written to `writer` one per line.
    ///
    /// # Errors
    ///
    /// Returns an error if the session cannot be opened or stdio fails.
    pub async fn execute<R, W>(
        &self,
        connector: &dyn Connector,
        input: R,
        writer: &mut W,
        args: &ServiceArgs,
    ) -> Result<(), CliError>
    where
        R: AsyncBufRead + Unpin,
        W: Write,
    {
        let record = &self.record;
        let mut endpoint = Endpoint::new(&record.url, &args.service).with_folder(record.folder());
        if let Some(cookie) = record.cookie_header() {
            endpoint = endpoint.with_cookie(cookie);
        }

        let config = SessionConfig {
            prefix: args.prefix.clone(),
            connect_timeout: Duration::from_secs(args.connect_timeout),
            protocol_errors: if args.skip_errors {
                ProtocolErrorPolicy::Skip
            } else {
                ProtocolErrorPolicy::Terminate
            },
        };

        let (lines, mut inbound) = mpsc::unbounded_channel();
        let parked = Parked::default();
        let hooks = {
            let parked = parked.clone();
            let requests = args.requests.clone();
            let consumes = args.consumes.clone();
            Hooks::new()
                .on_open(move |session| {
                    install(session.registry(), &requests, &consumes, &lines, &parked);
                })
                .on_close(|session| debug!(url = %session.url(), "service session ended"))
        };

        let session = DuplexSession::open(connector, &endpoint, config, hooks)
            .await
            .map_err(CliError::from_open)?;
        info!(alias = %self.alias, url = %session.url(), "service open");

        let bridge = Bridge {
            session: session.clone(),
            parked,
        };
        let result = bridge.run(input, writer, &mut inbound).await;
        session.close();
        result
    }
}

/// Register stdout-forwarding implementations for the given paths.
fn install(
    registry: &Registry,
    requests: &[String],
    consumes: &[String],
    lines: &mpsc::UnboundedSender<Value>,
    parked: &Parked,
) {
    for path in requests {
        let lines = lines.clone();
        let parked = parked.clone();
        registry.on_request(path.clone(), move |message, reply| {
            parked.park(reply);
            let _ = lines.send(message);
        });
    }

    for path in consumes {
        let lines = lines.clone();
        registry.on_consume(path.clone(), move |message| {
            let _ = lines.send(message);
        });
    }
}

/// Replies waiting for a `reply` term, by event id.
#[derive(Clone, Default)]
struct Parked(Arc<Mutex<HashMap<String, Reply>>>);

impl Parked {
    fn park(&self, reply: Reply) {
        let id = reply.id().to_owned();
        if self.0.lock().insert(id.clone(), reply).is_some() {
            warn!(id = %id, "request id reused, earlier reply dropped");
        }
    }

    fn take(&self, id: &str) -> Option<Reply> {
        self.0.lock().remove(id)
    }
}

/// One stdin line.
#[derive(Debug, Clone, PartialEq)]
enum Term {
    Reply { id: String, term: Value },
    Notify(Value),
    Solicit(Value),
}

/// Parse a stdin line; `None` for a blank line.
fn parse_term(line: &str) -> Result<Option<Term>, String> {
    if line.trim().is_empty() {
        return Ok(None);
    }

    let term: Value = serde_json::from_str(line).map_err(|e| format!("cannot read JSON term: {e}"))?;
    let Some(object) = term.as_object() else {
        return Err("term must be a JSON object".into());
    };

    if object.contains_key(REPLY) {
        let id = object
            .get(ID)
            .and_then(Value::as_str)
            .ok_or("reply term has no id")?
            .to_owned();
        Ok(Some(Term::Reply { id, term }))
    } else if object.contains_key(NOTIFY) {
        Ok(Some(Term::Notify(term)))
    } else if object.contains_key(SOLICIT) {
        Ok(Some(Term::Solicit(term)))
    } else {
        Err(format!("term has no {REPLY}, {NOTIFY} or {SOLICIT}"))
    }
}

struct Bridge {
    session: DuplexSession,
    parked: Parked,
}

impl Bridge {
    async fn run<R, W>(
        &self,
        input: R,
        writer: &mut W,
        inbound: &mut mpsc::UnboundedReceiver<Value>,
    ) -> Result<(), CliError>
    where
        R: AsyncBufRead + Unpin,
        W: Write,
    {
        let mut terms = input.lines();
        let mut reading = true;
        let mut interrupted = false;
        let mut solicits = JoinSet::new();

        let interrupt = tokio::signal::ctrl_c();
        tokio::pin!(interrupt);

        loop {
            tokio::select! {
                Some(message) = inbound.recv() => write_json_line(writer, &message)?,

                line = terms.next_line(), if reading => match line? {
                    Some(line) => self.term(&line, &mut solicits).await,
                    None => {
                        debug!(outstanding = solicits.len(), "input finished");
                        reading = false;
                    }
                },

                Some(done) = solicits.join_next(), if !solicits.is_empty() => match done {
                    Ok(Ok(response)) => write_json_line(writer, &response)?,
                    Ok(Err(e)) => eprintln!("Solicit failed: {e}"),
                    Err(e) => warn!(error = %e, "solicit task ended abnormally"),
                },

                () = self.session.closed() => break,

                _ = &mut interrupt, if !interrupted => {
                    info!("interrupted");
                    interrupted = true;
                    reading = false;
                    solicits.abort_all();
                    self.session.close();
                }
            }

            if !reading && solicits.is_empty() {
                self.session.close();
            }
        }

        // Messages dispatched just before the session ended.
        while let Ok(message) = inbound.try_recv() {
            write_json_line(writer, &message)?;
        }
        Ok(())
    }

    async fn term(&self, line: &str, solicits: &mut JoinSet<Result<Value, SessionError>>) {
        let term = match parse_term(line) {
            Ok(Some(term)) => term,
            Ok(None) => return,
            Err(e) => {
                eprintln!("{e}:\n~~~~\n{line}\n~~~~");
                return;
            }
        };

        match term {
            Term::Reply { id, term } => match self.parked.take(&id) {
                Some(reply) => {
                    if let Err(e) = reply.send(term) {
                        eprintln!("Reply {id} failed: {e}");
                    }
                }
                None => eprintln!("No request waiting for reply {id}"),
            },
            Term::Notify(term) => {
                if let Err(e) = self.session.notify(term).await {
                    eprintln!("Notify failed: {e}");
                }
            }
            Term::Solicit(term) => {
                let session = self.session.clone();
                solicits.spawn(async move { session.solicit(term).await });
            }
        }
    }
}
