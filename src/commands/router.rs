//! Command dispatch
//!
//! Routes a command document to its handler by the name of its first field,
//! the same way a mongod command body is interpreted.

use bson::Document;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::context::CommandContext;
use super::killable::run_killable;
use super::metrics::status_document;
use super::request::{FindRequest, GetMoreRequest, KillCursorsRequest};
use super::result::CommandReply;
use crate::error::{CursordError, ErrorInfo, RequestError, Result};
use crate::wire::OpMsg;

/// Commands understood by the router
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Find,
    GetMore,
    KillCursors,
    ServerStatus,
}

impl CommandKind {
    /// Map a command name (the first field of the body) to a command
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "find" => Some(CommandKind::Find),
            "getMore" => Some(CommandKind::GetMore),
            "killCursors" => Some(CommandKind::KillCursors),
            "serverStatus" => Some(CommandKind::ServerStatus),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CommandKind::Find => "find",
            CommandKind::GetMore => "getMore",
            CommandKind::KillCursors => "killCursors",
            CommandKind::ServerStatus => "serverStatus",
        }
    }
}

/// Dispatches commands against a [`CommandContext`]
#[derive(Debug, Clone)]
pub struct CommandRouter {
    context: CommandContext,
}

impl CommandRouter {
    pub fn new(context: CommandContext) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &CommandContext {
        &self.context
    }

    /// Run a command and turn any failure into an error reply
    ///
    /// # Arguments
    /// * `db` - Database the command targets, unless the body carries `$db`
    /// * `cmd` - Command body
    /// * `cancel` - Fires when the client goes away
    pub async fn run_command(
        &self,
        db: &str,
        cmd: &Document,
        cancel: &CancellationToken,
    ) -> CommandReply {
        match self.execute(db, cmd, cancel).await {
            Ok(reply) => reply,
            Err(e) => error_reply(&e),
        }
    }

    /// Run a command, propagating failures
    pub async fn execute(
        &self,
        db: &str,
        cmd: &Document,
        cancel: &CancellationToken,
    ) -> Result<CommandReply> {
        let Some(name) = cmd.keys().next() else {
            return Err(RequestError::FailedToParse("empty command document".into()).into());
        };
        let db = cmd.get_str("$db").unwrap_or(db);

        let Some(kind) = CommandKind::from_name(name) else {
            self.context.counters.got_command();
            warn!("Unknown command '{}'", name);
            return Err(RequestError::CommandNotFound(name.to_string()).into());
        };

        let ctx = &self.context;
        match kind {
            CommandKind::Find => {
                let request = FindRequest::parse(db, cmd)?;
                let reply = run_killable(kind.name(), cancel, ctx.find(request, cancel)).await?;
                Ok(CommandReply::Cursor(reply))
            }
            CommandKind::GetMore => {
                let request = GetMoreRequest::parse(db, cmd)?;
                let reply = run_killable(kind.name(), cancel, ctx.get_more(request, cancel)).await?;
                Ok(CommandReply::Cursor(reply))
            }
            CommandKind::KillCursors => {
                let request = KillCursorsRequest::parse(db, cmd)?;
                let reply = run_killable(kind.name(), cancel, ctx.kill_cursors(request)).await?;
                Ok(CommandReply::Document(reply.to_document()))
            }
            CommandKind::ServerStatus => {
                ctx.counters.got_command();
                let status = status_document(&ctx.counters.snapshot(), &ctx.registry.stats());
                Ok(CommandReply::Document(status))
            }
        }
    }

    /// Handle one OP_MSG request and frame the reply
    ///
    /// A request without a body or a string `$db` is answered with an
    /// error reply like any other failed command.
    pub async fn handle_message(&self, msg: &OpMsg, cancel: &CancellationToken) -> OpMsg {
        let reply = match request_target(msg) {
            Ok((db, body)) => self.run_command(db, body, cancel).await,
            Err(e) => error_reply(&e),
        };
        reply.to_op_msg(msg.request_id)
    }
}

fn request_target(msg: &OpMsg) -> Result<(&str, &Document)> {
    let body = msg
        .body()
        .ok_or_else(|| RequestError::FailedToParse("OP_MSG has no body section".into()))?;
    let db = body.get_str("$db").map_err(|_| RequestError::TypeMismatch {
        field: "$db".to_string(),
        expected: "string",
    })?;
    Ok((db, body))
}

fn error_reply(e: &CursordError) -> CommandReply {
    debug!(
        "Command failed: {}",
        ErrorInfo::from_error(e)
            .to_json_compact()
            .unwrap_or_else(|_| e.to_string())
    );
    CommandReply::error(e)
}
