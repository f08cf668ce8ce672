// src/core/command/mod.rs

//! The command: one request/reply correspondence, including fan-out
//! sub-commands (§3, §4.F).
//!
//! Linked-list memberships (client queue, server ready/waiting queue,
//! parent's sub-command list) are modeled as plain `Vec<CommandId>` queues of
//! stable arena indices rather than an intrusive quadruple-linked node, per
//! the design notes — a `slab::Slab` gives us O(1) allocation/free and the
//! "stable identifier" property those queues need.

pub mod fanout;

use std::time::Instant;

use bytes::{Bytes, BytesMut};
use slab::Slab;

use crate::core::classify::Access;
use crate::core::errors::CorvusError;
use crate::core::protocol::resp::{ParseMode, ParseOutcome, parse_frame};

/// Re-parse just the command name out of a command's own verbatim request
/// bytes (e.g. for fan-out aggregation dispatch and slowlog entries). Cheap
/// relative to the original parse since `parse_frame` only has to walk the
/// first bulk string before the caller stops looking at the rest.
pub fn command_name(raw: &Bytes) -> String {
    let mut buf = BytesMut::new();
    buf.extend_from_slice(raw);
    match parse_frame(&mut buf, ParseMode::Request) {
        Ok(ParseOutcome::Complete { frame, .. }) => frame
            .as_array()
            .and_then(|a| a.first())
            .and_then(|f| f.as_bulk_str())
            .map(|b| String::from_utf8_lossy(b).to_ascii_uppercase())
            .unwrap_or_default(),
        _ => String::new(),
    }
}

/// Stable index into a worker's command arena.
pub type CommandId = usize;

/// The command state machine (§4.F). `Failed` is modeled as an orthogonal
/// flag rather than folding it into the linear chain, since it can be set
/// from any prior state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandState {
    Created,
    Parsed,
    Routed,
    Writing,
    Written,
    Replied,
    Done,
}

#[derive(Debug, Clone)]
pub struct Command {
    pub state: CommandState,
    pub failed: Option<CorvusError>,

    /// Verbatim request bytes forwarded to (or synthesized for) the backend.
    pub req_raw: Bytes,
    /// Verbatim reply bytes, once available.
    pub rep_raw: Option<Bytes>,

    pub access: Access,
    pub slot: Option<u16>,

    /// Which client connection (by the worker's local client table key) owns
    /// this command's position in the reply-ordering queue.
    pub client_id: usize,
    /// Which server connection (by the worker's local server table key) this
    /// command has been routed to, once known.
    pub server_id: Option<usize>,

    pub parent: Option<CommandId>,
    pub sub_cmds: Vec<CommandId>,
    pub count: usize,
    pub done_count: usize,

    /// True if the owning client disconnected while this command was still
    /// referenced by a server pipeline (§4.F "staleness").
    pub stale: bool,

    /// `parse_time` (§3): when this command was parsed off the client's
    /// buffer. Used to compute `total_latency` at reply time.
    pub created: Instant,
    /// First of the two `rep_time` entries (§3): when the request bytes
    /// were handed to a backend's write half. `None` for EXTRA commands
    /// and fan-out parents, which never touch a backend directly.
    pub sent_at: Option<Instant>,
}

impl Command {
    pub fn new(client_id: usize, req_raw: Bytes) -> Self {
        Self {
            state: CommandState::Created,
            failed: None,
            req_raw,
            rep_raw: None,
            access: Access::Unknown,
            slot: None,
            client_id,
            server_id: None,
            parent: None,
            sub_cmds: Vec::new(),
            count: 0,
            done_count: 0,
            stale: false,
            created: Instant::now(),
            sent_at: None,
        }
    }

    pub fn mark_failed(&mut self, err: CorvusError) {
        self.failed = Some(err);
        self.rep_raw = None;
    }

    pub fn is_fanout(&self) -> bool {
        !self.sub_cmds.is_empty()
    }

    /// A fan-out parent completes when every sub-command has finished.
    pub fn fanout_complete(&self) -> bool {
        self.done_count >= self.count
    }
}

/// Per-worker arena of in-flight commands. Never shared across threads.
#[derive(Default)]
pub struct CommandArena {
    slab: Slab<Command>,
}

impl CommandArena {
    pub fn new() -> Self {
        Self { slab: Slab::new() }
    }

    pub fn insert(&mut self, cmd: Command) -> CommandId {
        self.slab.insert(cmd)
    }

    pub fn get(&self, id: CommandId) -> Option<&Command> {
        self.slab.get(id)
    }

    pub fn get_mut(&mut self, id: CommandId) -> Option<&mut Command> {
        self.slab.get_mut(id)
    }

    /// Remove and return a command once it reaches a terminal state
    /// (`Done`/failed). Terminal transitions release all byte-range
    /// references by dropping the `Bytes` handles here.
    pub fn remove(&mut self, id: CommandId) -> Command {
        self.slab.remove(id)
    }

    /// Like `remove`, but tolerates `id` already being gone — used by
    /// cleanup paths (client/server timeout teardown) that may race with a
    /// command's normal completion.
    pub fn try_remove(&mut self, id: CommandId) -> Option<Command> {
        self.slab.try_remove(id)
    }

    pub fn len(&self) -> usize {
        self.slab.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slab.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_name_uppercases_the_verb() {
        assert_eq!(command_name(&Bytes::from_static(b"*2\r\n$3\r\nget\r\n$1\r\nk\r\n")), "GET");
        assert_eq!(
            command_name(&Bytes::from_static(b"*4\r\n$4\r\nMGET\r\n$1\r\na\r\n$1\r\nb\r\n$1\r\nc\r\n")),
            "MGET"
        );
    }

    #[test]
    fn arena_round_trips_commands() {
        let mut arena = CommandArena::new();
        let id = arena.insert(Command::new(1, Bytes::from_static(b"*1\r\n$4\r\nPING\r\n")));
        assert_eq!(arena.get(id).unwrap().state, CommandState::Created);
        let cmd = arena.remove(id);
        assert!(arena.get(id).is_none());
        assert_eq!(cmd.client_id, 1);
    }

    #[test]
    fn fanout_completes_when_all_subcommands_done() {
        let mut cmd = Command::new(1, Bytes::from_static(b""));
        cmd.count = 2;
        assert!(!cmd.fanout_complete());
        cmd.done_count = 1;
        assert!(!cmd.fanout_complete());
        cmd.done_count = 2;
        assert!(cmd.fanout_complete());
    }
}
