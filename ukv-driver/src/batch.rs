//! Batch execution on a single connection.
//!
//! A pipeline is every command written in one flush followed by one reply
//! per command. A transaction wraps the same flush in `MULTI`/`EXEC` and is
//! unpacked so the caller still receives exactly one reply per command.

use ukv_common::{BatchMode, Cmd, Context, Error, Result, Value};

use crate::pool::PooledConnection;

/// Runs `cmds` on `conn` in the requested mode.
pub(crate) fn run_batch(
    conn: &mut PooledConnection,
    ctx: &Context,
    cmds: &[&Cmd],
    mode: BatchMode,
) -> Result<Vec<Value>> {
    if cmds.is_empty() {
        return Ok(Vec::new());
    }
    match mode {
        BatchMode::Pipeline => conn.pipeline(ctx, cmds),
        BatchMode::Transaction => {
            let multi = Cmd::new("MULTI");
            let exec = Cmd::new("EXEC");
            let mut wrapped = Vec::with_capacity(cmds.len() + 2);
            wrapped.push(&multi);
            wrapped.extend_from_slice(cmds);
            wrapped.push(&exec);
            let replies = conn.pipeline(ctx, &wrapped)?;
            unpack_transaction(replies, cmds.len())
        }
    }
}

/// Turns `[MULTI reply, QUEUED..., EXEC reply]` into one reply per command.
///
/// A command rejected while queuing keeps its own error; every other command
/// of an aborted transaction gets the `EXEC` error.
pub(crate) fn unpack_transaction(mut replies: Vec<Value>, count: usize) -> Result<Vec<Value>> {
    if replies.len() != count + 2 {
        return Err(Error::Protocol(format!(
            "expected {} transaction replies, got {}",
            count + 2,
            replies.len()
        )));
    }
    let exec = replies.pop().unwrap_or(Value::Nil);
    let multi = replies.remove(0);
    let queued = replies;

    if multi.is_error() {
        return Ok(vec![multi; count]);
    }

    match exec {
        Value::Array(results) if results.len() == count => Ok(results),
        Value::Array(results) => Err(Error::Protocol(format!(
            "EXEC returned {} results for {} commands",
            results.len(),
            count
        ))),
        Value::Error(raw) => Ok(abort_with(queued, Value::Error(raw))),
        Value::Nil => Ok(abort_with(
            queued,
            Value::error("EXECABORT Transaction discarded"),
        )),
        other => Err(Error::Protocol(format!("EXEC returned {}", other.type_name()))),
    }
}

fn abort_with(queued: Vec<Value>, reason: Value) -> Vec<Value> {
    queued
        .into_iter()
        .map(|reply| if reply.is_error() { reply } else { reason.clone() })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queued() -> Value {
        Value::Simple(b"QUEUED".to_vec())
    }

    #[test]
    fn unpacks_successful_exec() {
        let replies = vec![
            Value::ok(),
            queued(),
            queued(),
            Value::Array(vec![Value::ok(), Value::Integer(2)]),
        ];
        let unpacked = unpack_transaction(replies, 2).unwrap();
        assert_eq!(unpacked, vec![Value::ok(), Value::Integer(2)]);
    }

    #[test]
    fn runtime_errors_stay_per_command() {
        let replies = vec![
            Value::ok(),
            queued(),
            queued(),
            Value::Array(vec![
                Value::error("WRONGTYPE Operation against a key"),
                Value::Integer(1),
            ]),
        ];
        let unpacked = unpack_transaction(replies, 2).unwrap();
        assert!(unpacked[0].is_error());
        assert_eq!(unpacked[1], Value::Integer(1));
    }

    #[test]
    fn queue_errors_abort_with_their_own_reason() {
        let replies = vec![
            Value::ok(),
            queued(),
            Value::error("ERR unknown command"),
            Value::error("EXECABORT Transaction discarded because of previous errors."),
        ];
        let unpacked = unpack_transaction(replies, 2).unwrap();
        let first = unpacked[0].clone().into_result().unwrap_err();
        let second = unpacked[1].clone().into_result().unwrap_err();
        assert_eq!(first.code(), Some("EXECABORT"));
        assert_eq!(second.code(), Some("ERR"));
    }

    #[test]
    fn nil_exec_aborts_every_command() {
        let replies = vec![Value::ok(), queued(), Value::Nil];
        let unpacked = unpack_transaction(replies, 1).unwrap();
        assert!(unpacked[0].is_error());
    }

    #[test]
    fn wrong_reply_count_is_a_protocol_error() {
        let err = unpack_transaction(vec![Value::ok()], 1).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }
}
