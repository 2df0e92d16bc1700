//! Connection and server commands.

use ukv_common::Value;

use super::{parse_int, Call, CmdError, Reply};

pub(super) fn ping(_call: &mut Call<'_>, args: &[Vec<u8>]) -> Reply {
    match args {
        [_] => Ok(Value::Simple(b"PONG".to_vec())),
        [_, message] => Ok(Value::Bulk(message.clone())),
        _ => Err(CmdError::Arity("ping".into())),
    }
}

pub(super) fn echo(_call: &mut Call<'_>, args: &[Vec<u8>]) -> Reply {
    Ok(Value::Bulk(args[1].clone()))
}

pub(super) fn select(call: &mut Call<'_>, args: &[Vec<u8>]) -> Reply {
    let index = parse_int(&args[1])?;
    if index < 0 || index as usize >= call.store.databases() {
        return Err(CmdError::BadDb);
    }
    call.session.db = index as usize;
    Ok(Value::ok())
}

/// `AUTH password` or `AUTH username password`; only the `default` user exists.
pub(super) fn auth(call: &mut Call<'_>, args: &[Vec<u8>]) -> Reply {
    let (user, password) = match args {
        [_, password] => (None, password),
        [_, user, password] => (Some(user), password),
        _ => return Err(CmdError::Syntax),
    };
    if !call.store.requires_auth() {
        return Err(CmdError::NoPassword);
    }
    let user_ok = user.map_or(true, |user| user.as_slice() == b"default");
    if user_ok && call.store.check_password(password) {
        call.session.authenticated = true;
        Ok(Value::ok())
    } else {
        Err(CmdError::WrongPass)
    }
}

pub(super) fn info(call: &mut Call<'_>, _args: &[Vec<u8>]) -> Reply {
    let mut text = String::from("# Server\r\n");
    text.push_str(concat!("ukv_version:", env!("CARGO_PKG_VERSION"), "\r\n"));
    text.push_str("role:master\r\n");
    text.push_str("# Keyspace\r\n");
    for idx in 0..call.store.databases() {
        if let Some(db) = call.store.db(idx) {
            let keys = db.len(call.now);
            if keys > 0 {
                text.push_str(&format!("db{}:keys={}\r\n", idx, keys));
            }
        }
    }
    Ok(Value::Bulk(text.into_bytes()))
}

/// `EVAL`, `EVALSHA` and `SCRIPT *` are recognized but not executed.
pub(super) fn scripting(_call: &mut Call<'_>, _args: &[Vec<u8>]) -> Reply {
    Err(CmdError::NoScripting)
}
