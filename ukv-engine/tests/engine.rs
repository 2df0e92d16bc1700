use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ukv_common::{Backend, BatchMode, CancelToken, Cmd, Context, ErrorKind, Value};
use ukv_engine::{MemoryBackend, Session, Store, StoreConfig};

fn run(store: &Store, session: &mut Session, parts: &[&str]) -> Value {
    let args: Vec<Vec<u8>> = parts.iter().map(|p| p.as_bytes().to_vec()).collect();
    store.execute(session, &args)
}

fn bulk(text: &str) -> Value {
    Value::Bulk(text.as_bytes().to_vec())
}

fn bulks(items: &[&str]) -> Value {
    Value::Array(items.iter().map(|item| bulk(item)).collect())
}

fn error_code(value: Value) -> String {
    value
        .into_result()
        .unwrap_err()
        .code()
        .unwrap_or_default()
        .to_string()
}

#[test]
fn strings_set_get_and_counters() {
    let store = Store::new();
    let mut s = Session::trusted(0);
    assert_eq!(run(&store, &mut s, &["SET", "k", "v"]), Value::ok());
    assert_eq!(run(&store, &mut s, &["GET", "k"]), bulk("v"));
    assert_eq!(run(&store, &mut s, &["SET", "k", "w", "NX"]), Value::Nil);
    assert_eq!(run(&store, &mut s, &["SETNX", "k", "w"]), Value::Integer(0));
    assert_eq!(run(&store, &mut s, &["GETSET", "k", "w"]), bulk("v"));
    assert_eq!(run(&store, &mut s, &["INCRBY", "n", "10"]), Value::Integer(10));
    assert_eq!(run(&store, &mut s, &["DECR", "n"]), Value::Integer(9));
    assert_eq!(error_code(run(&store, &mut s, &["INCR", "k"])), "ERR");
    assert_eq!(
        run(&store, &mut s, &["MGET", "k", "missing", "n"]),
        Value::Array(vec![bulk("w"), Value::Nil, bulk("9")])
    );
    assert_eq!(run(&store, &mut s, &["MSET", "a", "1", "b", "2"]), Value::ok());
    assert_eq!(run(&store, &mut s, &["GET", "b"]), bulk("2"));
}

#[test]
fn wrong_type_is_reported() {
    let store = Store::new();
    let mut s = Session::trusted(0);
    run(&store, &mut s, &["SET", "str", "x"]);
    assert_eq!(error_code(run(&store, &mut s, &["LPUSH", "str", "a"])), "WRONGTYPE");
    assert_eq!(error_code(run(&store, &mut s, &["HGET", "str", "f"])), "WRONGTYPE");
    run(&store, &mut s, &["SADD", "set", "a"]);
    assert_eq!(error_code(run(&store, &mut s, &["GET", "set"])), "WRONGTYPE");
}

#[test]
fn hashes() {
    let store = Store::new();
    let mut s = Session::trusted(0);
    assert_eq!(run(&store, &mut s, &["HSET", "h", "b", "2", "a", "1"]), Value::Integer(2));
    assert_eq!(run(&store, &mut s, &["HSETNX", "h", "a", "9"]), Value::Integer(0));
    assert_eq!(run(&store, &mut s, &["HGET", "h", "a"]), bulk("1"));
    assert_eq!(run(&store, &mut s, &["HGETALL", "h"]), bulks(&["a", "1", "b", "2"]));
    assert_eq!(run(&store, &mut s, &["HINCRBY", "h", "a", "5"]), Value::Integer(6));
    assert_eq!(
        run(&store, &mut s, &["HMGET", "h", "a", "zz"]),
        Value::Array(vec![bulk("6"), Value::Nil])
    );
    assert_eq!(run(&store, &mut s, &["HDEL", "h", "a", "b"]), Value::Integer(2));
    assert_eq!(run(&store, &mut s, &["EXISTS", "h"]), Value::Integer(0));
}

#[test]
fn lists() {
    let store = Store::new();
    let mut s = Session::trusted(0);
    assert_eq!(run(&store, &mut s, &["RPUSH", "l", "a", "b", "c"]), Value::Integer(3));
    assert_eq!(run(&store, &mut s, &["LPUSH", "l", "z"]), Value::Integer(4));
    assert_eq!(run(&store, &mut s, &["LRANGE", "l", "0", "-1"]), bulks(&["z", "a", "b", "c"]));
    assert_eq!(run(&store, &mut s, &["LINDEX", "l", "-1"]), bulk("c"));
    assert_eq!(run(&store, &mut s, &["LSET", "l", "0", "y"]), Value::ok());
    assert_eq!(error_code(run(&store, &mut s, &["LSET", "l", "9", "y"])), "ERR");
    assert_eq!(run(&store, &mut s, &["LPOP", "l"]), bulk("y"));
    assert_eq!(run(&store, &mut s, &["RPOP", "l"]), bulk("c"));
    run(&store, &mut s, &["RPUSH", "l", "a", "x", "a"]);
    assert_eq!(run(&store, &mut s, &["LREM", "l", "-2", "a"]), Value::Integer(2));
    assert_eq!(run(&store, &mut s, &["LRANGE", "l", "0", "-1"]), bulks(&["a", "b", "x"]));
    assert_eq!(run(&store, &mut s, &["LTRIM", "l", "1", "1"]), Value::ok());
    assert_eq!(run(&store, &mut s, &["LRANGE", "l", "0", "-1"]), bulks(&["b"]));
    assert_eq!(run(&store, &mut s, &["LLEN", "l"]), Value::Integer(1));
}

#[test]
fn sets() {
    let store = Store::new();
    let mut s = Session::trusted(0);
    assert_eq!(run(&store, &mut s, &["SADD", "s1", "a", "b", "c", "a"]), Value::Integer(3));
    run(&store, &mut s, &["SADD", "s2", "b", "c", "d"]);
    assert_eq!(run(&store, &mut s, &["SISMEMBER", "s1", "a"]), Value::Integer(1));
    assert_eq!(run(&store, &mut s, &["SINTER", "s1", "s2"]), bulks(&["b", "c"]));
    assert_eq!(run(&store, &mut s, &["SUNION", "s1", "s2"]), bulks(&["a", "b", "c", "d"]));
    assert_eq!(run(&store, &mut s, &["SDIFF", "s1", "s2"]), bulks(&["a"]));
    assert_eq!(run(&store, &mut s, &["SREM", "s1", "a", "zz"]), Value::Integer(1));
    assert_eq!(run(&store, &mut s, &["SCARD", "s1"]), Value::Integer(2));

    let popped = run(&store, &mut s, &["SPOP", "s1"]);
    assert!(popped == bulk("b") || popped == bulk("c"));
    assert_eq!(run(&store, &mut s, &["SCARD", "s1"]), Value::Integer(1));

    match run(&store, &mut s, &["SRANDMEMBER", "s2", "-5"]) {
        Value::Array(items) => assert_eq!(items.len(), 5),
        other => panic!("unexpected reply {:?}", other),
    }
}

#[test]
fn sorted_sets_order_by_score() {
    let store = Store::new();
    let mut s = Session::trusted(0);
    assert_eq!(
        run(&store, &mut s, &["ZADD", "z", "100", "A", "85", "B", "92", "C"]),
        Value::Integer(3)
    );
    assert_eq!(run(&store, &mut s, &["ZREVRANGE", "z", "0", "-1"]), bulks(&["A", "C", "B"]));
    assert_eq!(
        run(&store, &mut s, &["ZRANGE", "z", "0", "1", "WITHSCORES"]),
        bulks(&["B", "85", "C", "92"])
    );
    assert_eq!(run(&store, &mut s, &["ZRANK", "z", "A"]), Value::Integer(2));
    assert_eq!(run(&store, &mut s, &["ZREVRANK", "z", "A"]), Value::Integer(0));
    assert_eq!(
        run(&store, &mut s, &["ZRANGEBYSCORE", "z", "(85", "+inf"]),
        bulks(&["C", "A"])
    );
    assert_eq!(
        run(&store, &mut s, &["ZREVRANGEBYSCORE", "z", "100", "90", "LIMIT", "1", "5"]),
        bulks(&["C"])
    );
    assert_eq!(run(&store, &mut s, &["ZCOUNT", "z", "-inf", "92"]), Value::Integer(2));
    assert_eq!(run(&store, &mut s, &["ZINCRBY", "z", "0.5", "B"]), bulk("85.5"));
    assert_eq!(run(&store, &mut s, &["ZSCORE", "z", "B"]), bulk("85.5"));
    assert_eq!(run(&store, &mut s, &["ZREM", "z", "B"]), Value::Integer(1));
    assert_eq!(run(&store, &mut s, &["ZCARD", "z"]), Value::Integer(2));
    assert_eq!(error_code(run(&store, &mut s, &["ZADD", "z", "x", "m"])), "ERR");
}

#[test]
fn expiration_and_ttl() {
    let store = Store::new();
    let mut s = Session::trusted(0);
    run(&store, &mut s, &["SET", "k", "v", "EX", "1800"]);
    assert_eq!(run(&store, &mut s, &["TTL", "k"]), Value::Integer(1800));
    assert_eq!(run(&store, &mut s, &["TTL", "missing"]), Value::Integer(-2));
    run(&store, &mut s, &["SET", "plain", "v"]);
    assert_eq!(run(&store, &mut s, &["TTL", "plain"]), Value::Integer(-1));
    assert_eq!(run(&store, &mut s, &["PERSIST", "k"]), Value::Integer(1));
    assert_eq!(run(&store, &mut s, &["TTL", "k"]), Value::Integer(-1));

    assert_eq!(run(&store, &mut s, &["PEXPIRE", "plain", "20"]), Value::Integer(1));
    thread::sleep(Duration::from_millis(40));
    assert_eq!(run(&store, &mut s, &["GET", "plain"]), Value::Nil);

    assert_eq!(run(&store, &mut s, &["EXPIRE", "k", "0"]), Value::Integer(1));
    assert_eq!(run(&store, &mut s, &["EXISTS", "k"]), Value::Integer(0));
    assert_eq!(run(&store, &mut s, &["EXPIREAT", "missing", "1"]), Value::Integer(0));
}

#[test]
fn expire_times_past_the_clock_range_are_rejected() {
    let store = Store::new();
    let mut s = Session::trusted(0);
    let reply = run(&store, &mut s, &["SET", "k", "v", "EX", "9223372036854775807"]);
    assert_eq!(error_code(reply), "ERR");
    assert_eq!(run(&store, &mut s, &["EXISTS", "k"]), Value::Integer(0));

    run(&store, &mut s, &["SET", "k", "v"]);
    let reply = run(&store, &mut s, &["PEXPIRE", "k", "9223372036854775807"]);
    assert!(reply == Value::Integer(1) || reply.is_error(), "got {:?}", reply);
    let reply = run(&store, &mut s, &["EXPIRE", "k", "9223372036854775807"]);
    assert_eq!(error_code(reply), "ERR");
    assert_eq!(run(&store, &mut s, &["GET", "k"]), bulk("v"));
}

#[test]
fn keys_scan_and_type() {
    let store = Store::with_config(StoreConfig {
        shards: Some(4),
        ..StoreConfig::default()
    });
    let mut s = Session::trusted(0);
    for idx in 0..25 {
        run(&store, &mut s, &["SET", &format!("user:{}", idx), "x"]);
    }
    run(&store, &mut s, &["LPUSH", "queue", "job"]);
    assert_eq!(run(&store, &mut s, &["TYPE", "queue"]), Value::Simple(b"list".to_vec()));
    assert_eq!(run(&store, &mut s, &["TYPE", "nope"]), Value::Simple(b"none".to_vec()));
    assert_eq!(run(&store, &mut s, &["KEYS", "queue*"]), bulks(&["queue"]));

    let mut cursor = "0".to_string();
    let mut seen = Vec::new();
    loop {
        let reply = run(&store, &mut s, &["SCAN", &cursor, "MATCH", "user:*", "COUNT", "3"]);
        let Value::Array(parts) = reply else {
            panic!("scan reply must be an array");
        };
        let next = String::from_utf8(parts[0].as_bytes().unwrap().to_vec()).unwrap();
        if let Value::Array(keys) = &parts[1] {
            seen.extend(keys.iter().map(|k| k.as_bytes().unwrap().to_vec()));
        }
        if next == "0" {
            break;
        }
        cursor = next;
    }
    seen.sort();
    seen.dedup();
    assert_eq!(seen.len(), 25);
    assert_eq!(run(&store, &mut s, &["DBSIZE"]), Value::Integer(26));
    assert_eq!(run(&store, &mut s, &["FLUSHDB"]), Value::ok());
    assert_eq!(run(&store, &mut s, &["DBSIZE"]), Value::Integer(0));
}

#[test]
fn scripting_is_rejected_but_queueable() {
    let store = Store::new();
    let mut s = Session::trusted(0);
    assert!(run(&store, &mut s, &["EVAL", "return 1", "0"]).is_error());
    assert!(run(&store, &mut s, &["SCRIPT", "FLUSH"]).is_error());
}

#[test]
fn concurrent_increments_do_not_lose_updates() {
    let store = Arc::new(Store::new());
    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = Arc::clone(&store);
        handles.push(thread::spawn(move || {
            let mut s = Session::trusted(0);
            for _ in 0..250 {
                run(&store, &mut s, &["INCR", "counter"]);
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
    let mut s = Session::trusted(0);
    assert_eq!(run(&store, &mut s, &["GET", "counter"]), bulk("2000"));
}

#[test]
fn memory_backend_runs_pipelines_and_transactions() {
    let backend = MemoryBackend::new();
    let ctx = Context::background();
    backend.ping(&ctx).unwrap();

    let cmds = vec![
        Cmd::new("SET").key("s").arg("v"),
        Cmd::new("LPUSH").key("s").arg("x"),
        Cmd::new("GET").key("s"),
    ];
    let replies = backend.execute_batch(&ctx, &cmds, BatchMode::Pipeline).unwrap();
    assert_eq!(replies.len(), 3);
    assert_eq!(replies[0], Value::ok());
    assert!(replies[1].is_error());
    assert_eq!(replies[2], bulk("v"));

    let tx = vec![Cmd::new("INCR").key("n"), Cmd::new("INCR").key("n")];
    let replies = backend.execute_batch(&ctx, &tx, BatchMode::Transaction).unwrap();
    assert_eq!(replies, vec![Value::Integer(1), Value::Integer(2)]);

    let broken = vec![Cmd::new("SET").key("t").arg("1"), Cmd::new("NOPE")];
    let replies = backend.execute_batch(&ctx, &broken, BatchMode::Transaction).unwrap();
    assert!(replies.iter().all(Value::is_error));
    assert_eq!(backend.execute(&ctx, &Cmd::new("EXISTS").key("t")).unwrap(), Value::Integer(0));
}

#[test]
fn memory_backend_honours_context_and_close() {
    let backend = MemoryBackend::new();
    let token = CancelToken::new();
    token.cancel();
    let ctx = Context::background().cancellable(token);
    let err = backend.execute(&ctx, &Cmd::new("PING")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);

    backend.close().unwrap();
    let err = backend.ping(&Context::background()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
}

#[test]
fn password_protected_store_over_backend_session() {
    let store = Arc::new(Store::with_config(StoreConfig {
        password: Some("pw".into()),
        ..StoreConfig::default()
    }));
    let mut s = Session::new();
    assert_eq!(error_code(run(&store, &mut s, &["PING"])), "NOAUTH");
    assert_eq!(error_code(run(&store, &mut s, &["AUTH", "admin", "pw"])), "WRONGPASS");
    assert_eq!(run(&store, &mut s, &["AUTH", "default", "pw"]), Value::ok());

    let backend = MemoryBackend::with_store(Arc::clone(&store), 3);
    let ctx = Context::background();
    backend.execute(&ctx, &Cmd::new("SET").key("k").arg("v")).unwrap();
    run(&store, &mut s, &["SELECT", "3"]);
    assert_eq!(run(&store, &mut s, &["GET", "k"]), bulk("v"));
}
