use std::io::{BufReader, Write};
use std::net::TcpStream;

use ukv_common::{Backend, BatchMode, Cmd, Context, Value};
use ukv_driver::{read_response, Auth, ClusterOptions, ConnectOptions, Cluster, Standalone};
use ukv_server::{Role, ServerConfig, ServerHandle};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn spawn(config: ServerConfig) -> ServerHandle {
    init_tracing();
    ServerHandle::spawn(config).unwrap()
}

#[test]
fn raw_inline_and_multibulk_requests() {
    let server = spawn(ServerConfig::default());
    let mut stream = TcpStream::connect(server.addr()).unwrap();
    stream
        .write_all(b"PING\r\n*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n*2\r\n$3\r\nGET\r\n$1\r\nk\r\n")
        .unwrap();
    let mut reader = BufReader::new(stream.try_clone().unwrap());
    let mut line = Vec::new();
    assert_eq!(read_response(&mut reader, &mut line).unwrap(), Value::Simple(b"PONG".to_vec()));
    assert_eq!(read_response(&mut reader, &mut line).unwrap(), Value::ok());
    assert_eq!(read_response(&mut reader, &mut line).unwrap(), Value::bulk("v"));
}

#[test]
fn standalone_driver_round_trips() {
    let server = spawn(ServerConfig {
        password: Some("secret".into()),
        ..ServerConfig::default()
    });
    let options = ConnectOptions {
        auth: Some(Auth::password("secret")),
        db: 2,
        ..ConnectOptions::default()
    };
    let backend = Standalone::connect(&server.addr().to_string(), options).unwrap();
    let ctx = Context::background();
    backend.ping(&ctx).unwrap();
    assert_eq!(
        backend.execute(&ctx, &Cmd::new("SET").key("k").arg("v")).unwrap(),
        Value::ok()
    );

    let tx = vec![
        Cmd::new("INCR").key("n"),
        Cmd::new("LPUSH").key("k").arg("x"),
        Cmd::new("INCR").key("n"),
    ];
    let replies = backend.execute_batch(&ctx, &tx, BatchMode::Transaction).unwrap();
    assert_eq!(replies[0], Value::Integer(1));
    assert!(replies[1].is_error());
    assert_eq!(replies[2], Value::Integer(2));

    let db = server.store().db(2).unwrap();
    assert_eq!(db.len(std::time::Instant::now()), 2);
    backend.close().unwrap();
}

#[test]
fn wrong_password_fails_the_handshake() {
    let server = spawn(ServerConfig {
        password: Some("secret".into()),
        ..ServerConfig::default()
    });
    let options = ConnectOptions {
        auth: Some(Auth::password("nope")),
        ..ConnectOptions::default()
    };
    let backend = Standalone::connect(&server.addr().to_string(), options).unwrap();
    let err = backend.ping(&Context::background()).unwrap_err();
    assert_eq!(err.code(), Some("WRONGPASS"));
}

#[test]
fn cluster_role_serves_the_cluster_driver() {
    let server = spawn(ServerConfig {
        role: Role::Cluster,
        ..ServerConfig::default()
    });
    let backend = Cluster::connect(
        ClusterOptions {
            addrs: vec![server.addr().to_string()],
            ..ClusterOptions::default()
        },
        ConnectOptions::default(),
    )
    .unwrap();
    let ctx = Context::background();
    backend.ping(&ctx).unwrap();
    let cmds: Vec<Cmd> = (0..10)
        .map(|idx| Cmd::new("SET").key(format!("key:{}", idx)).arg("v"))
        .collect();
    let replies = backend.execute_batch(&ctx, &cmds, BatchMode::Pipeline).unwrap();
    assert!(replies.iter().all(|reply| *reply == Value::ok()));
    assert_eq!(
        backend.execute(&ctx, &Cmd::new("GET").key("key:7").readonly()).unwrap(),
        Value::bulk("v")
    );
}
