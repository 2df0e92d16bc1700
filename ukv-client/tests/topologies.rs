use std::time::{Duration, Instant};

use ukv_client::{
    connect, connect_cluster, connect_sentinel, connect_single, Config, Context, ErrorKind,
    Factory, Member, Topology,
};
use ukv_server::{Role, ServerConfig, ServerHandle};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn spawn(config: ServerConfig) -> ServerHandle {
    init_tracing();
    ServerHandle::spawn(config).unwrap()
}

#[test]
fn single_node_with_auth_and_db() {
    let server = spawn(ServerConfig {
        password: Some("secret".into()),
        ..ServerConfig::default()
    });
    let addr = server.addr().to_string();
    let client = connect_single(&addr, 2, Some("secret")).unwrap();
    assert_eq!(client.topology(), Topology::Single);
    let ctx = Context::with_timeout(Duration::from_secs(5));

    client.set(&ctx, "k", "v", Duration::ZERO).unwrap();
    assert_eq!(client.get(&ctx, "k").unwrap(), "v");
    assert!(client.get(&ctx, "missing").unwrap_err().is_not_found());

    let db = server.store().db(2).unwrap();
    assert_eq!(db.len(Instant::now()), 1);
    assert_eq!(server.store().db(0).unwrap().len(Instant::now()), 0);
    client.close().unwrap();
}

#[test]
fn wrong_password_fails_the_probe() {
    let server = spawn(ServerConfig {
        password: Some("secret".into()),
        ..ServerConfig::default()
    });
    let err = connect_single(&server.addr().to_string(), 0, Some("nope")).unwrap_err();
    assert!(err.is_connection(), "unexpected error {:?}", err);
}

#[test]
fn prefixed_pipeline_over_tcp() {
    let server = spawn(ServerConfig::default());
    let mut config = Config::single(server.addr().to_string(), 0);
    config.common.key_prefix = "app:".into();
    config.common.default_ttl_ms = 30 * 60 * 1000;
    let client = Factory::new(config).unwrap().build().unwrap();
    let ctx = Context::with_timeout(Duration::from_secs(5));

    client.set(&ctx, "s", "text", Duration::ZERO).unwrap();
    let mut pipe = client.pipeline();
    let bad = pipe.lpush("s", &["x"]).unwrap();
    let good = pipe.get("s").unwrap();
    let count = pipe.incr("hits").unwrap();
    let results = pipe.exec(&ctx).unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(bad.resolve(&results).unwrap_err().code(), Some("WRONGTYPE"));
    assert_eq!(good.resolve(&results).unwrap(), "text");
    assert_eq!(count.resolve(&results).unwrap(), 1);

    let mut keys = client.keys(&ctx, "*").unwrap();
    keys.sort();
    assert_eq!(keys, ["hits", "s"]);
    let stored = server.store().db(0).unwrap().keys(Instant::now());
    assert!(stored.iter().all(|key| key.starts_with(b"app:")));

    let mut tx = client.transactional_pipeline();
    let first = tx.incr("hits").unwrap();
    let second = tx.incr("hits").unwrap();
    let results = tx.exec(&ctx).unwrap();
    assert_eq!(first.resolve(&results).unwrap(), 2);
    assert_eq!(second.resolve(&results).unwrap(), 3);
}

#[test]
fn cluster_topology_routes_every_key() {
    let server = spawn(ServerConfig {
        role: Role::Cluster,
        ..ServerConfig::default()
    });
    let addr = server.addr().to_string();
    let client = connect_cluster(&[addr.as_str()], None).unwrap();
    assert_eq!(client.topology(), Topology::Cluster);
    let ctx = Context::with_timeout(Duration::from_secs(5));

    let mut pipe = client.pipeline();
    let handles: Vec<_> = (0..20)
        .map(|idx| pipe.set(&format!("user:{}", idx), "v", Duration::ZERO).unwrap())
        .collect();
    let results = pipe.exec(&ctx).unwrap();
    for handle in handles {
        handle.resolve(&results).unwrap();
    }
    assert_eq!(client.keys(&ctx, "user:*").unwrap().len(), 20);
    assert_eq!(client.get(&ctx, "user:7").unwrap(), "v");

    client
        .zadd(
            &ctx,
            "board",
            &[
                Member::new(100.0, "A"),
                Member::new(85.0, "B"),
                Member::new(92.0, "C"),
            ],
        )
        .unwrap();
    assert_eq!(client.zrevrange(&ctx, "board", 0, -1).unwrap(), ["A", "C", "B"]);
}

#[test]
fn sentinel_topology_follows_the_reported_master() {
    let primary = spawn(ServerConfig::default());
    let sentinel = spawn(ServerConfig {
        role: Role::Sentinel,
        master_name: "mymaster".into(),
        master_addr: Some(primary.addr().to_string()),
        ..ServerConfig::default()
    });

    let sentinel_addr = sentinel.addr().to_string();
    let client = connect_sentinel(&[sentinel_addr.as_str()], "mymaster", 0, None).unwrap();
    assert_eq!(client.topology(), Topology::Sentinel);
    let ctx = Context::with_timeout(Duration::from_secs(5));
    client.set(&ctx, "k", "before", Duration::ZERO).unwrap();
    assert_eq!(primary.store().db(0).unwrap().len(Instant::now()), 1);

    // Fail over to a new primary and take the old one down.
    let replacement = spawn(ServerConfig::default());
    sentinel
        .state()
        .set_master(Some(replacement.addr().to_string()));
    primary.shutdown();

    let mut stored = false;
    for _ in 0..5 {
        let ctx = Context::with_timeout(Duration::from_secs(5));
        match client.set(&ctx, "k", "after", Duration::ZERO) {
            Ok(()) => {
                stored = true;
                break;
            }
            Err(err) => assert!(err.is_connection(), "unexpected error {:?}", err),
        }
    }
    assert!(stored, "client never reached the new master");
    assert_eq!(client.get(&ctx, "k").unwrap(), "after");
    assert_eq!(replacement.store().db(0).unwrap().len(Instant::now()), 1);
}

#[test]
fn sentinel_with_unknown_group_fails_to_build() {
    let primary = spawn(ServerConfig::default());
    let sentinel = spawn(ServerConfig {
        role: Role::Sentinel,
        master_addr: Some(primary.addr().to_string()),
        ..ServerConfig::default()
    });
    let mut config = Config::sentinel([sentinel.addr().to_string()], "elsewhere", 0);
    config.common.max_retries = 0;
    let err = connect(config).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
}
