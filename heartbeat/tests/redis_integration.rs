//! Runs against a real redis on localhost:6379.
//! Run with `cargo test -p heartbeat -- --ignored`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common_redis::{Connection, Connector, RedisConnector};
use heartbeat::{cleanup, send_signal, Heartbeat, HeartbeatConfig, StopOptions, StopOutcome};
use rand::distributions::Alphanumeric;
use rand::Rng;

fn random_string(prefix: &str, length: usize) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(Alphanumeric)
        .take(length)
        .map(char::from)
        .collect();
    format!("{}{}", prefix, suffix)
}

fn config() -> HeartbeatConfig {
    HeartbeatConfig::new("127.0.0.1", 6379, &random_string("heartbeat_test_", 12))
        .with_expire(3)
        .with_interval(1)
}

async fn read_key(key: &str) -> Option<String> {
    let client = redis::Client::open("redis://127.0.0.1:6379/").unwrap();
    let mut conn = client.get_async_connection().await.unwrap();
    redis::cmd("GET").arg(key).query_async(&mut conn).await.unwrap()
}

#[tokio::test]
#[ignore]
async fn test_heartbeat_against_redis() {
    let config = config();
    let received = Arc::new(Mutex::new(Vec::new()));
    let recorder = {
        let received = received.clone();
        move |signal: i32| received.lock().unwrap().push(signal)
    };

    let mut heartbeat = Heartbeat::builder(config.clone())
        .with_signal_handler(recorder)
        .start()
        .await
        .unwrap();
    assert_eq!(read_key(&config.key).await, Some("OK".to_string()));

    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(read_key(&config.key).await, Some("OK".to_string()));

    send_signal(&RedisConnector::new(), &config, 10).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(*received.lock().unwrap(), vec![10]);

    let outcome = heartbeat.stop(StopOptions::new().wait(true)).await.unwrap();
    assert_eq!(outcome, StopOutcome::Stopped);
    assert_eq!(read_key(&config.key).await, None);
}

#[tokio::test]
#[ignore]
async fn test_cleanup_removes_stale_key() {
    let config = config();
    let connector = RedisConnector::new();
    let mut conn = connector.connect(&config.host, config.port).await.unwrap();
    conn.set_ex(config.key.clone(), "OK".to_string(), 60)
        .await
        .unwrap();

    cleanup(&connector, &config).await.unwrap();

    assert_eq!(read_key(&config.key).await, None);
}
