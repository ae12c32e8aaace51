use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::{Connection, Connector, CustomRedisError, RedisErrorKind};

const DATABASES: i64 = 16;

/// Operations that can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockFailure {
    Connect,
    Auth,
    Select,
    SetEx,
    Expire,
    Del,
    Rpush,
    /// Blocking pops fail as if the socket was reset.
    Blpop,
    /// Blocking pops fail with an error reply, the connection stays usable.
    BlpopReply,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockRedisCall {
    Connect { host: String, port: u16 },
    Auth,
    Select(i64),
    SetEx { key: String, value: String, seconds: u64 },
    Expire { key: String, seconds: u64 },
    Del(String),
    Rpush { key: String, value: String },
    Blpop { key: String, timeout_seconds: u64 },
}

#[derive(Default)]
struct MockStore {
    values: HashMap<(i64, String), (String, Option<Instant>)>,
    lists: HashMap<(i64, String), VecDeque<String>>,
    failures: HashSet<MockFailure>,
    password: Option<String>,
    connect_delay: Option<Duration>,
    calls: Vec<MockRedisCall>,
}

impl MockStore {
    fn live_value(&mut self, key: &(i64, String)) -> Option<&(String, Option<Instant>)> {
        let expired = match self.values.get(key) {
            Some((_, Some(at))) => *at <= Instant::now(),
            _ => false,
        };
        if expired {
            drop(self.values.remove(key));
        }
        self.values.get(key)
    }
}

#[derive(Default)]
struct MockState {
    store: Mutex<MockStore>,
    pushed: Notify,
}

/// An in-memory store. Every connection it opens sees the same data, and
/// expiry follows the tokio clock so tests can run with paused time.
#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<MockState>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    // Helper method to safely lock the store mutex
    fn lock(&self) -> MutexGuard<'_, MockStore> {
        lock_store(&self.state)
    }

    /// Make every subsequent call of this kind fail.
    pub fn fail(&self, failure: MockFailure) -> Self {
        drop(self.lock().failures.insert(failure));
        // Wake blocked pops so they observe the failure.
        self.state.pushed.notify_waiters();
        self.clone()
    }

    pub fn recover(&self, failure: MockFailure) -> Self {
        drop(self.lock().failures.remove(&failure));
        self.clone()
    }

    /// Require AUTH with this password before any data command.
    pub fn require_password(&self, password: &str) -> Self {
        self.lock().password = Some(password.to_owned());
        self.clone()
    }

    /// Delay every connection attempt, simulating an unresponsive host.
    pub fn connect_delay(&self, delay: Duration) -> Self {
        self.lock().connect_delay = Some(delay);
        self.clone()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.get_in(0, key)
    }

    pub fn get_in(&self, db: i64, key: &str) -> Option<String> {
        self.lock()
            .live_value(&(db, key.to_owned()))
            .map(|(value, _)| value.clone())
    }

    /// Remaining time to live; `None` if the key is absent or has no expiry.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        self.lock()
            .live_value(&(0, key.to_owned()))
            .and_then(|(_, at)| *at)
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn list(&self, key: &str) -> Vec<String> {
        self.list_in(0, key)
    }

    pub fn list_in(&self, db: i64, key: &str) -> Vec<String> {
        self.lock()
            .lists
            .get(&(db, key.to_owned()))
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Push onto a list from outside any connection, like a remote client would.
    pub fn push(&self, key: &str, value: &str) {
        push_value(&self.state, (0, key.to_owned()), value.to_owned());
    }

    pub fn get_calls(&self) -> Vec<MockRedisCall> {
        self.lock().calls.clone()
    }

    pub fn count_calls<F>(&self, predicate: F) -> usize
    where
        F: Fn(&MockRedisCall) -> bool,
    {
        self.lock().calls.iter().filter(|call| predicate(call)).count()
    }
}

fn lock_store(state: &MockState) -> MutexGuard<'_, MockStore> {
    match state.store.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn push_value(state: &MockState, key: (i64, String), value: String) {
    lock_store(state).lists.entry(key).or_default().push_back(value);
    state.pushed.notify_waiters();
}

/// A broken socket, classified the way the real client's I/O errors are.
fn io_error(kind: io::ErrorKind) -> CustomRedisError {
    CustomRedisError::from(redis::RedisError::from(io::Error::from(kind)))
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(
        &self,
        host: &str,
        port: u16,
    ) -> Result<Box<dyn Connection>, CustomRedisError> {
        let delay = {
            let mut store = self.lock();
            store.calls.push(MockRedisCall::Connect {
                host: host.to_owned(),
                port,
            });
            store.connect_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.lock().failures.contains(&MockFailure::Connect) {
            return Err(io_error(io::ErrorKind::ConnectionRefused));
        }

        Ok(Box::new(MockConnection {
            state: self.state.clone(),
            db: 0,
            authenticated: false,
        }))
    }
}

struct MockConnection {
    state: Arc<MockState>,
    db: i64,
    authenticated: bool,
}

impl MockConnection {
    /// Record the call, then apply injected failures and the AUTH requirement.
    fn begin(
        &self,
        call: MockRedisCall,
        failure: MockFailure,
    ) -> Result<MutexGuard<'_, MockStore>, CustomRedisError> {
        let mut store = lock_store(&self.state);
        store.calls.push(call);
        if store.failures.contains(&failure) {
            return Err(io_error(io::ErrorKind::ConnectionReset));
        }
        if failure != MockFailure::Auth && store.password.is_some() && !self.authenticated {
            return Err(CustomRedisError::from_redis_kind(
                RedisErrorKind::AuthenticationFailed,
                "NOAUTH Authentication required.",
            ));
        }
        Ok(store)
    }

    fn key(&self, k: String) -> (i64, String) {
        (self.db, k)
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn auth(&mut self, password: String) -> Result<(), CustomRedisError> {
        let accepted = {
            let store = self.begin(MockRedisCall::Auth, MockFailure::Auth)?;
            store.password.as_deref() == Some(password.as_str())
        };
        if !accepted {
            return Err(CustomRedisError::from_redis_kind(
                RedisErrorKind::AuthenticationFailed,
                "WRONGPASS invalid username-password pair",
            ));
        }
        self.authenticated = true;
        Ok(())
    }

    async fn select(&mut self, db: i64) -> Result<(), CustomRedisError> {
        drop(self.begin(MockRedisCall::Select(db), MockFailure::Select)?);
        if !(0..DATABASES).contains(&db) {
            return Err(CustomRedisError::from_redis_kind(
                RedisErrorKind::ResponseError,
                "ERR DB index is out of range",
            ));
        }
        self.db = db;
        Ok(())
    }

    async fn set_ex(&mut self, k: String, v: String, seconds: u64) -> Result<(), CustomRedisError> {
        let call = MockRedisCall::SetEx {
            key: k.clone(),
            value: v.clone(),
            seconds,
        };
        let key = self.key(k);
        let mut store = self.begin(call, MockFailure::SetEx)?;
        let expires_at = Instant::now() + Duration::from_secs(seconds);
        drop(store.values.insert(key, (v, Some(expires_at))));
        Ok(())
    }

    async fn expire(&mut self, k: String, seconds: u64) -> Result<bool, CustomRedisError> {
        let call = MockRedisCall::Expire {
            key: k.clone(),
            seconds,
        };
        let key = self.key(k);
        let mut store = self.begin(call, MockFailure::Expire)?;
        if store.live_value(&key).is_none() {
            return Ok(false);
        }
        if let Some((_, expires_at)) = store.values.get_mut(&key) {
            *expires_at = Some(Instant::now() + Duration::from_secs(seconds));
        }
        Ok(true)
    }

    async fn del(&mut self, k: String) -> Result<(), CustomRedisError> {
        let key = self.key(k.clone());
        let mut store = self.begin(MockRedisCall::Del(k), MockFailure::Del)?;
        drop(store.values.remove(&key));
        drop(store.lists.remove(&key));
        Ok(())
    }

    async fn rpush(&mut self, k: String, v: String) -> Result<(), CustomRedisError> {
        let call = MockRedisCall::Rpush {
            key: k.clone(),
            value: v.clone(),
        };
        drop(self.begin(call, MockFailure::Rpush)?);
        push_value(&self.state, self.key(k), v);
        Ok(())
    }

    async fn blpop(
        &mut self,
        k: String,
        timeout_seconds: u64,
    ) -> Result<Option<String>, CustomRedisError> {
        let call = MockRedisCall::Blpop {
            key: k.clone(),
            timeout_seconds,
        };
        drop(self.begin(call, MockFailure::Blpop)?);

        let key = self.key(k);
        // BLPOP with a zero timeout blocks forever.
        let deadline =
            (timeout_seconds > 0).then(|| Instant::now() + Duration::from_secs(timeout_seconds));

        loop {
            let notified = self.state.pushed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut store = lock_store(&self.state);
                if store.failures.contains(&MockFailure::Blpop) {
                    return Err(io_error(io::ErrorKind::ConnectionReset));
                }
                if store.failures.contains(&MockFailure::BlpopReply) {
                    return Err(CustomRedisError::from_redis_kind(
                        RedisErrorKind::TypeError,
                        "WRONGTYPE Operation against a key holding the wrong kind of value",
                    ));
                }
                if let Some(value) = store.lists.get_mut(&key).and_then(VecDeque::pop_front) {
                    return Ok(Some(value));
                }
            }

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return Ok(None);
                    }
                }
                None => notified.await,
            }
        }
    }
}
