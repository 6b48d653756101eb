//! Spy driver for testing
//!
//! Counts every call and can be told to fail or to stall.

use async_trait::async_trait;
use callout::announcement::{AnnounceReceipt, AnnouncementRequest};
use callout::drivers::{Driver, TestReport};
use callout::endpoint::{EndpointConfig, ProtocolKind};
use callout::error::{CalloutError, CalloutResult};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug)]
pub struct SpyDriver {
    kind: ProtocolKind,
    test_ok: AtomicBool,
    fail_announce: AtomicBool,
    announce_delay: Mutex<Duration>,
    test_delay: Mutex<Duration>,
    pub tests: AtomicUsize,
    pub announces: AtomicUsize,
    pub stops: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub texts: Mutex<Vec<String>>,
}

impl SpyDriver {
    pub fn new(kind: ProtocolKind) -> Self {
        Self {
            kind,
            test_ok: AtomicBool::new(true),
            fail_announce: AtomicBool::new(false),
            announce_delay: Mutex::new(Duration::ZERO),
            test_delay: Mutex::new(Duration::ZERO),
            tests: AtomicUsize::new(0),
            announces: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            texts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(kind: ProtocolKind) -> Self {
        let spy = Self::new(kind);
        spy.set_test_ok(false);
        spy.set_fail_announce(true);
        spy
    }

    pub fn set_test_ok(&self, ok: bool) {
        self.test_ok.store(ok, Ordering::SeqCst);
    }

    pub fn set_fail_announce(&self, fail: bool) {
        self.fail_announce.store(fail, Ordering::SeqCst);
    }

    pub fn set_announce_delay(&self, delay: Duration) {
        *self.announce_delay.lock().unwrap() = delay;
    }

    pub fn set_test_delay(&self, delay: Duration) {
        *self.test_delay.lock().unwrap() = delay;
    }

    pub fn announce_count(&self) -> usize {
        self.announces.load(Ordering::SeqCst)
    }

    pub fn test_count(&self) -> usize {
        self.tests.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn announced_texts(&self) -> Vec<String> {
        self.texts.lock().unwrap().clone()
    }
}

/// Decrements the in-flight counter even when the future is dropped
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Driver for SpyDriver {
    fn kind(&self) -> ProtocolKind {
        self.kind
    }

    async fn test(&self, _cfg: &EndpointConfig) -> CalloutResult<TestReport> {
        self.tests.fetch_add(1, Ordering::SeqCst);
        let delay = *self.test_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.test_ok.load(Ordering::SeqCst) {
            Ok(TestReport::ok(format!("{} spy answered", self.kind)))
        } else {
            Ok(TestReport::failed(format!("no {} endpoint (HTTP 404)", self.kind)))
        }
    }

    async fn announce(
        &self,
        _cfg: &EndpointConfig,
        req: &AnnouncementRequest,
    ) -> CalloutResult<AnnounceReceipt> {
        self.announces.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        self.texts.lock().unwrap().push(req.text.clone());
        let delay = *self.announce_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail_announce.load(Ordering::SeqCst) {
            Err(CalloutError::Transport("connection refused".to_string()))
        } else {
            Ok(AnnounceReceipt::done("spy accepted"))
        }
    }

    async fn stop(&self, _cfg: &EndpointConfig) -> CalloutResult<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
