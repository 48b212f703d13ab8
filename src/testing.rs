//! Scripted in-memory [`Environment`] for unit tests.
use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use serde_json::Value;
use url::Url;

use crate::{Environment, Error, HttpFuture, Method, PayoffCallback, Result};

/// A request seen by [`TestEnvironment::http`].
#[derive(Debug, Clone)]
pub(crate) struct Request {
    pub method: Method,
    pub url: Url,
    pub body: Option<Value>,
}

pub(crate) struct TestEnvironment {
    time_zone_offset: AtomicI32,
    language: Option<String>,
    storage: Mutex<HashMap<String, String>>,
    storage_available: AtomicBool,
    /// Response to GET requests. `None` makes them fail.
    outcomes: Mutex<Option<Value>>,
    response_delay: Mutex<Duration>,
    fail_posts: AtomicBool,
    requests: Mutex<Vec<Request>>,
    logs: Mutex<Vec<String>>,
    errors: Mutex<Vec<String>>,
    html_experiments_started: AtomicUsize,
    on_payoff: Mutex<Option<PayoffCallback>>,
}

impl TestEnvironment {
    pub fn new() -> TestEnvironment {
        TestEnvironment {
            time_zone_offset: AtomicI32::new(0),
            language: None,
            storage: Mutex::new(HashMap::new()),
            storage_available: AtomicBool::new(true),
            outcomes: Mutex::new(Some(serde_json::json!({}))),
            response_delay: Mutex::new(Duration::ZERO),
            fail_posts: AtomicBool::new(false),
            requests: Mutex::new(Vec::new()),
            logs: Mutex::new(Vec::new()),
            errors: Mutex::new(Vec::new()),
            html_experiments_started: AtomicUsize::new(0),
            on_payoff: Mutex::new(None),
        }
    }

    pub fn with_language(mut self, language: &str) -> TestEnvironment {
        self.language = Some(language.to_owned());
        self
    }

    pub fn with_outcomes(self, outcomes: Value) -> TestEnvironment {
        *self.outcomes.lock().unwrap() = Some(outcomes);
        self
    }

    pub fn with_failing_fetch(self) -> TestEnvironment {
        *self.outcomes.lock().unwrap() = None;
        self
    }

    pub fn with_failing_posts(self) -> TestEnvironment {
        self.fail_posts.store(true, Ordering::SeqCst);
        self
    }

    /// Delay every response by `delay`.
    pub fn with_response_delay(self, delay: Duration) -> TestEnvironment {
        *self.response_delay.lock().unwrap() = delay;
        self
    }

    pub fn shared(self) -> Arc<TestEnvironment> {
        Arc::new(self)
    }

    pub fn set_time_zone_offset(&self, minutes: i32) {
        self.time_zone_offset.store(minutes, Ordering::SeqCst);
    }

    pub fn set_storage_available(&self, available: bool) {
        self.storage_available.store(available, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }

    /// Requests whose URL path ends with `suffix`.
    pub fn requests_to(&self, suffix: &str) -> Vec<Request> {
        self.requests()
            .into_iter()
            .filter(|request| request.url.path().ends_with(suffix))
            .collect()
    }

    pub fn logs(&self) -> Vec<String> {
        self.logs.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }

    pub fn html_experiments_started(&self) -> usize {
        self.html_experiments_started.load(Ordering::SeqCst)
    }

    /// The callback registered through [`Environment::autocomplete`], if any.
    pub fn on_payoff(&self) -> Option<PayoffCallback> {
        self.on_payoff.lock().unwrap().clone()
    }
}

impl Environment for TestEnvironment {
    fn log(&self, args: fmt::Arguments<'_>) {
        self.logs.lock().unwrap().push(args.to_string());
    }

    fn error(&self, args: fmt::Arguments<'_>) {
        self.errors.lock().unwrap().push(args.to_string());
    }

    fn time_zone_offset(&self) -> i32 {
        self.time_zone_offset.load(Ordering::SeqCst)
    }

    fn local_language(&self) -> Option<String> {
        self.language.clone()
    }

    fn http(&self, method: Method, url: Url, body: Option<Value>) -> HttpFuture {
        self.requests.lock().unwrap().push(Request {
            method,
            url,
            body,
        });

        let response = match method {
            Method::Get => self.outcomes.lock().unwrap().clone(),
            Method::Post if self.fail_posts.load(Ordering::SeqCst) => None,
            Method::Post => Some(serde_json::json!({})),
        };
        let delay = *self.response_delay.lock().unwrap();

        Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            response.ok_or_else(|| {
                Error::Io(Arc::new(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "scripted failure",
                )))
            })
        })
    }

    fn get_local_storage(&self, key: &str) -> Result<Option<String>> {
        if !self.storage_available.load(Ordering::SeqCst) {
            return Err(Error::Storage("storage disabled".to_owned()));
        }
        Ok(self.storage.lock().unwrap().get(key).cloned())
    }

    fn set_local_storage(&self, key: &str, value: &str) -> Result<()> {
        if !self.storage_available.load(Ordering::SeqCst) {
            return Err(Error::Storage("storage disabled".to_owned()));
        }
        self.storage
            .lock()
            .unwrap()
            .insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn start_html_experiments(&self) {
        self.html_experiments_started.fetch_add(1, Ordering::SeqCst);
    }

    fn autocomplete(&self, on_payoff: PayoffCallback) {
        *self.on_payoff.lock().unwrap() = Some(on_payoff);
    }
}
