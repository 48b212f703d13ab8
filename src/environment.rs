use std::{
    collections::HashMap,
    fmt,
    future::Future,
    path::PathBuf,
    pin::Pin,
    sync::{Arc, Mutex, OnceLock},
    time::Duration,
};

use regex::Regex;
use url::Url;

use crate::{Error, Result};

/// HTTP methods used by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Fetch outcome descriptors.
    Get,
    /// Report experiment starts and completions.
    Post,
}

/// Response future returned by [`Environment::http`].
pub type HttpFuture = Pin<Box<dyn Future<Output = Result<serde_json::Value>> + Send + 'static>>;

/// Callback handed to [`Environment::autocomplete`]. Calling it completes all experiments
/// returned by the client with the given payoff.
pub type PayoffCallback = Arc<dyn Fn(f64) + Send + Sync + 'static>;

/// Capabilities the client needs from its host: diagnostics, context sources, an HTTP transport,
/// and durable key-value storage.
///
/// Implementations should never panic. The client recovers from every error returned here by
/// falling back to defaults.
///
/// # Examples
///
/// ```no_run
/// # use autotune::{Environment, HttpFuture, Method, Result};
/// struct MyEnvironment;
///
/// impl Environment for MyEnvironment {
///     fn time_zone_offset(&self) -> i32 {
///         0
///     }
///     fn local_language(&self) -> Option<String> {
///         Some("en-US".to_owned())
///     }
///     fn http(&self, method: Method, url: url::Url, body: Option<serde_json::Value>) -> HttpFuture {
///         Box::pin(async move { Ok(serde_json::Value::Null) })
///     }
///     fn get_local_storage(&self, key: &str) -> Result<Option<String>> {
///         Ok(None)
///     }
///     fn set_local_storage(&self, key: &str, value: &str) -> Result<()> {
///         Ok(())
///     }
/// }
/// ```
pub trait Environment: Send + Sync {
    /// Diagnostic sink for routine messages.
    fn log(&self, args: fmt::Arguments<'_>) {
        log::debug!(target: "autotune", "{}", args);
    }

    /// Diagnostic sink for failures. The client calls it instead of returning errors.
    fn error(&self, args: fmt::Arguments<'_>) {
        log::error!(target: "autotune", "{}", args);
    }

    /// Timezone offset in minutes, positive west of UTC (e.g., `-120` for UTC+2).
    fn time_zone_offset(&self) -> i32;

    /// Language tag of the local user, if known.
    fn local_language(&self) -> Option<String>;

    /// Send a JSON request. The returned future must resolve exactly once.
    fn http(&self, method: Method, url: Url, body: Option<serde_json::Value>) -> HttpFuture;

    /// Read a value from durable storage. `Ok(None)` means the key is absent.
    fn get_local_storage(&self, key: &str) -> Result<Option<String>>;

    /// Write a value to durable storage.
    fn set_local_storage(&self, key: &str, value: &str) -> Result<()>;

    /// Start experiments declared in host markup. Called once by pre-initialized clients.
    fn start_html_experiments(&self) {}

    /// Arrange for `on_payoff` to be called when the host considers the visit successful. Called
    /// once by pre-initialized clients.
    fn autocomplete(&self, _on_payoff: PayoffCallback) {}
}

impl<E: Environment + ?Sized> Environment for Arc<E> {
    fn log(&self, args: fmt::Arguments<'_>) {
        (**self).log(args)
    }

    fn error(&self, args: fmt::Arguments<'_>) {
        (**self).error(args)
    }

    fn time_zone_offset(&self) -> i32 {
        (**self).time_zone_offset()
    }

    fn local_language(&self) -> Option<String> {
        (**self).local_language()
    }

    fn http(&self, method: Method, url: Url, body: Option<serde_json::Value>) -> HttpFuture {
        (**self).http(method, url, body)
    }

    fn get_local_storage(&self, key: &str) -> Result<Option<String>> {
        (**self).get_local_storage(key)
    }

    fn set_local_storage(&self, key: &str, value: &str) -> Result<()> {
        (**self).set_local_storage(key, value)
    }

    fn start_html_experiments(&self) {
        (**self).start_html_experiments()
    }

    fn autocomplete(&self, on_payoff: PayoffCallback) {
        (**self).autocomplete(on_payoff)
    }
}

/// Payoffs reported by [`DefaultEnvironment::autocomplete`] after a visitor stays for a while.
const AUTOCOMPLETE_SCHEDULE: [(Duration, f64); 2] = [
    (Duration::from_secs(10), 0.1),
    (Duration::from_secs(60), 0.2),
];

/// Environment variables consulted for the local language, in order of precedence.
const LANGUAGE_VARIABLES: [&str; 3] = ["LC_ALL", "LC_MESSAGES", "LANG"];

enum Storage {
    Memory(Mutex<HashMap<String, String>>),
    /// One file per key.
    Directory(PathBuf),
}

/// An [`Environment`] for native hosts.
///
/// - HTTP goes through a shared [`reqwest::Client`].
/// - Timezone comes from the system's local offset.
/// - Language comes from `LC_ALL`, `LC_MESSAGES`, or `LANG`, unless set explicitly.
/// - Storage is in memory unless a directory is configured.
///
/// # Examples
/// ```
/// # use autotune::DefaultEnvironment;
/// let environment = DefaultEnvironment::new()
///     .with_storage_dir(std::env::temp_dir().join("autotune"))
///     .with_language("en-GB");
/// ```
pub struct DefaultEnvironment {
    // Client holds a connection pool internally, so we're reusing the client between requests.
    client: reqwest::Client,
    storage: Storage,
    language: Option<String>,
}

impl DefaultEnvironment {
    /// Create an environment with in-memory storage and the language taken from the process
    /// environment.
    pub fn new() -> Self {
        let language = LANGUAGE_VARIABLES
            .iter()
            .filter_map(|name| std::env::var(name).ok())
            .find(|value| !value.is_empty())
            .and_then(|value| posix_locale_to_language_tag(&value));

        DefaultEnvironment {
            client: reqwest::Client::new(),
            storage: Storage::Memory(Mutex::new(HashMap::new())),
            language,
        }
    }

    /// Persist storage as files under `dir`. The directory is created on first write.
    pub fn with_storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage = Storage::Directory(dir.into());
        self
    }

    /// Override the detected language.
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }
}

impl Default for DefaultEnvironment {
    fn default() -> Self {
        DefaultEnvironment::new()
    }
}

impl Environment for DefaultEnvironment {
    fn time_zone_offset(&self) -> i32 {
        let offset = chrono::Local::now().offset().local_minus_utc();
        -offset / 60
    }

    fn local_language(&self) -> Option<String> {
        self.language.clone()
    }

    fn http(&self, method: Method, url: Url, body: Option<serde_json::Value>) -> HttpFuture {
        let request = match method {
            Method::Get => self.client.get(url),
            Method::Post => self.client.post(url),
        };
        let request = match body {
            Some(body) => request.json(&body),
            None => request,
        };

        Box::pin(async move {
            let response = request.send().await?.error_for_status()?;
            let value = response.json().await?;
            Ok(value)
        })
    }

    fn get_local_storage(&self, key: &str) -> Result<Option<String>> {
        match &self.storage {
            Storage::Memory(map) => {
                let map = map
                    .lock()
                    .map_err(|_| Error::Storage("storage lock poisoned".to_owned()))?;
                Ok(map.get(key).cloned())
            }
            Storage::Directory(dir) => match std::fs::read_to_string(dir.join(key)) {
                Ok(value) => Ok(Some(value)),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(err) => Err(err.into()),
            },
        }
    }

    fn set_local_storage(&self, key: &str, value: &str) -> Result<()> {
        match &self.storage {
            Storage::Memory(map) => {
                let mut map = map
                    .lock()
                    .map_err(|_| Error::Storage("storage lock poisoned".to_owned()))?;
                map.insert(key.to_owned(), value.to_owned());
                Ok(())
            }
            Storage::Directory(dir) => {
                std::fs::create_dir_all(dir)?;
                std::fs::write(dir.join(key), value)?;
                Ok(())
            }
        }
    }

    fn autocomplete(&self, on_payoff: PayoffCallback) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            self.error(format_args!("autocomplete requires a Tokio runtime"));
            return;
        };

        for (delay, payoff) in AUTOCOMPLETE_SCHEDULE {
            let on_payoff = Arc::clone(&on_payoff);
            runtime.spawn(async move {
                tokio::time::sleep(delay).await;
                on_payoff(payoff);
            });
        }
    }
}

/// Convert a POSIX locale (`en_US.UTF-8`, `de_DE@euro`) into a language tag (`en-US`, `de-DE`).
///
/// Returns `None` for the `C` and `POSIX` locales and for values that don't look like a locale.
fn posix_locale_to_language_tag(locale: &str) -> Option<String> {
    static LOCALE: OnceLock<Regex> = OnceLock::new();
    let locale_regex = LOCALE.get_or_init(|| {
        Regex::new(r"^([A-Za-z]{2,3})(?:[_-]([A-Za-z]{2}|[0-9]{3}))?(?:[.@].*)?$")
            .expect("locale regex should compile")
    });

    let captures = locale_regex.captures(locale)?;
    let language = captures.get(1)?.as_str().to_ascii_lowercase();
    Some(match captures.get(2) {
        Some(region) => format!("{}-{}", language, region.as_str().to_ascii_uppercase()),
        None => language,
    })
}
