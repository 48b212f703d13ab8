use std::{fmt, sync::Arc};

use url::Url;

use crate::{Client, DefaultEnvironment, Environment, Error, Outcomes, Result};

pub(crate) type ReadyCallback = Box<dyn FnOnce(Client) + Send + 'static>;

/// Configuration for [`Client`].
pub struct ClientConfig {
    pub(crate) app_key: String,
    pub(crate) outcomes_base_url: String,
    pub(crate) api_base_url: String,
    pub(crate) environment: Option<Arc<dyn Environment>>,
    pub(crate) outcomes: Option<Outcomes>,
    pub(crate) on_ready: Option<ReadyCallback>,
}

impl ClientConfig {
    /// Create a default Autotune configuration using the specified application key.
    ///
    /// ```
    /// # use autotune::ClientConfig;
    /// ClientConfig::from_app_key("app-key");
    /// ```
    pub fn from_app_key(app_key: impl Into<String>) -> Self {
        ClientConfig {
            app_key: app_key.into(),
            outcomes_base_url: ClientConfig::DEFAULT_OUTCOMES_BASE_URL.to_owned(),
            api_base_url: ClientConfig::DEFAULT_API_BASE_URL.to_owned(),
            environment: None,
            outcomes: None,
            on_ready: None,
        }
    }

    /// Set the environment providing HTTP, storage, and client context. Defaults to
    /// [`DefaultEnvironment`].
    ///
    /// ```
    /// # use autotune::{ClientConfig, DefaultEnvironment};
    /// let config = ClientConfig::from_app_key("app-key")
    ///     .environment(DefaultEnvironment::new().with_language("en-US"));
    /// ```
    pub fn environment(mut self, environment: impl Environment + 'static) -> Self {
        self.environment = Some(Arc::new(environment));
        self
    }

    /// Use outcomes embedded at build time instead of fetching them. The client becomes ready
    /// immediately and starts the environment's HTML experiments and autocompletion.
    pub fn outcomes(mut self, outcomes: Outcomes) -> Self {
        self.outcomes = Some(outcomes);
        self
    }

    /// Set a callback to run once outcomes are known (or failed to load).
    ///
    /// ```
    /// # use autotune::ClientConfig;
    /// let config = ClientConfig::from_app_key("app-key").on_ready(|client| {
    ///     println!("{} is ready", client.app_key());
    /// });
    /// ```
    pub fn on_ready(mut self, on_ready: impl FnOnce(Client) + Send + 'static) -> Self {
        self.on_ready = Some(Box::new(on_ready));
        self
    }

    /// Default base URL for outcome descriptors.
    pub const DEFAULT_OUTCOMES_BASE_URL: &'static str =
        "https://s3.us-east-2.amazonaws.com/autotune-outcomes/";

    /// Default base URL for reporting experiment starts and completions.
    pub const DEFAULT_API_BASE_URL: &'static str =
        "https://2vyiuehl9j.execute-api.us-east-2.amazonaws.com/prod/";

    /// Override base URL for outcome descriptors. Clients should use the default setting in most
    /// cases.
    pub fn outcomes_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.outcomes_base_url = base_url.into();
        self
    }

    /// Override base URL for reporting. Clients should use the default setting in most cases.
    pub fn api_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.api_base_url = base_url.into();
        self
    }

    /// Create a new [`Client`] using the specified configuration.
    ///
    /// Must be called from within a Tokio runtime, which the client uses for fetching and
    /// reporting.
    ///
    /// ```
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() -> autotune::Result<()> {
    /// # use autotune::{ClientConfig, Client};
    /// let client: Client = ClientConfig::from_app_key("app-key").to_client()?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn to_client(self) -> Result<Client> {
        Client::new(self)
    }

    pub(crate) fn take_environment(&mut self) -> Arc<dyn Environment> {
        self.environment
            .take()
            .unwrap_or_else(|| Arc::new(DefaultEnvironment::new()))
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("app_key", &self.app_key)
            .field("outcomes_base_url", &self.outcomes_base_url)
            .field("api_base_url", &self.api_base_url)
            .field("pre_initialized", &self.outcomes.is_some())
            .finish_non_exhaustive()
    }
}

/// Parse a base URL, making sure relative paths are joined below it rather than replacing its last
/// segment.
pub(crate) fn parse_base_url(base_url: &str) -> Result<Url> {
    let mut url = Url::parse(base_url).map_err(Error::InvalidBaseUrl)?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::{parse_base_url, ClientConfig};
    use crate::Error;

    #[test]
    fn default_base_urls_are_valid() {
        let outcomes = parse_base_url(ClientConfig::DEFAULT_OUTCOMES_BASE_URL).unwrap();
        assert_eq!(
            outcomes.join("abcde.tree.json").unwrap().as_str(),
            "https://s3.us-east-2.amazonaws.com/autotune-outcomes/abcde.tree.json"
        );

        let api = parse_base_url(ClientConfig::DEFAULT_API_BASE_URL).unwrap();
        assert_eq!(
            api.join("startExperiments").unwrap().as_str(),
            "https://2vyiuehl9j.execute-api.us-east-2.amazonaws.com/prod/startExperiments"
        );
    }

    #[test]
    fn base_url_without_trailing_slash() {
        let url = parse_base_url("http://localhost:8080/api").unwrap();

        assert_eq!(
            url.join("completeExperiments").unwrap().as_str(),
            "http://localhost:8080/api/completeExperiments"
        );
    }

    #[test]
    fn invalid_base_url() {
        assert!(matches!(
            parse_base_url("not a url"),
            Err(Error::InvalidBaseUrl(_))
        ));
    }
}
