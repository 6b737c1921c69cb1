//! Run configuration and startup preconditions.

use crate::client::{TwoChatClient, DEFAULT_API_BASE_URL};
use reqwest::Url;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Spacing between consecutive requests; the service rejects faster callers.
pub const DEFAULT_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Input file [{}] couldn't be found", .0.display())]
    MissingInput(PathBuf),
    #[error("Output file path is empty")]
    MissingOutput,
    #[error("Source number is empty")]
    MissingSource,
    #[error("API_KEY is missing: pass --api-key or set the API_KEY environment variable")]
    MissingCredential,
    #[error("Invalid API base URL [{0}]: expected an absolute http(s) URL")]
    InvalidBaseUrl(String),
    #[error("Delimiter {0:?} is not a single ASCII character")]
    InvalidDelimiter(char),
    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// Immutable configuration for one invocation.
#[derive(Clone)]
pub struct RunConfig {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub source_number: String,
    pub api_key: String,
    pub delay: Duration,
    pub api_base_url: Url,
    pub delimiter: u8,
}

impl RunConfig {
    pub fn new(
        input_path: impl Into<PathBuf>,
        output_path: impl Into<PathBuf>,
        source_number: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            input_path: input_path.into(),
            output_path: output_path.into(),
            source_number: source_number.into(),
            api_key: api_key.into(),
            delay: DEFAULT_DELAY,
            api_base_url: default_base_url(),
            delimiter: b',',
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_api_base_url(mut self, url: Url) -> Self {
        self.api_base_url = url;
        self
    }

    pub fn with_delimiter(mut self, delimiter: char) -> Result<Self, StartupError> {
        if !delimiter.is_ascii() {
            return Err(StartupError::InvalidDelimiter(delimiter));
        }
        self.delimiter = delimiter as u8;
        Ok(self)
    }

    /// Check every startup precondition. Nothing has been read or written yet
    /// when this fails.
    pub fn validate(&self) -> Result<(), StartupError> {
        if !self.input_path.is_file() {
            return Err(StartupError::MissingInput(self.input_path.clone()));
        }
        if self.output_path.as_os_str().is_empty() {
            return Err(StartupError::MissingOutput);
        }
        if self.source_number.trim().is_empty() {
            return Err(StartupError::MissingSource);
        }
        if self.api_key.trim().is_empty() {
            return Err(StartupError::MissingCredential);
        }
        let url = &self.api_base_url;
        if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
            return Err(StartupError::InvalidBaseUrl(url.to_string()));
        }
        Ok(())
    }

    pub fn build_client(&self) -> Result<TwoChatClient, StartupError> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("numcheck/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(StartupError::Client)?;
        Ok(TwoChatClient::new(
            http_client,
            self.api_base_url.clone(),
            self.source_number.trim(),
            self.api_key.trim(),
        ))
    }
}

impl fmt::Debug for RunConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunConfig")
            .field("input_path", &self.input_path)
            .field("output_path", &self.output_path)
            .field("source_number", &self.source_number)
            .field("api_key", &"<redacted>")
            .field("delay", &self.delay)
            .field("api_base_url", &self.api_base_url.as_str())
            .field("delimiter", &(self.delimiter as char))
            .finish()
    }
}

fn default_base_url() -> Url {
    Url::parse(DEFAULT_API_BASE_URL).expect("default API base URL is valid")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn valid_config(input: &NamedTempFile) -> RunConfig {
        RunConfig::new(input.path(), "out.csv", "+10000000000", "secret")
    }

    #[test]
    fn test_defaults() {
        let input = NamedTempFile::new().unwrap();
        let config = valid_config(&input);
        assert_eq!(config.delay, Duration::from_secs(5));
        assert_eq!(config.delimiter, b',');
        assert_eq!(config.api_base_url.as_str(), "https://api.p.2chat.io/");
        config.validate().unwrap();
    }

    #[test]
    fn test_missing_input_is_rejected_first() {
        let config = RunConfig::new("/definitely/not/here.csv", "out.csv", "", "");
        assert!(matches!(config.validate(), Err(StartupError::MissingInput(_))));
    }

    #[test]
    fn test_missing_credential() {
        let input = NamedTempFile::new().unwrap();
        let mut config = valid_config(&input);
        config.api_key = "  ".to_string();
        assert!(matches!(config.validate(), Err(StartupError::MissingCredential)));
    }

    #[test]
    fn test_missing_source() {
        let input = NamedTempFile::new().unwrap();
        let mut config = valid_config(&input);
        config.source_number = String::new();
        assert!(matches!(config.validate(), Err(StartupError::MissingSource)));
    }

    #[test]
    fn test_rejects_non_http_base_url() {
        let input = NamedTempFile::new().unwrap();
        let config = valid_config(&input).with_api_base_url(Url::parse("ftp://example.test").unwrap());
        assert!(matches!(config.validate(), Err(StartupError::InvalidBaseUrl(_))));

        let config = valid_config(&input).with_api_base_url(Url::parse("mailto:a@b.c").unwrap());
        assert!(matches!(config.validate(), Err(StartupError::InvalidBaseUrl(_))));
    }

    #[test]
    fn test_delimiter_must_be_ascii() {
        let input = NamedTempFile::new().unwrap();
        assert_eq!(valid_config(&input).with_delimiter(';').unwrap().delimiter, b';');
        assert!(matches!(
            valid_config(&input).with_delimiter('§'),
            Err(StartupError::InvalidDelimiter('§'))
        ));
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let input = NamedTempFile::new().unwrap();
        let rendered = format!("{:?}", valid_config(&input));
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
