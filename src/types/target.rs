//! The currently addressed stream endpoint.

use crate::error::{Error, Result};
use std::fmt;
use url::Url;

/// The single endpoint the coordinator treats as the active stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamTarget {
    url: Url,
}

impl StreamTarget {
    /// Parse a target from a URL string.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use pigeon::types::StreamTarget;
    ///
    /// let target = StreamTarget::parse("http://localhost:8787/").unwrap();
    /// assert!(target.is_local());
    /// assert_eq!(target.key(), "http://localhost:8787/");
    ///
    /// assert!(StreamTarget::parse("not a url").is_err());
    /// ```
    pub fn parse(url: &str) -> Result<Self> {
        let url = Url::parse(url.trim()).map_err(|e| Error::invalid_url(format!("{url}: {e}")))?;
        match url.scheme() {
            "http" | "https" => Ok(Self { url }),
            other => Err(Error::invalid_url(format!(
                "{url}: unsupported scheme '{other}'"
            ))),
        }
    }

    /// The parsed URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Key used for this target's event log.
    pub fn key(&self) -> &str {
        self.url.as_str()
    }

    /// Whether the target points at this machine.
    ///
    /// Local targets get an ingest server so other processes can POST to them.
    pub fn is_local(&self) -> bool {
        match self.url.host_str() {
            None => true,
            Some(host) => host.is_empty() || host == "localhost" || host == "127.0.0.1",
        }
    }
}

impl fmt::Display for StreamTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("http://localhost:8787/", true ; "localhost")]
    #[test_case("http://127.0.0.1:9000/events", true ; "loopback ip")]
    #[test_case("https://consoledump.io/api/sse?id=31b2fe", false ; "remote")]
    #[test_case("http://localhost.example.com/", false ; "lookalike host")]
    fn locality(url: &str, expected: bool) {
        assert_eq!(StreamTarget::parse(url).unwrap().is_local(), expected);
    }

    #[test]
    fn rejects_non_http_schemes() {
        assert!(matches!(
            StreamTarget::parse("ftp://example.com/"),
            Err(Error::InvalidUrl(_))
        ));
        assert!(matches!(StreamTarget::parse(""), Err(Error::InvalidUrl(_))));
    }
}
