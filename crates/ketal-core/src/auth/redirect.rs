use thiserror::Error;
use url::Url;

/// Redirect URI used when the authorization URL does not declare one.
pub const DEFAULT_REDIRECT_URI: &str = "ketal://oidc";

/// Shape of the redirect a browser session waits for to recognise completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackPattern {
    Https { host: String, path: String },
    CustomScheme(String),
}

/// Reasons a redirect URI cannot produce a [`CallbackPattern`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RedirectUriError {
    #[error("redirect URI '{0}' has no scheme")]
    MissingScheme(String),
    #[error("https redirect URI '{0}' has no host")]
    MissingHost(String),
}

impl CallbackPattern {
    /// Derive the pattern for a redirect URI.
    ///
    /// # Panics
    ///
    /// Panics when the URI has neither an HTTPS host nor a scheme. Such a URI
    /// can only come from a misconstructed authorization URL, so there is no
    /// runtime path to recover from it.
    pub fn for_redirect_uri(redirect_uri: &str) -> Self {
        match Self::try_for_redirect_uri(redirect_uri) {
            Ok(pattern) => pattern,
            Err(err) => panic!("invalid OIDC redirect URI: {err}"),
        }
    }

    /// Fallible variant of [`CallbackPattern::for_redirect_uri`].
    pub fn try_for_redirect_uri(redirect_uri: &str) -> Result<Self, RedirectUriError> {
        match Url::parse(redirect_uri) {
            Ok(url) => Self::try_from_url(&url),
            Err(url::ParseError::EmptyHost) => {
                Err(RedirectUriError::MissingHost(redirect_uri.to_owned()))
            }
            Err(_) => Err(RedirectUriError::MissingScheme(redirect_uri.to_owned())),
        }
    }

    fn try_from_url(url: &Url) -> Result<Self, RedirectUriError> {
        if url.scheme() == "https" {
            let host = url
                .host_str()
                .filter(|host| !host.is_empty())
                .ok_or_else(|| RedirectUriError::MissingHost(url.to_string()))?;
            let path = match url.path() {
                "" => "/",
                path => path,
            };
            return Ok(CallbackPattern::Https {
                host: host.to_owned(),
                path: path.to_owned(),
            });
        }
        Ok(CallbackPattern::CustomScheme(url.scheme().to_owned()))
    }

    /// Whether a redirect observed by the browser completes a session waiting on this pattern.
    pub fn matches(&self, url: &Url) -> bool {
        match self {
            CallbackPattern::Https { host, path } => {
                url.scheme() == "https"
                    && url.host_str() == Some(host.as_str())
                    && url.path() == path
            }
            CallbackPattern::CustomScheme(scheme) => url.scheme().eq_ignore_ascii_case(scheme),
        }
    }
}

/// Redirect URI carried by an authorization URL's `redirect_uri` query parameter.
pub fn redirect_uri_from_authorization_url(authorization_url: &Url) -> Option<String> {
    authorization_url
        .query_pairs()
        .find(|(key, _)| key == "redirect_uri")
        .map(|(_, value)| value.into_owned())
}
