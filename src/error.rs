// src/error.rs

use std::error::Error as StdError;
use std::fmt;

use url::Url;

/// A `Result` alias where the `Err` case is `http_spnego::Error`.
pub type Result<T> = std::result::Result<T, Error>;

/// The Errors that may occur while configuring or performing Negotiate
/// authentication.
///
/// Configuration and credential errors surface once, at startup. Negotiation
/// errors are per request and are turned into `401` challenges on the server
/// and into a failed exchange on the client.
pub struct Error {
    inner: Box<Inner>,
}

pub(crate) type BoxError = Box<dyn StdError + Send + Sync>;

struct Inner {
    kind: Kind,
    source: Option<BoxError>,
    uri: Option<Url>,
}

impl Error {
    pub(crate) fn new<E>(kind: Kind, source: Option<E>) -> Error
    where
        E: Into<BoxError>,
    {
        Error {
            inner: Box::new(Inner {
                kind,
                source: source.map(Into::into),
                uri: None,
            }),
        }
    }

    /// Returns a possible URI related to this error.
    pub fn uri(&self) -> Option<&Url> {
        self.inner.uri.as_ref()
    }

    /// Add a URI related to this error (overwriting any existing)
    pub fn with_uri(mut self, uri: Url) -> Self {
        self.inner.uri = Some(uri);
        self
    }

    /// Strip the related URI from this error (if, for example, it contains
    /// sensitive information)
    pub fn without_uri(mut self) -> Self {
        self.inner.uri = None;
        self
    }

    /// Returns true if the error comes from missing, contradictory or
    /// unreadable configuration.
    pub fn is_config(&self) -> bool {
        matches!(self.inner.kind, Kind::Config)
    }

    /// Returns true if the error comes from acquiring credentials (the login
    /// against a keytab or ticket cache).
    pub fn is_credential(&self) -> bool {
        matches!(self.inner.kind, Kind::Credential)
    }

    /// Returns true if a security context could not be established.
    pub fn is_negotiation(&self) -> bool {
        matches!(self.inner.kind, Kind::Negotiation)
    }

    /// Returns true if an authentication scheme name was not recognized.
    pub fn is_unsupported_scheme(&self) -> bool {
        matches!(self.inner.kind, Kind::UnsupportedScheme)
    }

    /// Returns true if the caller supplied transport failed to send a request.
    pub fn is_transport(&self) -> bool {
        matches!(self.inner.kind, Kind::Transport)
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut builder = f.debug_struct("http_spnego::Error");

        builder.field("kind", &self.inner.kind);

        if let Some(ref uri) = self.inner.uri {
            builder.field("uri", &uri.as_str());
        }

        if let Some(ref source) = self.inner.source {
            builder.field("source", source);
        }

        builder.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.inner.kind {
            Kind::Config => f.write_str("invalid security configuration")?,
            Kind::Credential => f.write_str("failed to acquire credentials")?,
            Kind::Negotiation => f.write_str("negotiation failed")?,
            Kind::UnsupportedScheme => f.write_str("unsupported authentication scheme")?,
            Kind::Transport => f.write_str("error sending request")?,
        }

        if let Some(uri) = &self.inner.uri {
            write!(f, " for uri ({})", uri.as_str())?;
        }

        if let Some(e) = &self.inner.source {
            write!(f, ": {e}")?;
        }

        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner.source.as_ref().map(|e| &**e as _)
    }
}

#[derive(Debug)]
pub(crate) enum Kind {
    Config,
    Credential,
    Negotiation,
    UnsupportedScheme,
    Transport,
}

// constructors

pub(crate) fn config<E: Into<BoxError>>(e: E) -> Error {
    Error::new(Kind::Config, Some(e))
}

pub(crate) fn credential<E: Into<BoxError>>(e: E) -> Error {
    Error::new(Kind::Credential, Some(e))
}

pub(crate) fn negotiation<E: Into<BoxError>>(e: E) -> Error {
    Error::new(Kind::Negotiation, Some(e))
}

pub(crate) fn unsupported_scheme<E: Into<BoxError>>(e: E) -> Error {
    Error::new(Kind::UnsupportedScheme, Some(e))
}

pub(crate) fn transport<E: Into<BoxError>>(e: E) -> Error {
    Error::new(Kind::Transport, Some(e))
}
