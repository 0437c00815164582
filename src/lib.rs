use std::{ffi::OsString, io, time::Duration};

use clap::Parser;
use thiserror::Error;

pub mod color;
pub mod downloader;
pub mod httpx;
pub mod logging;
pub mod pb;
pub mod urlinfo;

use httpx::RedirectPolicy;

#[macro_export]
macro_rules! hash_map {
    {$($k: expr => $v: expr),* $(,)?} => {
        std::collections::HashMap::from([$(($k, $v),)*])
    };
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid url {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("invalid url {0:?}: no host")]
    MissingHost(String),

    #[error("unsupported protocol scheme {0:?}")]
    UnsupportedScheme(String),

    #[error("could not resolve host {0}")]
    Resolve(String),

    #[error("tls: {0}")]
    Tls(#[from] native_tls::Error),

    #[error("tls handshake with {domain} failed: {reason}")]
    Handshake { domain: String, reason: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Non-200 status; the message is the human readable status text.
    #[error("{text}")]
    Status { code: u16, text: String },

    #[error("stopped after {0} redirects")]
    TooManyRedirects(u8),

    #[error("server returned {0} but no location header was found")]
    MissingLocation(u16),

    #[error("create {path}: {source}")]
    CreateFile {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid progress template: {0}")]
    Template(#[from] indicatif::style::TemplateError),

    #[error(transparent)]
    Http(#[from] http::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarStyle {
    /// Hand-drawn ANSI bar redrawn with a carriage return
    Classic,
    /// The same gauge drawn by indicatif
    Fancy,
}

#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct Config {
    #[clap(
        short,
        long,
        value_parser,
        value_name = "URL",
        default_value = "",
        help = "Absolute URL of the file to download (also accepted as -image)"
    )]
    pub image: String,

    #[clap(
        short,
        long,
        value_parser,
        help = "User-Agent header to be used by the HTTP client"
    )]
    pub user_agent: Option<String>,

    #[clap(
        short = 'T',
        long,
        value_parser,
        help = "TCP connection/read/write timeout in seconds (default: wait forever)"
    )]
    pub timeout: Option<u64>,

    #[clap(short = 'r', long, value_parser, action, help = "Do not follow redirects")]
    pub no_redirect: bool,

    #[clap(
        short,
        long,
        value_parser,
        default_value_t = 200,
        help = "Pause in milliseconds after each redraw of the classic bar"
    )]
    pub delay_ms: u64,

    #[clap(short, long, value_enum, default_value = "classic")]
    pub style: BarStyle,

    #[clap(short, long, value_parser, action, help = "Print debug logs to stderr")]
    pub verbose: bool,
}

impl Config {
    pub fn build() -> Result<Config> {
        Config::parse_from(normalize_args(std::env::args_os())).validated()
    }

    pub fn build_from<I, T>(args: I) -> Result<Config>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString>,
    {
        Config::try_parse_from(normalize_args(args))
            .map_err(|err| Error::Config(err.to_string()))?
            .validated()
    }

    fn validated(self) -> Result<Config> {
        if self.timeout == Some(0) {
            return Err(Error::Config("timeout must be at least 1 second".into()));
        }

        Ok(self)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_secs)
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn redirect_policy(&self) -> RedirectPolicy {
        if self.no_redirect {
            RedirectPolicy::None
        } else {
            RedirectPolicy::default()
        }
    }
}

/// Go-style `-image` is rewritten to `--image` so clap can parse it.
fn normalize_args<I, T>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    args.into_iter()
        .map(Into::into)
        .map(|arg| match arg.to_str() {
            Some("-image") => OsString::from("--image"),
            Some(s) if s.starts_with("-image=") => OsString::from(format!("-{}", s)),
            _ => arg,
        })
        .collect()
}
