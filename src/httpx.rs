use std::{
    cmp, fmt,
    io::{self, BufRead, BufReader, Read, Write},
    net::{SocketAddr, TcpStream, ToSocketAddrs},
    time::Duration,
};

use http::{
    header::{self, HeaderName, HeaderValue},
    request::Builder,
    HeaderMap, Method, Request, Response, StatusCode,
};
use native_tls::TlsConnector;

use crate::{hash_map, urlinfo::UrlInfo, Error, Result};

pub trait ReadWrite: Read + Write {}

impl<T: Read + Write> ReadWrite for T {}

/// Read half of an open connection; dropping it closes the socket.
pub struct ToRead(Box<dyn ReadWrite>);

impl Read for ToRead {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

pub type HttpResponse = Response<HttpBody>;

pub const DEFAULT_USER_AGENT: &str = concat!("imget/", env!("CARGO_PKG_VERSION"));
pub const DEFAULT_MAX_REDIRECTS: u8 = 10;

#[derive(Debug, Clone, Copy)]
pub enum RedirectPolicy {
    Follow(u8), // maximum number of redirects
    None,       // do not follow redirects
}

impl Default for RedirectPolicy {
    fn default() -> Self {
        RedirectPolicy::Follow(DEFAULT_MAX_REDIRECTS)
    }
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    redirect_policy: RedirectPolicy,
    timeout: Option<Duration>,
    user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        HttpConfig {
            redirect_policy: RedirectPolicy::default(),
            timeout: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// One-time http client
pub struct HttpClient {
    url: UrlInfo,
    rw: Option<Box<dyn ReadWrite>>,
    cfg: HttpConfig,
}

impl HttpClient {
    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::new()
    }

    pub fn connect(url: &UrlInfo, cfg: &HttpConfig) -> Result<Self> {
        if !url.is_http() {
            return Err(Error::UnsupportedScheme(url.scheme.clone()));
        }

        Ok(Self {
            url: url.clone(),
            rw: Some(open_conn(
                &url.host_addr(),
                &url.domain,
                url.is_tls(),
                cfg.timeout,
            )?),
            cfg: cfg.clone(),
        })
    }

    /// Sends a GET request and follows redirects according to the configured policy.
    /// The client is consumed; every hop opens its own connection.
    ///
    /// The final URL is attached to the response as a `UrlInfo` extension.
    pub fn get(self) -> Result<HttpResponse> {
        let cfg = self.cfg.clone();
        let mut url = self.url.clone();
        let mut resp = self.get_once()?;

        let max = match cfg.redirect_policy {
            RedirectPolicy::Follow(max) => max,
            RedirectPolicy::None => return Ok(resp),
        };

        let mut hops = 0u8;
        while is_redirect(resp.status()) {
            if hops == max {
                return Err(Error::TooManyRedirects(max));
            }

            let status = resp.status().as_u16();
            let location = resp
                .headers()
                .get(header::LOCATION)
                .ok_or(Error::MissingLocation(status))?
                .to_str()
                .map_err(|_| Error::InvalidResponse("non-ascii location header".into()))?;

            url = url.join(location)?;
            log::info!("{} redirecting to: {}", status, url.as_str());

            // release the previous connection before dialing the next one
            drop(resp);
            resp = HttpClient::connect(&url, &cfg)?.get_once()?;
            hops += 1;
        }

        Ok(resp)
    }

    fn get_once(mut self) -> Result<HttpResponse> {
        let req = self.make_request(Method::GET).body(())?;
        self.send_request(&req)
    }

    fn make_request(&self, method: Method) -> Builder {
        let mut builder = Request::builder()
            .method(method)
            .uri(self.url.path.as_str())
            .header(header::HOST, self.url.host_header())
            .header(header::USER_AGENT, self.cfg.user_agent.as_str());

        let default_headers = hash_map!(
            "Accept" => "*/*",
            "Accept-Encoding" => "identity",
            "Connection" => "close"
        );

        for (key, val) in default_headers.iter() {
            builder = builder.header(*key, *val);
        }

        builder
    }

    fn send_request(&mut self, req: &Request<()>) -> Result<HttpResponse> {
        let mut data = format!("{} {} HTTP/1.1\r\n", req.method(), req.uri()).into_bytes();
        for (key, val) in req.headers().iter() {
            data.extend_from_slice(key.as_str().as_bytes());
            data.extend_from_slice(b": ");
            data.extend_from_slice(val.as_bytes());
            data.extend_from_slice(b"\r\n");
        }
        // end of headers
        data.extend_from_slice(b"\r\n");

        let mut rw = self
            .rw
            .take()
            .ok_or_else(|| Error::InvalidResponse("connection already used".into()))?;
        rw.write_all(&data)?;
        rw.flush()?;
        log::info!("HTTP request sent, awaiting response...");

        make_response(&self.url, BufReader::new(ToRead(rw)))
    }
}

pub struct HttpClientBuilder {
    url: Option<UrlInfo>,
    cfg: HttpConfig,
}

impl HttpClientBuilder {
    pub fn new() -> HttpClientBuilder {
        HttpClientBuilder {
            url: None,
            cfg: HttpConfig::default(),
        }
    }

    pub fn from_url_info(mut self, urlinfo: &UrlInfo) -> HttpClientBuilder {
        self.url = Some(urlinfo.clone());
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> HttpClientBuilder {
        self.cfg.timeout = timeout;
        self
    }

    pub fn with_redirect_policy(mut self, policy: RedirectPolicy) -> HttpClientBuilder {
        self.cfg.redirect_policy = policy;
        self
    }

    pub fn with_user_agent(mut self, user_agent: &str) -> HttpClientBuilder {
        self.cfg.user_agent.clear();
        self.cfg.user_agent.push_str(user_agent);
        self
    }

    pub fn build(self) -> Result<HttpClient> {
        let url = self
            .url
            .ok_or_else(|| Error::Config("no url specified".into()))?;

        HttpClient::connect(&url, &self.cfg)
    }
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        HttpClientBuilder::new()
    }
}

fn is_redirect(status: StatusCode) -> bool {
    matches!(status.as_u16(), 301 | 302 | 303 | 307 | 308)
}

/// Final URL of a response produced by `HttpClient::get`.
pub fn response_url(resp: &HttpResponse) -> Option<&UrlInfo> {
    resp.extensions().get::<UrlInfo>()
}

fn make_response(url: &UrlInfo, mut br: BufReader<ToRead>) -> Result<HttpResponse> {
    let mut status = read_status(&mut br)?;

    // interim responses (100 Continue, 103 Early Hints) precede the real one
    while status.is_informational() && status != StatusCode::SWITCHING_PROTOCOLS {
        log::debug!("skipping interim response {}", status.as_u16());
        for pair in HeaderIterator::from(&mut br) {
            pair?;
        }
        status = read_status(&mut br)?;
    }

    let mut builder = Response::builder().status(status);
    for pair in HeaderIterator::from(&mut br) {
        let (key, val) = pair?;
        builder = builder.header(key, val);
    }

    let headers = builder
        .headers_ref()
        .cloned()
        .ok_or_else(|| Error::InvalidResponse("malformed response header".into()))?;
    let body = HttpBody::frame(status, &headers, br)?;

    Ok(builder.extension(url.clone()).body(body)?)
}

fn read_status<R: BufRead>(br: &mut R) -> Result<StatusCode> {
    let mut raw = Vec::new();
    if br.read_until(b'\n', &mut raw)? == 0 {
        return Err(Error::InvalidResponse(
            "server closed connection without a response".into(),
        ));
    }

    let first_line = String::from_utf8_lossy(&raw);
    let mut parts = first_line.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(version), Some(code)) if version.starts_with("HTTP/") => {
            StatusCode::from_bytes(code.as_bytes()).map_err(|_| {
                Error::InvalidResponse(format!("invalid status code {:?}", code))
            })
        }
        _ => Err(Error::InvalidResponse(format!(
            "malformed status line {:?}",
            first_line.trim_end()
        ))),
    }
}

/// Header lines are raw bytes; values may carry obs-text (non-UTF-8).
struct HeaderIterator<'a, R> {
    br: &'a mut R,
    buf: Vec<u8>,
}

impl<'a, R: BufRead> HeaderIterator<'a, R> {
    fn from(br: &'a mut R) -> HeaderIterator<'a, R> {
        HeaderIterator {
            br,
            buf: Vec::new(),
        }
    }
}

impl<R: BufRead> Iterator for HeaderIterator<'_, R> {
    type Item = Result<(HeaderName, HeaderValue)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.buf.clear();

            if let Err(err) = self.br.read_until(b'\n', &mut self.buf) {
                return Some(Err(err.into()));
            }

            let line = trim_bytes(&self.buf);
            // blank line (or eof) ends the header block
            if line.is_empty() {
                return None;
            }

            if let Some(pair) = parse_header(line) {
                return Some(Ok(pair));
            }
            log::debug!(
                "skipping malformed header line {:?}",
                String::from_utf8_lossy(line)
            );
        }
    }
}

fn trim_bytes(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |pos| pos + 1);
    &bytes[start..end]
}

fn parse_header(line: &[u8]) -> Option<(HeaderName, HeaderValue)> {
    let pos = line.iter().position(|b| *b == b':')?;
    let name = HeaderName::from_bytes(trim_bytes(&line[..pos])).ok()?;
    let value = HeaderValue::from_bytes(trim_bytes(&line[pos + 1..])).ok()?;
    Some((name, value))
}

/// Response body, framed according to the response headers.
pub enum HttpBody {
    Empty,
    Fixed(FixedReader<BufReader<ToRead>>),
    Chunked(ChunkedReader<BufReader<ToRead>>),
    UntilClose(BufReader<ToRead>),
}

impl HttpBody {
    fn frame(status: StatusCode, headers: &HeaderMap, br: BufReader<ToRead>) -> Result<HttpBody> {
        if status.is_informational()
            || status == StatusCode::NO_CONTENT
            || status == StatusCode::NOT_MODIFIED
        {
            return Ok(HttpBody::Empty);
        }

        let chunked = headers
            .get(header::TRANSFER_ENCODING)
            .and_then(|val| val.to_str().ok())
            .map(|val| val.to_ascii_lowercase().contains("chunked"))
            .unwrap_or(false);
        if chunked {
            return Ok(HttpBody::Chunked(ChunkedReader::new(br)));
        }

        Ok(match content_length(headers)? {
            Some(len) => HttpBody::Fixed(FixedReader::new(br, len)),
            None => HttpBody::UntilClose(br),
        })
    }

    /// Number of bytes the server declared, if it declared any.
    pub fn expected_len(&self) -> Option<u64> {
        match self {
            HttpBody::Empty => Some(0),
            HttpBody::Fixed(r) => Some(r.declared_len()),
            HttpBody::Chunked(_) | HttpBody::UntilClose(_) => None,
        }
    }
}

impl Read for HttpBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            HttpBody::Empty => Ok(0),
            HttpBody::Fixed(r) => r.read(buf),
            HttpBody::Chunked(r) => r.read(buf),
            HttpBody::UntilClose(r) => r.read(buf),
        }
    }
}

impl fmt::Debug for HttpBody {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            HttpBody::Empty => write!(f, "HttpBody::Empty"),
            HttpBody::Fixed(r) => write!(f, "HttpBody::Fixed({})", r.declared_len()),
            HttpBody::Chunked(_) => write!(f, "HttpBody::Chunked"),
            HttpBody::UntilClose(_) => write!(f, "HttpBody::UntilClose"),
        }
    }
}

pub fn content_length(headers: &HeaderMap) -> Result<Option<u64>> {
    match headers.get(header::CONTENT_LENGTH) {
        None => Ok(None),
        Some(val) => val
            .to_str()
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Some)
            .ok_or_else(|| Error::InvalidResponse(format!("bad content-length {:?}", val))),
    }
}

/// Body with a declared length; running out early is an error.
pub struct FixedReader<R> {
    inner: R,
    len: u64,
    remaining: u64,
}

impl<R: Read> FixedReader<R> {
    pub fn new(inner: R, len: u64) -> Self {
        FixedReader {
            inner,
            len,
            remaining: len,
        }
    }

    pub fn declared_len(&self) -> u64 {
        self.len
    }
}

impl<R: Read> Read for FixedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }

        let max = cmp::min(buf.len() as u64, self.remaining) as usize;
        let n = self.inner.read(&mut buf[..max])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("body ended {} bytes short", self.remaining),
            ));
        }

        self.remaining -= n as u64;
        Ok(n)
    }
}

/// Decoder for `Transfer-Encoding: chunked` bodies.
pub struct ChunkedReader<R> {
    inner: R,
    remaining: u64,
    done: bool,
}

impl<R: BufRead> ChunkedReader<R> {
    pub fn new(inner: R) -> Self {
        ChunkedReader {
            inner,
            remaining: 0,
            done: false,
        }
    }

    fn read_line(&mut self) -> io::Result<Vec<u8>> {
        let mut line = Vec::new();
        if self.inner.read_until(b'\n', &mut line)? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "chunked body ended early",
            ));
        }
        Ok(line)
    }

    fn next_chunk_size(&mut self) -> io::Result<u64> {
        let line = self.read_line()?;
        let line = String::from_utf8_lossy(trim_bytes(&line));
        // chunk extensions after ';' are ignored
        let size = line.split(';').next().unwrap_or_default().trim();
        u64::from_str_radix(size, 16).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid chunk size {:?}", size),
            )
        })
    }

    fn expect_crlf(&mut self) -> io::Result<()> {
        let line = self.read_line()?;
        if !trim_bytes(&line).is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "missing CRLF after chunk data",
            ));
        }
        Ok(())
    }

    fn skip_trailers(&mut self) -> io::Result<()> {
        while !trim_bytes(&self.read_line()?).is_empty() {}
        Ok(())
    }
}

impl<R: BufRead> Read for ChunkedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.done || buf.is_empty() {
            return Ok(0);
        }

        if self.remaining == 0 {
            self.remaining = self.next_chunk_size()?;
            if self.remaining == 0 {
                self.skip_trailers()?;
                self.done = true;
                return Ok(0);
            }
        }

        let max = cmp::min(buf.len() as u64, self.remaining) as usize;
        let n = self.inner.read(&mut buf[..max])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "chunked body ended early",
            ));
        }

        self.remaining -= n as u64;
        if self.remaining == 0 {
            self.expect_crlf()?;
        }
        Ok(n)
    }
}

pub fn resolve_addr(addr: &str) -> Result<SocketAddr> {
    log::info!("Resolving {}...", addr);
    let sock_addrs: Vec<SocketAddr> = addr
        .to_socket_addrs()
        .map_err(|err| Error::Resolve(format!("{}: {}", addr, err)))?
        .collect();

    // try to use ipv4 address if available
    sock_addrs
        .iter()
        .find(|ip| ip.is_ipv4())
        .or_else(|| sock_addrs.first())
        .copied()
        .ok_or_else(|| Error::Resolve(addr.to_string()))
}

fn open_conn(
    host_addr: &str,
    domain: &str,
    tls: bool,
    timeout: Option<Duration>,
) -> Result<Box<dyn ReadWrite>> {
    let sock_addr = resolve_addr(host_addr)?;
    log::info!("Connecting to {}|{}...", domain, sock_addr);

    let stream = match timeout {
        Some(duration) => TcpStream::connect_timeout(&sock_addr, duration)?,
        None => TcpStream::connect(sock_addr)?,
    };
    stream.set_read_timeout(timeout)?;
    stream.set_write_timeout(timeout)?;

    if tls {
        let tls_conn = TlsConnector::new()?;
        let stream = tls_conn
            .connect(domain, stream)
            .map_err(|err| Error::Handshake {
                domain: domain.to_string(),
                reason: err.to_string(),
            })?;
        Ok(Box::new(stream))
    } else {
        Ok(Box::new(stream))
    }
}
