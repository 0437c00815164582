use crate::{
    httpx::{response_url, HttpClient, HttpClientBuilder},
    urlinfo::UrlInfo,
    Config, Error, Result,
};
use http::StatusCode;

use std::{
    fs::File,
    io::{self, BufWriter, Read, Write},
    path::{Path, PathBuf},
};

/// Receives download events; implementations never fail the download.
pub trait DownloadObserver {
    fn on_download_start(&mut self, total: Option<u64>);
    fn on_progress(&mut self, len: u64);
    fn on_download_end(&mut self);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    pub path: PathBuf,
    pub bytes: u64,
    pub url: String,
}

pub fn format_byte_length(len: u64) -> String {
    let units = ["B", "kB", "MB", "GB", "TB"];

    let mut value = len as f64;
    let mut unit_index = 0;

    while value >= 1024.0 && unit_index < units.len() - 1 {
        value /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", len, units[0])
    } else {
        format!("{:.1} {}", value, units[unit_index])
    }
}

/// Reader that reports the length of every chunk it hands out.
pub struct TeeReader<'a, R, O: ?Sized> {
    inner: R,
    ob: &'a mut O,
}

impl<'a, R: Read, O: DownloadObserver + ?Sized> TeeReader<'a, R, O> {
    pub fn new(inner: R, ob: &'a mut O) -> Self {
        TeeReader { inner, ob }
    }
}

impl<R: Read, O: DownloadObserver + ?Sized> Read for TeeReader<'_, R, O> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.ob.on_progress(n as u64);
        }
        Ok(n)
    }
}

/// Copies `reader` into `writer`, reporting each chunk to `ob`.
/// Only the read or write side can fail the copy.
pub fn copy_with_progress<R, W, O>(reader: R, writer: &mut W, ob: &mut O) -> io::Result<u64>
where
    R: Read,
    W: Write + ?Sized,
    O: DownloadObserver + ?Sized,
{
    io::copy(&mut TeeReader::new(reader, ob), writer)
}

/// Local file for `url`: its last path segment, used verbatim.
pub fn output_path(dest_dir: &Path, url: &UrlInfo) -> PathBuf {
    dest_dir.join(&url.fname)
}

pub fn status_text(status: StatusCode) -> String {
    let text = status.canonical_reason().or(match status.as_u16() {
        103 => Some("Early Hints"),
        425 => Some("Too Early"),
        _ => None,
    });

    text.map(str::to_string)
        .unwrap_or_else(|| format!("unexpected status {}", status.as_u16()))
}

pub fn client_builder(cfg: &Config) -> HttpClientBuilder {
    let builder = HttpClient::builder()
        .with_timeout(cfg.timeout())
        .with_redirect_policy(cfg.redirect_policy());

    match &cfg.user_agent {
        Some(user_agent) => builder.with_user_agent(user_agent),
        None => builder,
    }
}

/// GETs `url` and streams the body into `dest_dir`, named after the final
/// (post-redirect) URL. The status is checked before any file is created.
pub fn fetch<T: DownloadObserver + ?Sized>(
    client: HttpClientBuilder,
    url: &UrlInfo,
    dest_dir: &Path,
    ob: &mut T,
) -> Result<Download> {
    let resp = client.from_url_info(url).build()?.get()?;

    let status = resp.status();
    log::info!(
        "{} {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or_default()
    );
    if status != StatusCode::OK {
        return Err(Error::Status {
            code: status.as_u16(),
            text: status_text(status),
        });
    }

    let final_url = response_url(&resp).cloned().unwrap_or_else(|| url.clone());
    let total = resp.body().expected_len();
    match total {
        Some(len) => log::info!("Length: {} ({})", len, format_byte_length(len)),
        None => log::info!("Length: unspecified"),
    }

    let path = output_path(dest_dir, &final_url);
    log::info!("Saving to: '{}'", path.display());
    let file = File::create(&path).map_err(|source| Error::CreateFile {
        path: path.display().to_string(),
        source,
    })?;
    let mut w = BufWriter::new(file);

    ob.on_download_start(total);
    let copied = copy_with_progress(resp.into_body(), &mut w, ob);
    ob.on_download_end();

    let bytes = copied?;
    w.flush()?;
    log::debug!("wrote {} bytes to {}", bytes, path.display());

    Ok(Download {
        path,
        bytes,
        url: final_url.as_str().to_string(),
    })
}

pub fn run<T: DownloadObserver + ?Sized>(cfg: &Config, ob: &mut T) -> Result<Download> {
    let url = UrlInfo::parse(&cfg.image)?;
    log::info!("Downloading file at {}...", url.as_str());

    fetch(client_builder(cfg), &url, Path::new("."), ob)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp;

    #[derive(Default)]
    struct Recorder {
        started: Option<Option<u64>>,
        chunks: Vec<u64>,
        ended: bool,
    }

    impl DownloadObserver for Recorder {
        fn on_download_start(&mut self, total: Option<u64>) {
            self.started = Some(total);
        }

        fn on_progress(&mut self, len: u64) {
            self.chunks.push(len);
        }

        fn on_download_end(&mut self) {
            self.ended = true;
        }
    }

    /// Hands out at most `chunk` bytes per read.
    struct Chunky {
        data: Vec<u8>,
        pos: usize,
        chunk: usize,
    }

    impl Read for Chunky {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = cmp::min(cmp::min(self.chunk, buf.len()), self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    /// Accepts `limit` bytes, then fails.
    struct FullDisk {
        written: usize,
        limit: usize,
    }

    impl Write for FullDisk {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.written + buf.len() > self.limit {
                return Err(io::Error::new(io::ErrorKind::Other, "no space left"));
            }
            self.written += buf.len();
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_format_byte_length() {
        assert_eq!("0 B", format_byte_length(0));
        assert_eq!("1000 B", format_byte_length(1000));
        assert_eq!("1.5 kB", format_byte_length(1536));
        assert_eq!("243.0 MB", format_byte_length(243 * 1024 * 1024));
    }

    #[test]
    fn test_copy_reports_every_chunk() {
        let data: Vec<u8> = (0..1000).map(|i| (i % 251) as u8).collect();
        let reader = Chunky {
            data: data.clone(),
            pos: 0,
            chunk: 100,
        };
        let mut out = io::Cursor::new(Vec::new());
        let mut rec = Recorder::default();

        let copied = copy_with_progress(reader, &mut out, &mut rec).unwrap();

        assert_eq!(1000, copied);
        assert_eq!(data, out.into_inner());
        assert_eq!(vec![100; 10], rec.chunks);
    }

    #[test]
    fn test_copy_total_independent_of_chunking() {
        let data = vec![7u8; 12345];
        for chunk in [1, 7, 512, 8192, 100_000] {
            let reader = Chunky {
                data: data.clone(),
                pos: 0,
                chunk,
            };
            let mut printer = crate::pb::ProgressPrinter::new(io::sink(), std::time::Duration::ZERO);
            printer.on_download_start(Some(data.len() as u64));

            let copied = copy_with_progress(reader, &mut io::sink(), &mut printer).unwrap();

            assert_eq!(12345, copied);
            assert_eq!(12345, printer.tracker().downloaded());
        }
    }

    #[test]
    fn test_copy_stops_on_write_error() {
        let reader = Chunky {
            data: vec![1u8; 1000],
            pos: 0,
            chunk: 100,
        };
        let mut disk = FullDisk {
            written: 0,
            limit: 250,
        };
        let mut rec = Recorder::default();

        let err = copy_with_progress(reader, &mut disk, &mut rec).unwrap_err();

        assert_eq!("no space left", err.to_string());
        assert_eq!(200, disk.written);
        assert!(rec.chunks.len() < 10);
    }

    #[test]
    fn test_output_path() {
        let url = UrlInfo::parse("https://example.com/images/cat.png").unwrap();
        assert_eq!(
            PathBuf::from("/tmp/out/cat.png"),
            output_path(Path::new("/tmp/out"), &url)
        );

        let url = UrlInfo::parse("https://example.com/a/b/file.jpg?x=1").unwrap();
        assert_eq!(PathBuf::from("./file.jpg"), output_path(Path::new("."), &url));
    }

    #[test]
    fn test_status_text() {
        assert_eq!("Not Found", status_text(StatusCode::NOT_FOUND));
        assert_eq!("Internal Server Error", status_text(StatusCode::INTERNAL_SERVER_ERROR));
        assert_eq!("Early Hints", status_text(StatusCode::from_u16(103).unwrap()));
        assert_eq!("Too Early", status_text(StatusCode::from_u16(425).unwrap()));
        assert_eq!(
            "unexpected status 599",
            status_text(StatusCode::from_u16(599).unwrap())
        );
    }

    #[test]
    fn test_invalid_url_fails_before_network() {
        let cfg = Config::build_from(["imget", "-image", "not a url"]).unwrap();
        let mut rec = Recorder::default();

        let err = run(&cfg, &mut rec).unwrap_err();

        assert!(matches!(err, Error::InvalidUrl { .. }));
        assert_eq!(None, rec.started);
        assert!(!rec.ended);
    }
}
