use url::Url;

use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlInfo {
    pub scheme: String,
    pub domain: String,
    pub port: u16,
    pub path: String,
    pub fname: String,
    url: Url,
}

impl UrlInfo {
    /// Parses an absolute URL; a scheme and a host are required.
    pub fn parse(url: &str) -> Result<UrlInfo> {
        let parsed = Url::parse(url).map_err(|source| Error::InvalidUrl {
            url: url.to_string(),
            source,
        })?;

        UrlInfo::from_url(parsed)
    }

    fn from_url(url: Url) -> Result<UrlInfo> {
        let domain = match url.host_str() {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => return Err(Error::MissingHost(url.to_string())),
        };

        let mut path = url.path().to_string();
        if let Some(query) = url.query() {
            path.push('?');
            path.push_str(query);
        }

        let fname = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .unwrap_or_default()
            .to_string();

        Ok(UrlInfo {
            scheme: url.scheme().to_string(),
            port: url.port_or_known_default().unwrap_or_default(),
            domain,
            path,
            fname,
            url,
        })
    }

    /// Resolves a redirect target, absolute or relative to this URL.
    pub fn join(&self, location: &str) -> Result<UrlInfo> {
        let next = self.url.join(location).map_err(|source| Error::InvalidUrl {
            url: location.to_string(),
            source,
        })?;

        UrlInfo::from_url(next)
    }

    pub fn host_addr(&self) -> String {
        format!("{}:{}", self.domain, self.port)
    }

    /// Value of the Host header; the port is omitted when it is the scheme default.
    pub fn host_header(&self) -> String {
        match self.url.port() {
            Some(port) => format!("{}:{}", self.domain, port),
            None => self.domain.clone(),
        }
    }

    pub fn is_tls(&self) -> bool {
        self.scheme == "https"
    }

    pub fn is_http(&self) -> bool {
        self.scheme == "http" || self.scheme == "https"
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_url() {
        let url = "https://download.virtualbox.org/virtualbox/7.0.8/VirtualBox-7.0.8_BETA4-156879-macOSArm64.dmg";
        let urlinfo = UrlInfo::parse(url).unwrap();

        assert_eq!("https", urlinfo.scheme.as_str());
        assert_eq!("download.virtualbox.org", urlinfo.domain.as_str());
        assert_eq!(
            "/virtualbox/7.0.8/VirtualBox-7.0.8_BETA4-156879-macOSArm64.dmg",
            urlinfo.path.as_str()
        );
        assert_eq!(
            "VirtualBox-7.0.8_BETA4-156879-macOSArm64.dmg",
            urlinfo.fname.as_str()
        );
        assert_eq!(true, urlinfo.is_tls());
        assert_eq!(443, urlinfo.port);
        assert_eq!("download.virtualbox.org:443", urlinfo.host_addr());
        assert_eq!("download.virtualbox.org", urlinfo.host_header());
    }

    #[test]
    fn test_parse_url_custom_port() {
        let url = "http://localhost:8080/download/GoTiengViet.dmg";
        let urlinfo = UrlInfo::parse(url).unwrap();

        assert_eq!("http", urlinfo.scheme.as_str());
        assert_eq!("localhost", urlinfo.domain.as_str());
        assert_eq!("/download/GoTiengViet.dmg", urlinfo.path.as_str());
        assert_eq!("GoTiengViet.dmg", urlinfo.fname.as_str());
        assert_eq!(false, urlinfo.is_tls());
        assert_eq!(8080, urlinfo.port);
        assert_eq!("localhost:8080", urlinfo.host_addr());
        assert_eq!("localhost:8080", urlinfo.host_header());
    }

    #[test]
    fn test_query_kept_in_path_not_in_fname() {
        let urlinfo = UrlInfo::parse("https://example.com/images/cat.png?size=large").unwrap();

        assert_eq!("/images/cat.png?size=large", urlinfo.path.as_str());
        assert_eq!("cat.png", urlinfo.fname.as_str());
    }

    #[test]
    fn test_fname_is_verbatim() {
        let urlinfo = UrlInfo::parse("https://example.com/my%20photo.jpg").unwrap();
        assert_eq!("my%20photo.jpg", urlinfo.fname.as_str());

        let urlinfo = UrlInfo::parse("https://example.com/images/").unwrap();
        assert_eq!("", urlinfo.fname.as_str());
    }

    #[test]
    fn test_reject_invalid() {
        assert!(matches!(
            UrlInfo::parse("not a url"),
            Err(Error::InvalidUrl { .. })
        ));
        assert!(matches!(UrlInfo::parse(""), Err(Error::InvalidUrl { .. })));
        assert!(matches!(
            UrlInfo::parse("/images/cat.png"),
            Err(Error::InvalidUrl { .. })
        ));
        assert!(matches!(
            UrlInfo::parse("mailto:someone@example.com"),
            Err(Error::MissingHost(_))
        ));
    }

    #[test]
    fn test_join_redirect() {
        let base = UrlInfo::parse("http://localhost:8080/a/b/old.bin").unwrap();

        let relative = base.join("../new/file.jpg").unwrap();
        assert_eq!("http://localhost:8080/a/new/file.jpg", relative.as_str());
        assert_eq!("file.jpg", relative.fname.as_str());

        let absolute = base.join("https://cdn.example.com/x/final.png").unwrap();
        assert_eq!("cdn.example.com", absolute.domain.as_str());
        assert_eq!(443, absolute.port);
        assert_eq!("final.png", absolute.fname.as_str());
    }
}
