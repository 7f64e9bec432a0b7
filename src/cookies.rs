//! Seeds the shared cookie jar from browser exports.
//!
//! Some providers only serve full content to a logged-in session. Users export
//! the session from their browser as a Netscape cookie file (one per provider,
//! named after the provider id, e.g. `pixiv-cookies.txt`) and point
//! `network.cookie_dir` at the directory holding them.

use reqwest::Url;
use reqwest::cookie::Jar;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::SystemTime;
use thiserror::Error;

/// Errors that can occur while loading cookies.
#[derive(Error, Debug)]
pub enum CookieError {
    #[error("Failed to read cookie file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid Netscape cookie line: {0}")]
    InvalidLine(String),

    #[error("Invalid cookie domain: {0}")]
    InvalidDomain(String),
}

/// One entry of a Netscape cookie file.
#[derive(Debug, Clone, PartialEq, Eq)]
struct NetscapeCookie {
    domain: String,
    include_subdomains: bool,
    path: String,
    secure: bool,
    name: String,
    value: String,
    http_only: bool,
}

impl FromStr for NetscapeCookie {
    type Err = CookieError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let (http_only, line) = match line.strip_prefix("#HttpOnly_") {
            Some(rest) => (true, rest),
            None => (false, line),
        };

        let fields: Vec<&str> = line.splitn(7, '\t').collect();
        let [domain, subdomains, path, secure, _expires, name, value] = fields[..] else {
            return Err(CookieError::InvalidLine(line.to_string()));
        };

        Ok(Self {
            domain: domain.to_string(),
            include_subdomains: subdomains.eq_ignore_ascii_case("true"),
            path: path.to_string(),
            secure: secure.eq_ignore_ascii_case("true"),
            name: name.to_string(),
            value: value.to_string(),
            http_only,
        })
    }
}

impl NetscapeCookie {
    /// Origin the cookie is registered against.
    fn origin(&self) -> Result<Url, CookieError> {
        let host = self.domain.trim_start_matches('.');
        if host.is_empty() {
            return Err(CookieError::InvalidDomain(self.domain.clone()));
        }
        Url::parse(&format!("https://{}/", host))
            .map_err(|_| CookieError::InvalidDomain(self.domain.clone()))
    }

    /// Renders the cookie as a `Set-Cookie` header value.
    fn to_set_cookie(&self) -> String {
        let mut header = format!("{}={}; Path={}", self.name, self.value, self.path);
        if self.include_subdomains {
            header.push_str(&format!("; Domain={}", self.domain));
        }
        if self.secure {
            header.push_str("; Secure");
        }
        if self.http_only {
            header.push_str("; HttpOnly");
        }
        header
    }
}

fn parse_cookie_file(path: &Path) -> Result<Vec<NetscapeCookie>, CookieError> {
    std::fs::read_to_string(path)?
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !line.starts_with('#') || line.starts_with("#HttpOnly_"))
        .map(str::parse::<NetscapeCookie>)
        .collect()
}

/// Finds the most recently modified `.txt` file under `dir` whose name mentions `token`.
fn newest_file_for(dir: &Path, token: &str) -> Result<Option<PathBuf>, std::io::Error> {
    let token = token.to_ascii_lowercase();
    let mut best: Option<(PathBuf, SystemTime)> = None;

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            if let Some(found) = newest_file_for(&path, &token)? {
                let modified = std::fs::metadata(&found)?
                    .modified()
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                if best.as_ref().is_none_or(|(_, t)| modified > *t) {
                    best = Some((found, modified));
                }
            }
            continue;
        }

        let Some(name) = path.file_name().and_then(OsStr::to_str) else {
            continue;
        };
        let name = name.to_ascii_lowercase();
        if !name.ends_with(".txt") || !name.contains(&token) {
            continue;
        }

        let modified = entry
            .metadata()
            .and_then(|meta| meta.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        if best.as_ref().is_none_or(|(_, t)| modified > *t) {
            best = Some((path, modified));
        }
    }

    Ok(best.map(|(path, _)| path))
}

/// Loads the newest cookie file for each provider id into `jar`.
///
/// Returns the files that were loaded. Providers without a cookie file are
/// skipped, and so are unreadable or malformed files; only a cookie directory
/// that cannot be listed is an error.
pub fn seed_jar(jar: &Jar, dir: &Path, provider_ids: &[&str]) -> Result<Vec<PathBuf>, CookieError> {
    let mut loaded = Vec::new();

    for id in provider_ids {
        let Some(path) = newest_file_for(dir, id)? else {
            tracing::debug!(provider = %id, "No cookie file found");
            continue;
        };

        let cookies = match parse_cookie_file(&path) {
            Ok(cookies) => cookies,
            Err(e) => {
                tracing::warn!(provider = %id, file = %path.display(), "Skipping cookie file: {}", e);
                continue;
            }
        };

        let mut count = 0;
        for cookie in &cookies {
            match cookie.origin() {
                Ok(origin) => {
                    jar.add_cookie_str(&cookie.to_set_cookie(), &origin);
                    count += 1;
                }
                Err(e) => tracing::warn!(provider = %id, "Skipping cookie {}: {}", cookie.name, e),
            }
        }
        tracing::info!(provider = %id, file = %path.display(), count, "Loaded cookies");
        loaded.push(path);
    }

    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::cookie::CookieStore;
    use tempfile::TempDir;

    const PIXIV_EXPORT: &str = "
# Netscape HTTP Cookie File
.pixiv.net\tTRUE\t/\tTRUE\t2145916800\tPHPSESSID\tabc123
#HttpOnly_.pixiv.net\tFALSE\t/\tFALSE\t0\tp_ab_id\tidvalue
";

    #[test]
    fn test_parse_cookie_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pixiv-cookies.txt");
        std::fs::write(&path, PIXIV_EXPORT).unwrap();

        let cookies = parse_cookie_file(&path).unwrap();
        assert_eq!(cookies.len(), 2);
        assert_eq!(cookies[0].name, "PHPSESSID");
        assert!(cookies[0].include_subdomains);
        assert!(cookies[0].secure);
        assert!(!cookies[0].http_only);
        assert_eq!(cookies[1].name, "p_ab_id");
        assert!(cookies[1].http_only);
        assert!(!cookies[1].secure);
    }

    #[test]
    fn test_invalid_line_is_rejected() {
        let err = "just-one-field".parse::<NetscapeCookie>().unwrap_err();
        assert!(err.to_string().contains("Invalid Netscape cookie line"));
    }

    #[test]
    fn test_set_cookie_rendering() {
        let cookie: NetscapeCookie = ".pixiv.net\tTRUE\t/\tTRUE\t0\tPHPSESSID\tabc"
            .parse()
            .unwrap();
        assert_eq!(
            cookie.to_set_cookie(),
            "PHPSESSID=abc; Path=/; Domain=.pixiv.net; Secure"
        );
        assert_eq!(cookie.origin().unwrap().as_str(), "https://pixiv.net/");
    }

    #[test]
    fn test_newest_file_wins() {
        let dir = TempDir::new().unwrap();
        let first = dir.path().join("pixiv-cookies.txt");
        let second = dir.path().join("pixiv-cookies-latest.txt");
        std::fs::write(&first, "").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        std::fs::write(&second, "").unwrap();

        assert_eq!(newest_file_for(dir.path(), "pixiv").unwrap(), Some(second));
        assert_eq!(newest_file_for(dir.path(), "kakuyomu").unwrap(), None);
    }

    #[test]
    fn test_seed_jar_loads_matching_provider_only() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("pixiv-cookies.txt"), PIXIV_EXPORT).unwrap();

        let jar = Jar::default();
        let loaded = seed_jar(&jar, dir.path(), &["syosetu", "pixiv"]).unwrap();
        assert_eq!(loaded.len(), 1);

        let url = Url::parse("https://www.pixiv.net/").unwrap();
        let header = jar.cookies(&url).unwrap();
        assert!(header.to_str().unwrap().contains("PHPSESSID=abc123"));
    }

    #[test]
    fn test_seed_jar_skips_malformed_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("kakuyomu-cookies.txt"), "not a cookie line\n").unwrap();
        std::fs::write(dir.path().join("pixiv-cookies.txt"), PIXIV_EXPORT).unwrap();

        let jar = Jar::default();
        let loaded = seed_jar(&jar, dir.path(), &["kakuyomu", "pixiv"]).unwrap();
        assert_eq!(loaded, [dir.path().join("pixiv-cookies.txt")]);

        let url = Url::parse("https://www.pixiv.net/").unwrap();
        assert!(jar.cookies(&url).is_some());
    }
}
