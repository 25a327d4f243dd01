//! Parsing of source/destination location strings: local paths, SCP-style
//! `[user@]host:path`, and `file://` / `ssh://` URLs.

use anyhow::{anyhow, bail, Result};
use libbtrsync::root::ssh::SshConfig;

macro_rules! once_regex {
    ($re:literal $(,)?) => {{
        static RE: once_cell::sync::OnceCell<regex::Regex> = once_cell::sync::OnceCell::new();
        RE.get_or_init(|| regex::Regex::new($re).unwrap())
    }};
}

/// SSH endpoint parameters parsed out of a location string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshLoc {
    pub user: Option<String>,
    pub host: String,
    pub port: Option<String>,
}

impl SshLoc {
    /// Parse the `[user@]host` form used by SCP-style locations.
    fn parse_ssh(locstr: &str) -> Self {
        let captures = once_regex!(r"^(?:([^@]*)@)?(.*)$")
            .captures(locstr)
            .expect("pattern matches any string");
        Self {
            user: captures.get(1).map(|m| m.as_str().to_string()),
            host: captures.get(2).map_or(String::new(), |m| m.as_str().to_string()),
            port: None,
        }
    }

    /// Parse a URL netloc: `[user@]host[:port]`, with IPv6 hosts in
    /// brackets.
    fn parse_url(netloc: &str) -> Self {
        let captures = once_regex!(r"^(?:([^@:]*)@)?(\[[A-Fa-f0-9:]+\]|[^:]*)(?::(.*))?$")
            .captures(netloc)
            .expect("pattern matches any netloc");
        Self {
            user: captures.get(1).map(|m| m.as_str().to_string()),
            host: captures.get(2).map_or(String::new(), |m| m.as_str().to_string()),
            port: captures.get(3).map(|m| m.as_str().to_string()),
        }
    }

    fn validate(self) -> Result<Self> {
        if self.host.is_empty() {
            bail!("SSH host cannot be empty");
        }
        if matches!(&self.user, Some(user) if user.is_empty()) {
            bail!("SSH user, if specified, cannot be empty");
        }
        if matches!(&self.port, Some(port) if port.is_empty()) {
            bail!("SSH port, if specified, cannot be empty");
        }
        Ok(self)
    }

    pub fn into_config(self) -> SshConfig {
        let mut config = SshConfig::new(self.host);
        config.user = self.user;
        config.port = self.port;
        config
    }
}

/// A parsed location: where the filesystem lives and the path within it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Local { path: String },
    Ssh { ssh: SshLoc, path: String },
}

/// Parse a location string. A URL scheme prefix disambiguates to URL form;
/// otherwise a `host:path` shape selects the SCP-style SSH form, and
/// anything else is a local path.
pub fn parse_location(locstr: &str) -> Result<Location> {
    let sshloc = once_regex!(r"^((?:[^/:@]*@)?\[[A-Fa-f0-9:]+\]|[^/:]*):(.*)$");
    let urlscheme = once_regex!(r"^([A-Za-z][A-Za-z0-9+.-]*)://(.*)$");

    let sshmatch = match sshloc.captures(locstr) {
        Some(captures) => captures,
        None => {
            return Ok(Location::Local {
                path: locstr.to_string(),
            })
        }
    };

    if let Some(url) = urlscheme.captures(locstr) {
        let scheme = url.get(1).expect("scheme group").as_str().to_ascii_lowercase();
        let rest = url.get(2).expect("rest group").as_str();
        match scheme.as_str() {
            "file" => Ok(Location::Local {
                path: rest.to_string(),
            }),
            "ssh" => {
                let (netloc, path) = match rest.find('/') {
                    Some(idx) => (&rest[..idx], &rest[idx..]),
                    None => (rest, ""),
                };
                Ok(Location::Ssh {
                    ssh: SshLoc::parse_url(netloc).validate()?,
                    path: path.to_string(),
                })
            }
            other => Err(anyhow!("unknown protocol '{}'", other)),
        }
    } else {
        let host = sshmatch.get(1).expect("host group").as_str();
        let path = sshmatch.get(2).expect("path group").as_str();
        Ok(Location::Ssh {
            ssh: SshLoc::parse_ssh(host).validate()?,
            path: path.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ssh(user: Option<&str>, host: &str, port: Option<&str>) -> SshLoc {
        SshLoc {
            user: user.map(str::to_string),
            host: host.to_string(),
            port: port.map(str::to_string),
        }
    }

    #[test]
    fn plain_local_path() {
        assert_eq!(
            parse_location("/mnt/data/vol").unwrap(),
            Location::Local {
                path: "/mnt/data/vol".to_string()
            }
        );
        assert_eq!(
            parse_location("relative/vol").unwrap(),
            Location::Local {
                path: "relative/vol".to_string()
            }
        );
    }

    #[test]
    fn file_url() {
        assert_eq!(
            parse_location("file:///mnt/data").unwrap(),
            Location::Local {
                path: "/mnt/data".to_string()
            }
        );
    }

    #[test]
    fn scp_style() {
        assert_eq!(
            parse_location("host:/mnt/vol").unwrap(),
            Location::Ssh {
                ssh: ssh(None, "host", None),
                path: "/mnt/vol".to_string()
            }
        );
        assert_eq!(
            parse_location("user@host:rel/vol").unwrap(),
            Location::Ssh {
                ssh: ssh(Some("user"), "host", None),
                path: "rel/vol".to_string()
            }
        );
    }

    #[test]
    fn ssh_url_with_port() {
        assert_eq!(
            parse_location("ssh://user@host:2222/mnt/vol").unwrap(),
            Location::Ssh {
                ssh: ssh(Some("user"), "host", Some("2222")),
                path: "/mnt/vol".to_string()
            }
        );
    }

    #[test]
    fn ssh_url_ipv6() {
        assert_eq!(
            parse_location("ssh://[fe80::1]:22/vol").unwrap(),
            Location::Ssh {
                ssh: ssh(None, "[fe80::1]", Some("22")),
                path: "/vol".to_string()
            }
        );
    }

    #[test]
    fn invalid_ssh_parameters() {
        assert!(parse_location(":path").is_err());
        assert!(parse_location("@host:path").is_err());
        assert!(parse_location("ssh://user@:22/vol").is_err());
    }

    #[test]
    fn unknown_scheme_is_rejected() {
        assert!(parse_location("gopher://host/vol").is_err());
    }
}
