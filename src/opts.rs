//! Connection options.
//!
//! Two input forms are accepted, as libpq does:
//!
//! - keyword/value: `host=localhost port=5432 dbname=app user='me' password='it''s'`
//! - URL: `postgres://[user[:password]@]host[:port][/database][?param=value&..]`

use std::time::Duration;

use url::Url;

use crate::error::Error;

/// Conninfo used when the caller supplies none.
pub const DEFAULT_CONNINFO: &str = "dbname = postgres";

/// SSL connection mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    /// Don't use SSL
    Disable,
    /// Try SSL when built with TLS support, fall back to plaintext otherwise
    #[default]
    Prefer,
    /// Require SSL, without certificate verification
    Require,
    /// Require SSL and verify the certificate chain
    VerifyCa,
    /// Require SSL and verify the chain and the host name
    VerifyFull,
}

impl SslMode {
    fn parse(value: &str) -> Result<Self, Error> {
        match value {
            "disable" | "allow" => Ok(SslMode::Disable),
            "prefer" => Ok(SslMode::Prefer),
            "require" => Ok(SslMode::Require),
            "verify-ca" => Ok(SslMode::VerifyCa),
            "verify-full" => Ok(SslMode::VerifyFull),
            _ => Err(Error::Misuse(format!(
                "invalid sslmode value: \"{}\"",
                value
            ))),
        }
    }

    /// Whether a plaintext session is unacceptable.
    pub fn requires_tls(self) -> bool {
        matches!(
            self,
            SslMode::Require | SslMode::VerifyCa | SslMode::VerifyFull
        )
    }
}

/// Connection options for PostgreSQL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Opts {
    /// Host name, or a Unix-socket directory when it starts with `/`.
    ///
    /// Default: `"localhost"`
    pub host: String,

    /// Numeric address used instead of resolving `host`.
    ///
    /// Default: `None`
    pub hostaddr: Option<String>,

    /// Port number for the PostgreSQL server.
    ///
    /// Default: `5432`
    pub port: u16,

    /// Unix socket path (overrides host and port).
    ///
    /// Default: `None`
    pub socket: Option<String>,

    /// Username for authentication.
    ///
    /// Default: `""`
    pub user: String,

    /// Database name to use (the server defaults it to the user name).
    ///
    /// Default: `None`
    pub database: Option<String>,

    /// Password for authentication.
    ///
    /// Default: `None`
    pub password: Option<String>,

    /// Application name to report to the server.
    ///
    /// Default: `None`
    pub application_name: Option<String>,

    /// Command-line options sent to the backend at startup (`-c name=value ...`).
    ///
    /// Default: `None`
    pub options: Option<String>,

    /// Client encoding requested at startup.
    ///
    /// Default: `"UTF8"`
    pub client_encoding: String,

    /// SSL connection mode.
    ///
    /// Default: `SslMode::Prefer`
    pub ssl_mode: SslMode,

    /// Maximum time to wait while establishing the socket.
    ///
    /// Default: `None`
    pub connect_timeout: Option<Duration>,

    /// Additional run-time parameters sent in the startup packet.
    ///
    /// Default: `[]`
    pub params: Vec<(String, String)>,
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            hostaddr: None,
            port: 5432,
            socket: None,
            user: String::new(),
            database: None,
            password: None,
            application_name: None,
            options: None,
            client_encoding: "UTF8".to_string(),
            ssl_mode: SslMode::Prefer,
            connect_timeout: None,
            params: Vec::new(),
        }
    }
}

impl Opts {
    /// Defaults overlaid with the `PG*` environment variables.
    ///
    /// `PGHOST`, `PGHOSTADDR`, `PGPORT`, `PGUSER` (falling back to `USER`),
    /// `PGPASSWORD`, `PGDATABASE`, `PGAPPNAME`, `PGOPTIONS`, `PGSSLMODE`,
    /// `PGCONNECT_TIMEOUT`, `PGCLIENTENCODING`. Unparseable values are ignored.
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        let mut opts = Opts::default();
        let pairs = [
            ("host", var("PGHOST")),
            ("hostaddr", var("PGHOSTADDR")),
            ("port", var("PGPORT")),
            ("user", var("PGUSER").or_else(|| var("USER"))),
            ("password", var("PGPASSWORD")),
            ("dbname", var("PGDATABASE")),
            ("application_name", var("PGAPPNAME")),
            ("options", var("PGOPTIONS")),
            ("sslmode", var("PGSSLMODE")),
            ("connect_timeout", var("PGCONNECT_TIMEOUT")),
            ("client_encoding", var("PGCLIENTENCODING")),
        ];
        for (key, value) in pairs {
            if let Some(value) = value {
                if let Err(e) = opts.set(key, &value) {
                    tracing::warn!("ignoring environment default for {}: {}", key, e);
                }
            }
        }
        opts
    }

    /// Parse `conninfo` on top of `base`, which supplies every unset field.
    pub fn parse_with_base(conninfo: &str, base: Opts) -> Result<Self, Error> {
        let trimmed = conninfo.trim_start();
        if trimmed.starts_with("postgres://") || trimmed.starts_with("postgresql://") {
            let url = Url::parse(trimmed)
                .map_err(|e| Error::Misuse(format!("Invalid URL: {}", e)))?;
            return from_url(&url, base);
        }

        let mut opts = base;
        for (key, value) in tokenize(conninfo)? {
            opts.set(&key, &value)?;
        }
        Ok(opts)
    }

    /// Apply one keyword/value pair.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), Error> {
        match key {
            "host" => {
                if value.starts_with('/') {
                    self.socket = None;
                }
                self.host = value.to_string();
            }
            "hostaddr" => self.hostaddr = Some(value.to_string()),
            "port" => {
                self.port = value
                    .parse()
                    .map_err(|_| Error::Misuse(format!("invalid port number: \"{}\"", value)))?;
            }
            "user" => self.user = value.to_string(),
            "password" => self.password = Some(value.to_string()),
            "dbname" => self.database = Some(value.to_string()),
            "application_name" => self.application_name = Some(value.to_string()),
            "options" => self.options = Some(value.to_string()),
            "client_encoding" => self.client_encoding = value.to_string(),
            "sslmode" => self.ssl_mode = SslMode::parse(value)?,
            "connect_timeout" => {
                let secs: u64 = value.parse().map_err(|_| {
                    Error::Misuse(format!("invalid connect_timeout: \"{}\"", value))
                })?;
                // libpq treats 0 as "wait forever"
                self.connect_timeout = (secs > 0).then(|| Duration::from_secs(secs));
            }
            _ => self.params.push((key.to_string(), value.to_string())),
        }
        Ok(())
    }

    /// Path of the Unix socket to connect to, if this is a socket connection.
    pub fn socket_path(&self) -> Option<String> {
        if let Some(socket) = &self.socket {
            return Some(socket.clone());
        }
        self.host
            .starts_with('/')
            .then(|| format!("{}/.s.PGSQL.{}", self.host, self.port))
    }

    /// Database the server will attach to.
    pub fn effective_database(&self) -> &str {
        self.database.as_deref().unwrap_or(&self.user)
    }
}

fn from_url(url: &Url, base: Opts) -> Result<Opts, Error> {
    let mut opts = base;
    if let Some(host) = url.host_str() {
        if !host.is_empty() {
            opts.host = host.to_string();
        }
    }
    if let Some(port) = url.port() {
        opts.port = port;
    }
    if !url.username().is_empty() {
        opts.user = decode_component(url.username(), "user name")?;
    }
    if let Some(password) = url.password() {
        opts.password = Some(decode_component(password, "password")?);
    }
    if let Some(db) = url.path().strip_prefix('/').filter(|s| !s.is_empty()) {
        opts.database = Some(decode_component(db, "database name")?);
    }
    for (key, value) in url.query_pairs() {
        // URL spelling of the socket directory: ?host=/var/run/postgresql
        opts.set(&key, &value)?;
    }
    Ok(opts)
}

/// Undo the percent-encoding `Url` leaves in user info.
fn decode_component(raw: &str, what: &str) -> Result<String, Error> {
    urlencoding::decode(raw)
        .map(|decoded| decoded.into_owned())
        .map_err(|e| Error::Misuse(format!("invalid {} in URL: {}", what, e)))
}

/// Split a keyword/value conninfo string into pairs.
///
/// Whitespace around `=` is allowed; values may be single-quoted; a
/// backslash escapes the next character in both quoted and bare values.
fn tokenize(conninfo: &str) -> Result<Vec<(String, String)>, Error> {
    let mut pairs = Vec::new();
    let mut chars = conninfo.chars().peekable();

    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        if chars.peek().is_none() {
            return Ok(pairs);
        }

        let mut key = String::new();
        while let Some(c) = chars.next_if(|c| *c != '=' && !c.is_whitespace()) {
            key.push(c);
        }
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        if chars.next() != Some('=') {
            return Err(Error::Misuse(format!(
                "missing \"=\" after \"{}\" in connection info string",
                key
            )));
        }
        while chars.next_if(|c| c.is_whitespace()).is_some() {}

        let mut value = String::new();
        if chars.next_if_eq(&'\'').is_some() {
            loop {
                match chars.next() {
                    Some('\\') => {
                        if let Some(c) = chars.next() {
                            value.push(c);
                        }
                    }
                    Some('\'') => break,
                    Some(c) => value.push(c),
                    None => {
                        return Err(Error::Misuse(
                            "unterminated quoted string in connection info string".into(),
                        ));
                    }
                }
            }
        } else {
            while let Some(c) = chars.next_if(|c| !c.is_whitespace()) {
                if c == '\\' {
                    if let Some(escaped) = chars.next() {
                        value.push(escaped);
                    }
                } else {
                    value.push(c);
                }
            }
        }
        pairs.push((key, value));
    }
}

impl TryFrom<&Url> for Opts {
    type Error = Error;

    fn try_from(url: &Url) -> Result<Self, Self::Error> {
        if !["postgres", "postgresql"].contains(&url.scheme()) {
            return Err(Error::Misuse(format!(
                "Invalid scheme: expected 'postgres://' or 'postgresql://', got '{}://'",
                url.scheme()
            )));
        }
        from_url(url, Opts::default())
    }
}

impl TryFrom<&str> for Opts {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Opts::parse_with_base(s, Opts::default())
    }
}

impl TryFrom<String> for Opts {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Opts::try_from(s.as_str())
    }
}
