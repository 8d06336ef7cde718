//! Connection-string configuration.
//!
//! The connection string is a semicolon-delimited list of `key=value`
//! options. Unknown keys and malformed segments are fatal at parse time: a
//! typo silently ignored here would surface much later as a store talking to
//! the wrong cluster.

use crate::error::{Error, Result};

/// Payload compression negotiated with the database cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    #[default]
    None,
    Snappy,
    Lz4,
}

impl Compression {
    fn parse(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "none" | "nocompression" => Ok(Compression::None),
            "snappy" => Ok(Compression::Snappy),
            "lz4" => Ok(Compression::Lz4),
            other => Err(Error::Config(format!("unknown compression type {other}"))),
        }
    }
}

/// Parsed database connection options.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectionConfig {
    /// Cluster contact points, in the order given. At least one is required.
    pub contact_points: Vec<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keyspace: Option<String>,
    pub compression: Compression,
    pub port: Option<u16>,
    pub ssl: bool,
}

impl ConnectionConfig {
    /// Parse a `key=value;key=value` connection string.
    ///
    /// Keys are case-insensitive and whitespace around keys and values is
    /// trimmed. Empty segments (a trailing `;`) are tolerated.
    pub fn parse(connection_string: &str) -> Result<Self> {
        if connection_string.trim().is_empty() {
            return Err(Error::Config("connection string not specified".to_string()));
        }

        let mut config = ConnectionConfig::default();

        for segment in connection_string.split(';') {
            if segment.trim().is_empty() {
                continue;
            }
            let (key, value) = segment.split_once('=').ok_or_else(|| {
                Error::Config(format!("invalid connection string option: {segment}"))
            })?;
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim();
            if value.is_empty() {
                return Err(Error::Config(format!(
                    "invalid connection string option: {segment}"
                )));
            }

            match key.as_str() {
                "contact point" => config.contact_points.push(value.to_string()),
                "username" => config.username = Some(value.to_string()),
                "password" => config.password = Some(value.to_string()),
                "keyspace" => config.keyspace = Some(value.to_string()),
                "compression" => config.compression = Compression::parse(value)?,
                "port" => {
                    config.port = Some(value.parse().map_err(|_| {
                        Error::Config(format!("invalid port number {value}"))
                    })?);
                }
                "ssl" => {
                    config.ssl = value.parse().map_err(|_| {
                        Error::Config(format!("invalid ssl flag {value}"))
                    })?;
                }
                other => return Err(Error::Config(format!("unknown key {other}"))),
            }
        }

        if config.contact_points.is_empty() {
            return Err(Error::Config(
                "connection string specifies no contact points".to_string(),
            ));
        }

        Ok(config)
    }
}
