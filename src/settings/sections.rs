//! Built-in settings sections.

use serde::{Deserialize, Serialize};

/// Copy a freshly loaded section over the live one, leaving protected fields untouched.
pub trait ProtectedFill {
    fn protected_fill(&mut self, incoming: Self);
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Default `page_size` for list operations.
    pub page_size: u64,
    pub max_page_size: u64,
    /// Protected: set on first load only.
    pub jwt_secret: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        AppSettings {
            page_size: 20,
            max_page_size: 100,
            jwt_secret: String::new(),
        }
    }
}

impl ProtectedFill for AppSettings {
    fn protected_fill(&mut self, incoming: Self) {
        self.page_size = incoming.page_size;
        self.max_page_size = incoming.max_page_size;
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub run_mode: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        ServerSettings {
            host: "0.0.0.0".into(),
            port: 3000,
            run_mode: "debug".into(),
        }
    }
}

impl ServerSettings {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl ProtectedFill for ServerSettings {
    fn protected_fill(&mut self, incoming: Self) {
        *self = incoming;
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// Protected. Empty means no database; the in-memory store is used instead.
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            url: String::new(),
            max_connections: 10,
        }
    }
}

impl ProtectedFill for DatabaseSettings {
    fn protected_fill(&mut self, incoming: Self) {
        self.max_connections = incoming.max_connections;
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisSettings {
    /// `host:port`; empty disables the cache.
    pub addr: String,
    pub password: String,
    pub db: i64,
    pub prefix: String,
}

impl RedisSettings {
    pub fn connection_url(&self) -> String {
        if self.password.is_empty() {
            format!("redis://{}/{}", self.addr, self.db)
        } else {
            format!("redis://:{}@{}/{}", self.password, self.addr, self.db)
        }
    }
}

impl ProtectedFill for RedisSettings {
    fn protected_fill(&mut self, incoming: Self) {
        *self = incoming;
    }
}
