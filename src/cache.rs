//! Key-value cache over Redis. Every key is namespaced as `{prefix}:{key}`.

use crate::error::AppError;
use crate::settings::RedisSettings;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;

pub fn build_key(prefix: &str, key: &str) -> String {
    let mut out = String::with_capacity(prefix.len() + key.len() + 1);
    out.push_str(prefix);
    out.push(':');
    out.push_str(key);
    out
}

#[derive(Clone)]
pub struct KeyValueCache {
    manager: ConnectionManager,
    prefix: String,
}

impl KeyValueCache {
    /// Connect and verify the server answers `PING`.
    pub async fn connect(settings: &RedisSettings) -> Result<Self, AppError> {
        let client = redis::Client::open(settings.connection_url())?;
        let mut manager = client.get_connection_manager().await?;
        let pong: String = redis::cmd("PING").query_async(&mut manager).await?;
        tracing::info!(addr = %settings.addr, reply = %pong, "redis connected");
        Ok(KeyValueCache {
            manager,
            prefix: settings.prefix.clone(),
        })
    }

    pub fn key(&self, key: &str) -> String {
        build_key(&self.prefix, key)
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        let mut conn = self.manager.clone();
        Ok(conn.get(self.key(key)).await?)
    }

    /// `ttl == None` keeps the key until deleted.
    pub async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), AppError> {
        let mut conn = self.manager.clone();
        let _: () = match ttl {
            Some(ttl) => conn.set_ex(self.key(key), value, ttl.as_secs().max(1)).await?,
            None => conn.set(self.key(key), value).await?,
        };
        Ok(())
    }

    pub async fn incr(&self, key: &str) -> Result<i64, AppError> {
        let mut conn = self.manager.clone();
        Ok(conn.incr(self.key(key), 1).await?)
    }

    pub async fn del(&self, keys: &[&str]) -> Result<(), AppError> {
        if keys.is_empty() {
            return Ok(());
        }
        let keys: Vec<String> = keys.iter().map(|k| self.key(k)).collect();
        let mut conn = self.manager.clone();
        let _removed: i64 = conn.del(keys).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_prefixed() {
        assert_eq!(build_key("cosy", "session:1"), "cosy:session:1");
        assert_eq!(build_key("", "a"), ":a");
    }

    #[test]
    fn connection_url_includes_password_and_db() {
        let mut s = RedisSettings {
            addr: "127.0.0.1:6379".into(),
            db: 2,
            ..Default::default()
        };
        assert_eq!(s.connection_url(), "redis://127.0.0.1:6379/2");
        s.password = "pw".into();
        assert_eq!(s.connection_url(), "redis://:pw@127.0.0.1:6379/2");
    }
}
