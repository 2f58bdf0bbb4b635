//! Representative command wrappers.
//!
//! Mirrors the convenience layer the `driver` module provides on top of
//! raw RESP (`redis_client/src/driver/traits.rs`'s `FromRedis`), but
//! built on [`Cmd`]/[`FromValue`] instead of `DatoRedis`. Only a
//! representative slice of the command surface is implemented; the
//! remaining commands are mechanically identical thin wrappers around
//! [`Client::command`].

use crate::client::Client;
use crate::error::ClientResult;
use crate::resp::Cmd;

impl Client {
    pub async fn get(&self, key: &str) -> ClientResult<Option<String>> {
        self.command(Cmd::new("GET").arg(key)).await
    }

    pub async fn set(&self, key: &str, value: &str) -> ClientResult<()> {
        self.command(Cmd::new("SET").arg(key).arg(value)).await
    }

    pub async fn del(&self, keys: &[&str]) -> ClientResult<i64> {
        self.command(Cmd::new("DEL").args(keys.iter().copied()))
            .await
    }

    pub async fn incr(&self, key: &str) -> ClientResult<i64> {
        self.command(Cmd::new("INCR").arg(key)).await
    }

    pub async fn expire(&self, key: &str, seconds: i64) -> ClientResult<bool> {
        self.command(Cmd::new("EXPIRE").arg(key).arg(seconds)).await
    }

    pub async fn hset(&self, key: &str, field: &str, value: &str) -> ClientResult<i64> {
        self.command(Cmd::new("HSET").arg(key).arg(field).arg(value))
            .await
    }

    pub async fn hget(&self, key: &str, field: &str) -> ClientResult<Option<String>> {
        self.command(Cmd::new("HGET").arg(key).arg(field)).await
    }

    pub async fn lpush(&self, key: &str, values: &[&str]) -> ClientResult<i64> {
        self.command(Cmd::new("LPUSH").arg(key).args(values.iter().copied()))
            .await
    }

    pub async fn exists(&self, key: &str) -> ClientResult<bool> {
        self.command(Cmd::new("EXISTS").arg(key)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resp::Cmd;

    #[test]
    fn del_command_carries_all_keys() {
        let cmd = Cmd::new("DEL").args(["a", "b", "c"]);
        assert_eq!(
            cmd.into_parts(),
            vec![b"DEL".to_vec(), b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]
        );
    }
}
