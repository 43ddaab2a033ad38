//! Redis fleet store.

use async_trait::async_trait;
use redis::Script;
use redis::aio::ConnectionManager;
use std::sync::LazyLock;

use super::{Batch, BatchOp, FleetStore};
use crate::FleetResult;

const SCAN_COUNT: usize = 500;

/// Checks the guards and applies the writes of a batch in one script run.
///
/// ARGV: the guard count, then `key present expected` per guard, then the
/// writes as `SET key value secs`, `DEL key`, `SADD key member` or
/// `SREM key member`.
const GUARDED_APPLY: &str = r#"
local i = 2
for _ = 1, tonumber(ARGV[1]) do
  local current = redis.call('GET', ARGV[i])
  if ARGV[i + 1] == '1' then
    if current ~= ARGV[i + 2] then return 0 end
  elseif current then
    return 0
  end
  i = i + 3
end
while i <= #ARGV do
  local op = ARGV[i]
  if op == 'SET' then
    redis.call('SET', ARGV[i + 1], ARGV[i + 2], 'EX', ARGV[i + 3])
    i = i + 4
  elseif op == 'DEL' then
    redis.call('DEL', ARGV[i + 1])
    i = i + 2
  else
    redis.call(op, ARGV[i + 1], ARGV[i + 2])
    i = i + 3
  end
end
return 1
"#;

static GUARDED_APPLY_SCRIPT: LazyLock<Script> = LazyLock::new(|| Script::new(GUARDED_APPLY));

fn ttl_secs(ttl: &std::time::Duration) -> u64 {
    ttl.as_secs().max(1)
}

/// Flatten a guarded batch into the script's ARGV.
fn guarded_args(batch: &Batch) -> Vec<String> {
    let mut args = vec![batch.guards().len().to_string()];
    for guard in batch.guards() {
        args.push(guard.key.clone());
        match &guard.expected {
            Some(value) => {
                args.push("1".to_string());
                args.push(value.clone());
            }
            None => {
                args.push("0".to_string());
                args.push(String::new());
            }
        }
    }
    for op in batch.ops() {
        match op {
            BatchOp::Set { key, value, ttl } => {
                args.extend(["SET".to_string(), key.clone(), value.clone(), ttl_secs(ttl).to_string()]);
            }
            BatchOp::Delete { key } => args.extend(["DEL".to_string(), key.clone()]),
            BatchOp::SetAdd { key, member } => {
                args.extend(["SADD".to_string(), key.clone(), member.clone()]);
            }
            BatchOp::SetRemove { key, member } => {
                args.extend(["SREM".to_string(), key.clone(), member.clone()]);
            }
        }
    }
    args
}

/// Fleet store on a shared Redis connection.
///
/// Unguarded batches are sent as a MULTI/EXEC pipeline; guarded ones run
/// as a script so the guard check and the writes are one atomic step.
#[derive(Clone)]
pub struct RedisFleetStore {
    conn: ConnectionManager,
}

impl RedisFleetStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    pub async fn connect(url: &str) -> FleetResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self::new(conn))
    }
}

#[async_trait]
impl FleetStore for RedisFleetStore {
    async fn get(&self, key: &str) -> FleetResult<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn members(&self, key: &str) -> FleetResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = redis::cmd("SMEMBERS")
            .arg(key)
            .query_async(&mut conn)
            .await?;
        Ok(members)
    }

    async fn apply(&self, batch: Batch) -> FleetResult<bool> {
        if batch.is_empty() {
            return Ok(true);
        }

        if !batch.guards().is_empty() {
            let mut invocation = GUARDED_APPLY_SCRIPT.prepare_invoke();
            for arg in guarded_args(&batch) {
                invocation.arg(arg);
            }
            let mut conn = self.conn.clone();
            let applied: i64 = invocation.invoke_async(&mut conn).await?;
            return Ok(applied == 1);
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in batch.ops() {
            match op {
                BatchOp::Set { key, value, ttl } => {
                    pipe.cmd("SET")
                        .arg(key)
                        .arg(value)
                        .arg("EX")
                        .arg(ttl_secs(ttl))
                        .ignore();
                }
                BatchOp::Delete { key } => {
                    pipe.cmd("DEL").arg(key).ignore();
                }
                BatchOp::SetAdd { key, member } => {
                    pipe.cmd("SADD").arg(key).arg(member).ignore();
                }
                BatchOp::SetRemove { key, member } => {
                    pipe.cmd("SREM").arg(key).arg(member).ignore();
                }
            }
        }

        let mut conn = self.conn.clone();
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(true)
    }

    async fn count_keys(&self, prefix: &str) -> FleetResult<usize> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}*", prefix);
        let mut cursor: u64 = 0;
        let mut count = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await?;
            count += keys.len();
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_guarded_args_layout() {
        let mut batch = Batch::new();
        batch
            .require("instance:a", Some("{}".to_string()))
            .require("instance:b", None)
            .delete("instance:a")
            .set_remove("instance:index", "a")
            .set("instance:c", "v", Duration::from_millis(10));

        assert_eq!(
            guarded_args(&batch),
            vec![
                "2", "instance:a", "1", "{}", "instance:b", "0", "", "DEL", "instance:a", "SREM",
                "instance:index", "a", "SET", "instance:c", "v", "1",
            ]
        );
    }
}
