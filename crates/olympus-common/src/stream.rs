//! Redis stream helpers shared by the stream consumers.

use std::collections::HashMap;

use deadpool_redis::redis;

use crate::error::{AppError, AppResult};

/// One entry read from a stream with `XREADGROUP` or `XCLAIM`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: String,
    pub fields: HashMap<String, Vec<u8>>,
}

impl StreamEntry {
    pub fn field(&self, name: &str) -> AppResult<&[u8]> {
        self.fields
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| AppError::QueueError(format!("Missing field {} in {}", name, self.id)))
    }

    pub fn field_str(&self, name: &str) -> AppResult<String> {
        Ok(String::from_utf8_lossy(self.field(name)?).to_string())
    }
}

/// Create a consumer group (and the stream), tolerating an existing group
pub async fn ensure_group(
    conn: &mut deadpool_redis::Connection,
    stream: &str,
    group: &str,
) -> AppResult<()> {
    let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
        .arg("CREATE")
        .arg(stream)
        .arg(group)
        .arg("0")
        .arg("MKSTREAM")
        .query_async(&mut **conn)
        .await;

    match result {
        Ok(_) => {
            tracing::info!("Created consumer group '{}' on stream '{}'", group, stream);
            Ok(())
        }
        Err(e) if e.to_string().contains("BUSYGROUP") => {
            tracing::debug!("Consumer group already exists");
            Ok(())
        }
        Err(e) => Err(AppError::QueueError(format!(
            "Failed to create consumer group: {}",
            e
        ))),
    }
}

/// Take over pending entries left behind by a dead consumer.
///
/// Entries idle for longer than `min_idle_ms`, or already owned by
/// `consumer` (a restart under the same name), are claimed for `consumer`.
pub async fn claim_abandoned(
    conn: &mut deadpool_redis::Connection,
    stream: &str,
    group: &str,
    consumer: &str,
    min_idle_ms: u64,
) -> AppResult<Vec<StreamEntry>> {
    let pending: Vec<(String, String, u64, u64)> = redis::cmd("XPENDING")
        .arg(stream)
        .arg(group)
        .arg("-")
        .arg("+")
        .arg(10)
        .query_async(&mut **conn)
        .await?;

    let abandoned: Vec<String> = pending
        .into_iter()
        .filter(|(_, owner, idle, _)| *idle > min_idle_ms || owner == consumer)
        .map(|(id, ..)| id)
        .collect();
    if abandoned.is_empty() {
        return Ok(Vec::new());
    }

    tracing::info!("Claiming {} abandoned entries on '{}'", abandoned.len(), stream);
    let claimed: Vec<redis::Value> = redis::cmd("XCLAIM")
        .arg(stream)
        .arg(group)
        .arg(consumer)
        .arg(0)
        .arg(&abandoned)
        .query_async(&mut **conn)
        .await?;

    parse_entries(&claimed)
}

/// Parse an `XREADGROUP` reply:
/// `[[stream_name, [[message_id, [field, value, ...]], ...]], ...]`
pub fn parse_read_reply(value: &redis::Value) -> AppResult<Vec<StreamEntry>> {
    let streams = match value {
        redis::Value::Nil => return Ok(Vec::new()),
        redis::Value::Array(streams) => streams,
        _ => return Err(AppError::QueueError("Invalid stream response format".into())),
    };

    let mut entries = Vec::new();
    for stream in streams {
        let messages = match stream {
            redis::Value::Array(data) => match data.get(1) {
                Some(redis::Value::Array(msgs)) => msgs,
                _ => continue,
            },
            _ => return Err(AppError::QueueError("Invalid stream response format".into())),
        };
        entries.extend(parse_entries(messages)?);
    }
    Ok(entries)
}

/// Parse a list of `[message_id, [field, value, ...]]` pairs, as returned by
/// `XCLAIM` or nested in `XREADGROUP`. Entries deleted from the stream come
/// back with nil fields and are skipped.
pub fn parse_entries(messages: &[redis::Value]) -> AppResult<Vec<StreamEntry>> {
    let mut entries = Vec::with_capacity(messages.len());
    for message in messages {
        let message = match message {
            redis::Value::Array(msg) => msg,
            _ => return Err(AppError::QueueError("No message data".into())),
        };

        let id = match message.first() {
            Some(redis::Value::BulkString(id)) => String::from_utf8_lossy(id).to_string(),
            _ => return Err(AppError::QueueError("Invalid message ID".into())),
        };

        let raw_fields = match message.get(1) {
            Some(redis::Value::Array(f)) => f,
            _ => continue,
        };

        let mut fields = HashMap::new();
        for chunk in raw_fields.chunks(2) {
            if let [redis::Value::BulkString(key), redis::Value::BulkString(value)] = chunk {
                fields.insert(String::from_utf8_lossy(key).to_string(), value.clone());
            }
        }
        entries.push(StreamEntry { id, fields });
    }
    Ok(entries)
}
