use crate::types::SubmissionIntent;
use redis::{AsyncCommands, RedisResult};
use serde::Serialize;
use uuid::Uuid;

/// Redis key semantics shared by the client and the grading service
/// Keeps key names deterministic so both sides never drift

pub const SUBMISSION_QUEUE: &str = "optimus:queue:submissions";
pub const SESSION_PREFIX: &str = "optimus:session";

/// Pub/sub channel the judge publishes verdict frames on for a session
pub fn inbound_channel(session_id: &Uuid) -> String {
    format!("{}:{}:inbound", SESSION_PREFIX, session_id)
}

/// Pub/sub channel the client publishes control frames on for a session
pub fn outbound_channel(session_id: &Uuid) -> String {
    format!("{}:{}:outbound", SESSION_PREFIX, session_id)
}

/// Queue entry: the intent plus the session its results stream to
#[derive(Serialize)]
struct QueuedIntent<'a> {
    session_id: &'a Uuid,
    intent: &'a SubmissionIntent,
}

/// Push a submission intent onto the grading queue
/// Uses RPUSH for FIFO semantics
pub async fn push_intent(
    conn: &mut redis::aio::ConnectionManager,
    session_id: &Uuid,
    intent: &SubmissionIntent,
) -> RedisResult<()> {
    let payload = QueuedIntent { session_id, intent };
    let payload = serde_json::to_string(&payload).map_err(|e| {
        redis::RedisError::from((
            redis::ErrorKind::TypeError,
            "serialization error",
            e.to_string(),
        ))
    })?;

    conn.rpush(SUBMISSION_QUEUE, payload).await
}

/// Publish a raw frame on a pub/sub channel
pub async fn publish_frame(
    conn: &mut redis::aio::ConnectionManager,
    channel: &str,
    frame: &str,
) -> RedisResult<()> {
    let _: i64 = conn.publish(channel, frame).await?;
    Ok(())
}
