//! Push event types and frame parser.
//!
//! A push frame is either a named event (SSE `event:` field) whose JSON body
//! is the payload, or an unnamed frame whose body is an envelope of the form
//! `{"event": "<kind>", "data": ..., "message": ...}`. In envelopes the
//! progress `data` may itself be a JSON-encoded string.
//!
//! | Kind                              | Event                      |
//! |-----------------------------------|----------------------------|
//! | `progress`                        | [`PushEvent::Progress`]    |
//! | `complete`, `completed`, `done`   | [`PushEvent::Completed`]   |
//! | `error`, `failed`                 | [`PushEvent::Failed`]      |
//! | `end` + `status`                  | completed or failed        |
//!
//! An `end` frame without a `status` says nothing about the outcome and is
//! rejected as a protocol error.
//! | `ping`, `heartbeat`, `keepalive`  | ignored                    |

use serde::Deserialize;
use serde_json::Value;
use tubesync_core::{JobId, JobStatus, JobUpdate, UpdateOrigin};

use crate::error::ClientError;
use crate::wire::{non_empty, DownloadInfo};

/// Fallback failure detail when the service does not send one.
const DEFAULT_FAILURE_DETAIL: &str = "Download failed";

/// One incremental event from a job's push channel.
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    /// Partial job fields; implies the job is running.
    Progress(ProgressEvent),
    Completed,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    pub progress: tubesync_core::Progress,
    pub title: Option<String>,
    pub thumbnail_ref: Option<String>,
}

impl PushEvent {
    /// `Completed` and `Failed` end the channel.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PushEvent::Completed | PushEvent::Failed(_))
    }

    /// Convert into a push-origin update for the job the channel belongs to.
    pub fn into_update(self, id: JobId) -> JobUpdate {
        let update = JobUpdate::new(id, UpdateOrigin::Push);
        match self {
            PushEvent::Progress(event) => {
                let mut update = update
                    .with_status(JobStatus::InProgress)
                    .with_progress(event.progress);
                update.title = event.title;
                update.thumbnail_ref = event.thumbnail_ref;
                update
            }
            PushEvent::Completed => update.with_status(JobStatus::Complete),
            PushEvent::Failed(detail) => update.with_status(JobStatus::Failed).with_error(detail),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    message: Option<String>,
}

/// Parse one push frame.
///
/// * `event`    - SSE event name, if the transport carries one.
/// * `data`     - frame body.
/// * `sequence` - freshness marker (SSE `id:`), attached to progress.
///
/// Returns `Ok(None)` for keepalive frames. Callers should log errors and
/// keep reading.
pub fn parse_frame(
    event: Option<&str>,
    data: &str,
    sequence: Option<u64>,
) -> Result<Option<PushEvent>, ClientError> {
    match event.filter(|name| !name.is_empty() && *name != "message") {
        Some(name) => {
            let payload = if data.trim().is_empty() {
                None
            } else {
                Some(serde_json::from_str::<Value>(data)?)
            };
            interpret(name, payload, None, sequence)
        }
        None => {
            let envelope: Envelope = serde_json::from_str(data)?;
            interpret(&envelope.event, envelope.data, envelope.message, sequence)
        }
    }
}

fn interpret(
    kind: &str,
    payload: Option<Value>,
    message: Option<String>,
    sequence: Option<u64>,
) -> Result<Option<PushEvent>, ClientError> {
    let payload = payload.map(unwrap_encoded).transpose()?;
    let event = match kind.to_ascii_lowercase().as_str() {
        "progress" => {
            let info: DownloadInfo = match payload {
                Some(value) => serde_json::from_value(value)?,
                None => DownloadInfo::default(),
            };
            PushEvent::Progress(ProgressEvent {
                progress: info.to_progress(sequence),
                title: non_empty(info.title),
                thumbnail_ref: non_empty(info.thumbnail_url),
            })
        }
        "complete" | "completed" | "done" => PushEvent::Completed,
        "error" | "failed" => PushEvent::Failed(failure_detail(payload.as_ref(), message)),
        "end" => {
            let status = payload
                .as_ref()
                .and_then(|p| p.get("status"))
                .and_then(Value::as_str)
                .ok_or_else(|| ClientError::Protocol("end event without a status".into()))?
                .to_ascii_lowercase();
            match status.as_str() {
                "success" | "complete" | "completed" | "downloaded" => PushEvent::Completed,
                "failure" | "failed" | "error" => {
                    PushEvent::Failed(failure_detail(payload.as_ref(), message))
                }
                other => {
                    return Err(ClientError::Protocol(format!(
                        "unknown end status '{other}'"
                    )))
                }
            }
        }
        "ping" | "heartbeat" | "keepalive" => return Ok(None),
        other => return Err(ClientError::Protocol(format!("unknown event '{other}'"))),
    };
    Ok(Some(event))
}

/// Payloads are sometimes a JSON document encoded as a string.
fn unwrap_encoded(value: Value) -> Result<Value, ClientError> {
    match value {
        Value::String(s) if s.trim_start().starts_with('{') => Ok(serde_json::from_str(&s)?),
        other => Ok(other),
    }
}

fn failure_detail(payload: Option<&Value>, message: Option<String>) -> String {
    message
        .or_else(|| {
            payload.and_then(|p| match p {
                Value::String(s) => Some(s.clone()),
                Value::Object(_) => ["error", "message", "detail"]
                    .iter()
                    .find_map(|key| p.get(*key).and_then(Value::as_str))
                    .map(str::to_string),
                _ => None,
            })
        })
        .and_then(|s| non_empty(Some(s)))
        .unwrap_or_else(|| DEFAULT_FAILURE_DETAIL.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn parses_envelope_with_encoded_progress() {
        let frame = r#"{"event":"progress","data":"{\"speed\":\"2.0MiB/s\",\"eta\":\"0:05\",\"downloaded_bytes\":500,\"total_bytes\":1000}"}"#;
        let event = parse_frame(None, frame, Some(4)).unwrap().unwrap();

        assert_matches!(event, PushEvent::Progress(ProgressEvent { ref progress, .. }) => {
            assert_eq!(progress.percent, Some(50.0));
            assert_eq!(progress.sequence, Some(4));
            assert_eq!(progress.transfer_rate.as_deref(), Some("2.0MiB/s"));
        });
    }

    #[test]
    fn parses_named_events() {
        assert_eq!(
            parse_frame(Some("complete"), "", None).unwrap(),
            Some(PushEvent::Completed)
        );
        assert_eq!(
            parse_frame(Some("error"), r#"{"message":"HTTP 403"}"#, None).unwrap(),
            Some(PushEvent::Failed("HTTP 403".into()))
        );
    }

    #[test]
    fn parses_envelope_error_message() {
        let event = parse_frame(None, r#"{"event":"error","message":"Video unavailable"}"#, None)
            .unwrap();
        assert_eq!(event, Some(PushEvent::Failed("Video unavailable".into())));
    }

    #[test]
    fn end_event_carries_outcome() {
        assert_eq!(
            parse_frame(Some("end"), r#"{"status":"success"}"#, None).unwrap(),
            Some(PushEvent::Completed)
        );
        assert_eq!(
            parse_frame(Some("end"), r#"{"status":"failure","error":"disk full"}"#, None).unwrap(),
            Some(PushEvent::Failed("disk full".into()))
        );
    }

    #[test]
    fn end_event_without_status_is_rejected() {
        assert_matches!(parse_frame(Some("end"), "", None), Err(ClientError::Protocol(_)));
        assert_matches!(
            parse_frame(None, r#"{"event":"end","data":{}}"#, None),
            Err(ClientError::Protocol(_))
        );
    }

    #[test]
    fn failure_without_detail_gets_default() {
        assert_eq!(
            parse_frame(None, r#"{"event":"failed"}"#, None).unwrap(),
            Some(PushEvent::Failed(DEFAULT_FAILURE_DETAIL.into()))
        );
    }

    #[test]
    fn keepalive_is_ignored() {
        assert_eq!(parse_frame(Some("ping"), "", None).unwrap(), None);
    }

    #[test]
    fn unknown_kind_is_protocol_error() {
        assert_matches!(
            parse_frame(None, r#"{"event":"rewind"}"#, None),
            Err(ClientError::Protocol(_))
        );
        assert_matches!(parse_frame(None, "not json", None), Err(ClientError::Decode(_)));
    }

    #[test]
    fn progress_update_marks_job_running() {
        let event = parse_frame(Some("progress"), r#"{"downloaded_bytes":1,"total_bytes":4}"#, None)
            .unwrap()
            .unwrap();
        let update = event.into_update(JobId::from(9));

        assert_eq!(update.origin, UpdateOrigin::Push);
        assert_eq!(update.status, Some(JobStatus::InProgress));
        assert_eq!(update.progress.unwrap().percent, Some(25.0));
    }
}
