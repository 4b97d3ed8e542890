//! Wire representation of job records returned by the job service.
//!
//! The service reports progress as a loosely typed `download_info` object
//! whose numeric fields sometimes arrive as strings or floats, so the
//! conversions here are lenient and never fail a whole record over one odd
//! field.

use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tubesync_core::{JobId, JobStatus, JobUpdate, Progress, Timestamp, UpdateOrigin};

/// A job as listed by `GET {jobs}` or returned by `POST {jobs}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    #[serde(alias = "source_url", alias = "sourceUrl")]
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, alias = "thumbnail_ref")]
    pub thumbnail_url: Option<String>,
    pub status: JobStatus,
    #[serde(default, alias = "error_detail")]
    pub error_message: Option<String>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub file_size: Option<u64>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub created_at: Option<Timestamp>,
    #[serde(default)]
    pub download_info: Option<DownloadInfo>,
}

/// Progress details attached to a record or carried by a push event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DownloadInfo {
    #[serde(default, deserialize_with = "lenient_string")]
    pub speed: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub eta: Option<String>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub downloaded_bytes: Option<u64>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub total_bytes: Option<u64>,
    /// Completion percentage as reported by the service.
    #[serde(default, deserialize_with = "lenient_f64")]
    pub progress: Option<f64>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
}

impl DownloadInfo {
    pub fn to_progress(&self, sequence: Option<u64>) -> Progress {
        Progress {
            percent: self.progress,
            transfer_rate: self.speed.clone(),
            eta: self.eta.clone(),
            bytes_done: self.downloaded_bytes,
            bytes_total: self.total_bytes,
            sequence,
        }
        .normalized()
    }
}

impl JobRecord {
    /// Convert into a full-record update tagged with `origin`.
    pub fn into_update(self, origin: UpdateOrigin) -> JobUpdate {
        let mut update = JobUpdate::new(self.id, origin).with_status(self.status);
        update.source_url = Some(self.url);
        update.title = non_empty(self.title);
        update.thumbnail_ref = non_empty(self.thumbnail_url);
        update.error_detail = non_empty(self.error_message);
        update.file_size = self.file_size;
        update.created_at = self.created_at;
        // A record's download_info is only meaningful while it is running.
        if self.status == JobStatus::InProgress {
            update.progress = self.download_info.map(|info| info.to_progress(None));
        }
        update
    }
}

pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::String(s)) => non_empty(Some(s)),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn lenient_f64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().trim_end_matches('%').trim().parse().ok(),
        _ => None,
    })
}

fn lenient_u64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

fn lenient_timestamp<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Timestamp>, D::Error> {
    let Some(raw) = Option::<String>::deserialize(d)? else {
        return Ok(None);
    };
    if let Ok(ts) = chrono::DateTime::parse_from_rfc3339(&raw) {
        return Ok(Some(ts.with_timezone(&Utc)));
    }
    // Naive timestamps from the service are UTC.
    Ok(NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc()))
}
