//! Nginx access-log statistics.
//!
//! Report layout:
//!
//! ```text
//! 94778 logs
//! Methods:
//!     method GET: 93842
//!     method POST: 229
//!     method PUT: 0
//!     method PATCH: 0
//!     method DELETE: 0
//! 47415 status check
//! IPs:
//!     172.31.63.67: 15805
//!     172.31.2.14: 15805
//! ```
//!
//! Indented lines start with a tab.

use std::fmt;

use bson::{doc, Bson, Document};
use tally_core::{CountMode, DocumentError, TallyResult};
use tracing::debug;

use crate::collection::DocumentCollection;
use crate::query::as_f64;

/// HTTP methods reported, in report order.
pub const METHODS: [&str; 5] = ["GET", "POST", "PUT", "PATCH", "DELETE"];

/// Number of addresses in the top-IP section.
pub const TOP_IP_LIMIT: i32 = 10;

/// One row of the top-IP section.
#[derive(Debug, Clone, PartialEq)]
pub struct IpCount {
    pub ip: String,
    pub count: u64,
}

/// Aggregate statistics over a log collection.
#[derive(Debug, Clone, PartialEq)]
pub struct LogStats {
    pub total: u64,
    /// Counts per method, in [`METHODS`] order.
    pub methods: Vec<(String, u64)>,
    /// `GET /status` requests.
    pub status_checks: u64,
    /// Present only when requested.
    pub top_ips: Option<Vec<IpCount>>,
}

impl LogStats {
    /// Report lines, without trailing newlines.
    pub fn lines(&self) -> Vec<String> {
        let mut lines = vec![format!("{} logs", self.total), "Methods:".to_string()];
        for (method, count) in &self.methods {
            lines.push(format!("\tmethod {}: {}", method, count));
        }
        lines.push(format!("{} status check", self.status_checks));
        if let Some(top_ips) = &self.top_ips {
            lines.push("IPs:".to_string());
            for row in top_ips {
                lines.push(format!("\t{}: {}", row.ip, row.count));
            }
        }
        lines
    }
}

impl fmt::Display for LogStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in self.lines() {
            writeln!(f, "{}", line)?;
        }
        Ok(())
    }
}

/// Pipeline yielding the most frequent client addresses.
pub fn top_ips_pipeline() -> Vec<Document> {
    vec![
        doc! { "$group": { "_id": "$ip", "count": { "$sum": 1 } } },
        doc! { "$sort": { "count": -1 } },
        doc! { "$limit": TOP_IP_LIMIT },
    ]
}

/// Gather statistics from `collection`.
pub async fn log_stats(
    collection: &dyn DocumentCollection,
    mode: CountMode,
    include_top_ips: bool,
) -> TallyResult<LogStats> {
    let total = match mode {
        CountMode::Exact => collection.count_documents(doc! {}).await?,
        CountMode::Estimated => collection.estimated_document_count().await?,
    };

    let mut methods = Vec::with_capacity(METHODS.len());
    for method in METHODS {
        let count = collection.count_documents(doc! { "method": method }).await?;
        methods.push((method.to_string(), count));
    }

    let status_checks = collection
        .count_documents(doc! { "method": "GET", "path": "/status" })
        .await?;

    let top_ips = if include_top_ips {
        let rows = collection.aggregate(top_ips_pipeline()).await?;
        Some(rows.iter().map(ip_count).collect::<Result<Vec<_>, _>>()?)
    } else {
        None
    };

    debug!(collection = collection.name(), total, ?mode, "Collected log stats");
    Ok(LogStats {
        total,
        methods,
        status_checks,
        top_ips,
    })
}

fn ip_count(row: &Document) -> Result<IpCount, DocumentError> {
    let ip = match row.get("_id") {
        Some(Bson::String(ip)) => ip.clone(),
        Some(Bson::Null) | None => "None".to_string(),
        Some(other) => other.to_string(),
    };
    let count = row
        .get("count")
        .and_then(as_f64)
        .filter(|n| *n >= 0.0)
        .ok_or_else(|| DocumentError::Malformed {
            reason: format!("top-IP row without a count: {}", row),
        })?;
    Ok(IpCount {
        ip,
        count: count as u64,
    })
}
