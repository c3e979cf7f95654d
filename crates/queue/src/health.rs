//! Source health checks.

use crate::config::{FileQueueConfig, RedpandaConfig, SourceKind};
use crate::consumer::build_client;
use tracing::{debug, error, warn};

/// Check Redpanda connection health and that the topic exists.
pub async fn check_connection(config: &RedpandaConfig) -> bool {
    let client = match build_client(config).await {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to connect to Redpanda: {}", e);
            return false;
        }
    };

    match client.list_topics().await {
        Ok(topics) => {
            let found = topics.iter().any(|t| t.name == config.topic);
            if found {
                debug!(topics = topics.len(), "Redpanda connection healthy");
            } else {
                error!(topic = %config.topic, "Topic not found on Redpanda");
            }
            found
        }
        Err(e) => {
            error!("Failed to list Redpanda topics: {}", e);
            false
        }
    }
}

/// Check that the queue file is readable. A missing file is healthy: it just has no records yet.
pub async fn check_file_queue(config: &FileQueueConfig) -> bool {
    match tokio::fs::metadata(&config.path).await {
        Ok(meta) if meta.is_file() => true,
        Ok(_) => {
            error!(path = %config.path.display(), "Queue path is not a file");
            false
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %config.path.display(), "Queue file not found yet");
            true
        }
        Err(e) => {
            error!(path = %config.path.display(), error = %e, "Queue file unreadable");
            false
        }
    }
}

/// Check whichever source `kind` selects.
pub async fn check_source(
    kind: SourceKind,
    redpanda: &RedpandaConfig,
    file_queue: &FileQueueConfig,
) -> bool {
    match kind {
        SourceKind::Redpanda => check_connection(redpanda).await,
        SourceKind::File => check_file_queue(file_queue).await,
    }
}
