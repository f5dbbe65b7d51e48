//! NATS request consumer for incoming assessments

use crate::pipeline::RiskService;
use crate::types::assessment::{AssessmentReply, AssessmentRequest, ErrorReply};
use anyhow::Result;
use async_nats::{Client, Subscriber};
use tracing::{info, warn};

/// Consumer receiving assessment requests from NATS.
///
/// Replicas share a queue group so each request is served once.
pub struct AssessmentConsumer {
    client: Client,
    subject: String,
    queue_group: String,
}

impl AssessmentConsumer {
    pub fn new(client: Client, subject: &str, queue_group: &str) -> Self {
        Self {
            client,
            subject: subject.to_string(),
            queue_group: queue_group.to_string(),
        }
    }

    /// Subscribe to the request subject within the queue group
    pub async fn subscribe(&self) -> Result<Subscriber> {
        let subscriber = self
            .client
            .queue_subscribe(self.subject.clone(), self.queue_group.clone())
            .await?;
        info!(
            subject = %self.subject,
            queue_group = %self.queue_group,
            "Subscribed to assessment subject"
        );
        Ok(subscriber)
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }
}

/// Decode one request payload and assess it
pub fn respond(service: &RiskService, payload: &[u8]) -> AssessmentReply {
    let request: AssessmentRequest = match serde_json::from_slice(payload) {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "Failed to deserialize assessment request");
            return AssessmentReply::Error(ErrorReply::new("bad_request", e));
        }
    };

    match service.assess(&request) {
        Ok(report) => AssessmentReply::Report(Box::new(report)),
        Err(e) => AssessmentReply::Error(ErrorReply {
            error: e.to_string(),
            kind: e.kind().to_string(),
            missing_features: e.missing_features().map(<[String]>::to_vec),
        }),
    }
}
