//! NATS reply publisher for assessment results

use crate::types::assessment::AssessmentReply;
use anyhow::Result;
use async_nats::{Client, Subject};
use tracing::debug;

/// Publishes assessment replies to the requester's inbox
#[derive(Clone)]
pub struct ReplyPublisher {
    client: Client,
}

impl ReplyPublisher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Publish a reply to the given inbox subject
    pub async fn publish(&self, reply_to: Subject, reply: &AssessmentReply) -> Result<()> {
        let payload = serde_json::to_vec(reply)?;

        self.client.publish(reply_to.clone(), payload.into()).await?;

        match reply {
            AssessmentReply::Report(report) => debug!(
                reply_to = %reply_to,
                assessment_id = %report.assessment_id,
                risk_tier = %report.risk_tier(),
                "Published assessment reply"
            ),
            AssessmentReply::Error(e) => debug!(
                reply_to = %reply_to,
                kind = %e.kind,
                "Published error reply"
            ),
        }

        Ok(())
    }
}
