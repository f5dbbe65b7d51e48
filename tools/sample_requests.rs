//! Sample Assessment Requester
//!
//! Generates random patient records within the form's declared ranges and
//! sends them to the service's NATS endpoint for load and smoke testing.

use gastric_survival_risk::types::{
    AssessmentReply, AssessmentRequest, FeatureCatalog, FeatureKind, FeatureSpec,
};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, warn};

/// Patient record generator for testing
struct PatientGenerator {
    rng: rand::rngs::ThreadRng,
    catalog: FeatureCatalog,
    request_counter: u64,
}

impl PatientGenerator {
    fn new(catalog: FeatureCatalog) -> Self {
        Self {
            rng: rand::thread_rng(),
            catalog,
            request_counter: 0,
        }
    }

    /// Generate a complete record
    fn generate(&mut self) -> AssessmentRequest {
        self.request_counter += 1;

        let features: HashMap<String, f64> = self
            .catalog
            .clone()
            .iter()
            .map(|spec| (spec.name.clone(), self.sample(spec)))
            .collect();

        AssessmentRequest {
            request_id: Some(format!("req_{:08}", self.request_counter)),
            features,
        }
    }

    /// Generate a record with one feature left out
    fn generate_incomplete(&mut self) -> AssessmentRequest {
        let mut request = self.generate();
        let names = self.catalog.names();
        if let Some(name) = names.choose(&mut self.rng) {
            request.features.remove(name);
        }
        request
    }

    fn sample(&mut self, spec: &FeatureSpec) -> f64 {
        match &spec.kind {
            FeatureKind::Numerical { min, max, step } => {
                let value = self.rng.gen_range(*min..=*max);
                if *step > 0.0 {
                    ((value / step).round() * step).clamp(*min, *max)
                } else {
                    value
                }
            }
            FeatureKind::Categorical { options } => options
                .choose(&mut self.rng)
                .map(|o| o.value)
                .unwrap_or(spec.default),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sample_requests=info".parse()?),
        )
        .init();

    info!("Starting Sample Assessment Requester");

    // Parse arguments
    let args: Vec<String> = std::env::args().collect();
    let nats_url = args.get(1).map(|s| s.as_str()).unwrap_or("nats://localhost:4222");
    let subject = args.get(2).map(|s| s.as_str()).unwrap_or("risk.assess");
    let count: u64 = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(100);
    let incomplete_rate: f64 = args.get(4).and_then(|s| s.parse().ok()).unwrap_or(0.05);
    let delay_ms: u64 = args.get(5).and_then(|s| s.parse().ok()).unwrap_or(100);

    info!(
        nats_url = %nats_url,
        subject = %subject,
        count = count,
        incomplete_rate = incomplete_rate,
        delay_ms = delay_ms,
        "Configuration loaded"
    );

    let catalog = FeatureCatalog::gastric_cancer();

    // Connect to NATS
    let client = match async_nats::connect(nats_url).await {
        Ok(c) => {
            info!("Connected to NATS");
            c
        }
        Err(e) => {
            warn!(error = %e, "Failed to connect to NATS. Running in dry-run mode.");
            return run_dry_mode(catalog, count, incomplete_rate, delay_ms).await;
        }
    };

    let mut generator = PatientGenerator::new(catalog);
    let mut rng = rand::thread_rng();
    let mut tiers: HashMap<String, u64> = HashMap::new();
    let mut errors: HashMap<String, u64> = HashMap::new();

    info!("Starting to send {} requests...", count);

    for i in 0..count {
        let request = if rng.gen_bool(incomplete_rate.clamp(0.0, 1.0)) {
            generator.generate_incomplete()
        } else {
            generator.generate()
        };

        let payload = serde_json::to_vec(&request)?;
        match client.request(subject.to_string(), payload.into()).await {
            Ok(message) => match serde_json::from_slice::<AssessmentReply>(&message.payload) {
                Ok(AssessmentReply::Report(report)) => {
                    *tiers.entry(report.risk_tier().to_string()).or_insert(0) += 1;
                }
                Ok(AssessmentReply::Error(e)) => {
                    *errors.entry(e.kind).or_insert(0) += 1;
                }
                Err(e) => warn!(error = %e, "Undecodable reply"),
            },
            Err(e) => {
                warn!(error = %e, "Request failed");
                *errors.entry("transport".to_string()).or_insert(0) += 1;
            }
        }

        if (i + 1) % 10 == 0 {
            info!(
                "Sent {}/{} requests (tiers: {:?}, errors: {:?})",
                i + 1,
                count,
                tiers,
                errors
            );
        }

        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }

    info!(
        "Completed! Sent {} requests (tiers: {:?}, errors: {:?})",
        count, tiers, errors
    );

    Ok(())
}

async fn run_dry_mode(
    catalog: FeatureCatalog,
    count: u64,
    incomplete_rate: f64,
    delay_ms: u64,
) -> anyhow::Result<()> {
    info!("Running in dry-run mode (no NATS connection)");

    let mut generator = PatientGenerator::new(catalog);
    let mut rng = rand::thread_rng();

    for i in 0..count {
        let request = if rng.gen_bool(incomplete_rate.clamp(0.0, 1.0)) {
            generator.generate_incomplete()
        } else {
            generator.generate()
        };

        let json = serde_json::to_string_pretty(&request)?;

        if (i + 1) % 10 == 0 || i == 0 {
            info!("Sample request {}:\n{}", i + 1, json);
        }

        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }

    Ok(())
}
