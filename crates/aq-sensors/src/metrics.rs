use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

#[derive(Clone)]
pub struct SamplerMetrics {
    pub samples: IntCounter,
    pub sample_errors: IntCounter,
    pub retries: IntCounter,
    pub cache_resets: IntCounter,
    pub sensors_enabled: IntGauge,
}

#[derive(Clone)]
pub struct MetricsHub {
    pub registry: Registry,
    pub sampler: SamplerMetrics,
}

impl MetricsHub {
    pub fn new() -> Result<Self, String> {
        let registry = Registry::new();
        let samples = IntCounter::new("aq_samples", "Total samples collected")
            .map_err(|e| format!("metrics init error: {e}"))?;
        let sample_errors = IntCounter::new("aq_sample_errors", "Total failed sensor polls")
            .map_err(|e| format!("metrics init error: {e}"))?;
        let retries = IntCounter::new("aq_retries", "Total retried sensor polls")
            .map_err(|e| format!("metrics init error: {e}"))?;
        let cache_resets =
            IntCounter::new("aq_cache_resets", "Register caches reset after retry exhaustion")
                .map_err(|e| format!("metrics init error: {e}"))?;
        let sensors_enabled = IntGauge::new("aq_sensors_enabled", "Number of sensors being polled")
            .map_err(|e| format!("metrics init error: {e}"))?;
        let sampler = SamplerMetrics {
            samples,
            sample_errors,
            retries,
            cache_resets,
            sensors_enabled,
        };
        let _ = registry.register(Box::new(sampler.samples.clone()));
        let _ = registry.register(Box::new(sampler.sample_errors.clone()));
        let _ = registry.register(Box::new(sampler.retries.clone()));
        let _ = registry.register(Box::new(sampler.cache_resets.clone()));
        let _ = registry.register(Box::new(sampler.sensors_enabled.clone()));
        Ok(Self { registry, sampler })
    }

    pub fn encode_text(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buf) {
            return format!("error encoding metrics: {e}");
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}
