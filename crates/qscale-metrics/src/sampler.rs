//! Metric sampler: reads the backlog depth of one queue.
//!
//! A failed or timed-out read never propagates: it is logged and handed to
//! the alarm evaluator as a missing sample.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use qscale_core::{
    BackendError, BacklogSample, BacklogSource, ControllerError, Epoch, with_timeout,
};

pub struct MetricSampler {
    source: Arc<dyn BacklogSource>,
    queue_id: String,
    call_timeout: Duration,
    /// Reads that produced no sample.
    missing: u64,
}

impl MetricSampler {
    pub fn new(source: Arc<dyn BacklogSource>, queue_id: &str, call_timeout: Duration) -> Self {
        Self {
            source,
            queue_id: queue_id.to_string(),
            call_timeout,
            missing: 0,
        }
    }

    /// Read the queue once, classifying failures as transient.
    pub async fn read(&self, epoch: Epoch) -> Result<BacklogSample, ControllerError> {
        let depth = with_timeout(self.call_timeout, self.source.sample_backlog(&self.queue_id))
            .await
            .map_err(ControllerError::TransientRead)?;

        if !depth.is_finite() || depth < 0.0 {
            return Err(ControllerError::TransientRead(BackendError::Protocol(
                format!("invalid backlog depth {depth}"),
            )));
        }

        Ok(BacklogSample { epoch, depth })
    }

    /// Take one sample; `None` when the read failed.
    pub async fn sample(&mut self, epoch: Epoch) -> Option<BacklogSample> {
        match self.read(epoch).await {
            Ok(sample) => {
                debug!(queue = %self.queue_id, depth = sample.depth, "backlog sampled");
                Some(sample)
            }
            Err(e) => {
                self.missing += 1;
                warn!(
                    queue = %self.queue_id,
                    error = %e,
                    missing = self.missing,
                    "backlog read failed, recording missing sample"
                );
                None
            }
        }
    }

    pub fn missing_samples(&self) -> u64 {
        self.missing
    }

    pub fn queue_id(&self) -> &str {
        &self.queue_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use qscale_core::BackendResult;

    /// Returns scripted responses in order, then repeats the last one.
    struct Scripted(Mutex<Vec<BackendResult<f64>>>);

    #[async_trait]
    impl BacklogSource for Scripted {
        async fn sample_backlog(&self, _queue_id: &str) -> BackendResult<f64> {
            let mut script = self.0.lock().unwrap();
            if script.len() > 1 {
                script.remove(0)
            } else {
                script[0].clone()
            }
        }
    }

    struct Hanging;

    #[async_trait]
    impl BacklogSource for Hanging {
        async fn sample_backlog(&self, _queue_id: &str) -> BackendResult<f64> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(0.0)
        }
    }

    fn sampler(script: Vec<BackendResult<f64>>) -> MetricSampler {
        MetricSampler::new(Arc::new(Scripted(Mutex::new(script))), "jobs", Duration::from_secs(5))
    }

    #[tokio::test]
    async fn successful_read_produces_sample() {
        let mut s = sampler(vec![Ok(7.0)]);
        let sample = s.sample(1000).await.unwrap();
        assert_eq!(sample, BacklogSample { epoch: 1000, depth: 7.0 });
        assert_eq!(s.missing_samples(), 0);
    }

    #[tokio::test]
    async fn failed_read_becomes_missing_sample() {
        let mut s = sampler(vec![Err(BackendError::Unavailable("queue".into())), Ok(2.0)]);

        assert!(s.sample(1000).await.is_none());
        assert_eq!(s.missing_samples(), 1);

        // The loop keeps going on the next period.
        assert_eq!(s.sample(1030).await.unwrap().depth, 2.0);
    }

    #[tokio::test]
    async fn invalid_depth_is_transient() {
        let s = sampler(vec![Ok(f64::NAN)]);
        let err = s.read(1000).await.unwrap_err();
        assert!(matches!(err, ControllerError::TransientRead(BackendError::Protocol(_))));

        let s = sampler(vec![Ok(-1.0)]);
        assert!(s.read(1000).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_read_times_out() {
        let mut s = MetricSampler::new(Arc::new(Hanging), "jobs", Duration::from_secs(5));
        assert!(s.sample(1000).await.is_none());
        assert_eq!(s.missing_samples(), 1);
    }
}
