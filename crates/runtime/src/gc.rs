//! 만료 메트릭 GC 태스크
//!
//! 설정된 주기마다 스토어의 TTL 지난 datum을 제거합니다. core의
//! [`Pipeline`] trait을 구현하여 데몬이 다른 모듈과 동일한
//! 생명주기(start/stop/health_check)로 관리합니다.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::info;

use metrail_core::{HealthStatus, MetrailError, Pipeline, PipelineError};

use crate::store::Store;

/// 만료 메트릭 GC 루프
pub struct StoreGc {
    store: Arc<Store>,
    tick: Duration,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl StoreGc {
    /// 새 GC 태스크를 생성합니다. `tick`이 0이면 start가 즉시 성공하되
    /// 루프는 돌지 않습니다.
    pub fn new(store: Arc<Store>, tick: Duration) -> Self {
        Self {
            store,
            tick,
            cancel: CancellationToken::new(),
            task: None,
        }
    }
}

impl Pipeline for StoreGc {
    async fn start(&mut self) -> Result<(), MetrailError> {
        if self.task.is_some() {
            return Err(PipelineError::AlreadyRunning.into());
        }
        if self.tick.is_zero() {
            info!("metric gc disabled (zero interval)");
            return Ok(());
        }

        let store = Arc::clone(&self.store);
        let tick = self.tick;
        let cancel = self.cancel.clone();
        self.task = Some(tokio::spawn(async move {
            let mut timer = interval(tick);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // 첫 tick은 즉시 발화하므로 소비
            timer.tick().await;
            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        store.gc(SystemTime::now());
                    }
                    _ = cancel.cancelled() => return,
                }
            }
        }));
        info!(interval_secs = self.tick.as_secs(), "metric gc started");
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), MetrailError> {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        match &self.task {
            Some(task) if !task.is_finished() => HealthStatus::Healthy,
            Some(_) => HealthStatus::Unhealthy("gc task exited".to_owned()),
            None if self.tick.is_zero() => HealthStatus::Healthy,
            None => HealthStatus::Unhealthy("not started".to_owned()),
        }
    }
}
