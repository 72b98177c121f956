//! 프로그램 디렉토리 감시자
//!
//! `programPath` 아래의 프로그램 소스 파일을 폴링으로 감시하여
//! 생성/수정/삭제 이벤트를 loader에 전달합니다. mtime과 크기 변화로
//! 수정을 감지합니다.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use metrail_core::telemetry;

/// 프로그램 파일 변경 이벤트
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgramEvent {
    /// 새 파일 생성
    Created(PathBuf),
    /// 기존 파일 수정
    Modified(PathBuf),
    /// 파일 삭제
    Deleted(PathBuf),
}

impl ProgramEvent {
    /// 이벤트 대상 경로를 반환합니다.
    pub fn path(&self) -> &PathBuf {
        match self {
            Self::Created(p) | Self::Modified(p) | Self::Deleted(p) => p,
        }
    }
}

/// 감시자 설정
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// 감시할 디렉토리
    pub dir: PathBuf,
    /// 프로그램 파일 확장자 (점 제외)
    pub extension: String,
    /// 폴링 주기 (밀리초)
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileSig {
    mtime: SystemTime,
    size: u64,
}

/// 폴링 기반 프로그램 디렉토리 감시자
pub struct ProgramWatcher {
    config: WatcherConfig,
    tx: mpsc::Sender<ProgramEvent>,
    cancel: CancellationToken,
    known: HashMap<PathBuf, FileSig>,
}

impl ProgramWatcher {
    /// 새 감시자를 생성합니다.
    pub fn new(
        config: WatcherConfig,
        tx: mpsc::Sender<ProgramEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            tx,
            cancel,
            known: HashMap::new(),
        }
    }

    /// 감시자를 실행합니다. 취소될 때까지 실행됩니다.
    ///
    /// 시작 시점의 기존 파일은 이벤트 없이 기준 상태로 등록됩니다.
    /// 초기 로드는 loader가 직접 수행하기 때문입니다.
    pub async fn run(mut self) {
        info!(dir = %self.config.dir.display(), "starting program watcher");

        // 초기 스캔: 기준 상태만 수집
        if let Ok(initial) = self.scan().await {
            self.known = initial;
        }

        let interval = Duration::from_millis(self.config.poll_interval_ms);
        loop {
            tokio::select! {
                _ = sleep(interval) => {}
                _ = self.cancel.cancelled() => {
                    info!("program watcher cancelled");
                    return;
                }
            }

            let current = match self.scan().await {
                Ok(current) => current,
                Err(e) => {
                    metrics::counter!(telemetry::WATCHER_ERRORS_TOTAL).increment(1);
                    warn!(
                        dir = %self.config.dir.display(),
                        error = %e,
                        "program directory scan failed"
                    );
                    continue;
                }
            };

            let mut events = Vec::new();
            for (path, sig) in &current {
                match self.known.get(path) {
                    None => events.push(ProgramEvent::Created(path.clone())),
                    Some(old) if old != sig => {
                        events.push(ProgramEvent::Modified(path.clone()));
                    }
                    Some(_) => {}
                }
            }
            for path in self.known.keys() {
                if !current.contains_key(path) {
                    events.push(ProgramEvent::Deleted(path.clone()));
                }
            }
            self.known = current;

            for event in events {
                debug!(?event, "program file event");
                if self.tx.send(event).await.is_err() {
                    // loader가 종료됨
                    return;
                }
            }
        }
    }

    /// 디렉토리의 프로그램 파일과 시그니처를 수집합니다.
    async fn scan(&self) -> Result<HashMap<PathBuf, FileSig>, std::io::Error> {
        let mut out = HashMap::new();
        let mut entries = tokio::fs::read_dir(&self.config.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path
                .extension()
                .is_none_or(|ext| ext != self.config.extension.as_str())
            {
                continue;
            }
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            let sig = FileSig {
                mtime: meta.modified()?,
                size: meta.len(),
            };
            out.insert(path, sig);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn start_watcher(
        dir: &std::path::Path,
    ) -> (
        mpsc::Receiver<ProgramEvent>,
        CancellationToken,
        tokio::task::JoinHandle<()>,
    ) {
        let (tx, rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let watcher = ProgramWatcher::new(
            WatcherConfig {
                dir: dir.to_owned(),
                extension: "mtl".to_owned(),
                poll_interval_ms: 10,
            },
            tx,
            cancel.clone(),
        );
        let handle = tokio::spawn(watcher.run());
        (rx, cancel, handle)
    }

    #[tokio::test]
    async fn create_modify_delete_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let (mut rx, cancel, handle) = start_watcher(dir.path()).await;

        let path = dir.path().join("new.mtl");
        tokio::fs::write(&path, "counter a\n").await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), ProgramEvent::Created(path.clone()));

        // 크기가 달라지는 수정
        tokio::fs::write(&path, "counter a\ncounter b\n")
            .await
            .unwrap();
        assert_eq!(
            rx.recv().await.unwrap(),
            ProgramEvent::Modified(path.clone())
        );

        tokio::fs::remove_file(&path).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), ProgramEvent::Deleted(path));

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn preexisting_files_do_not_emit_events() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("existing.mtl");
        tokio::fs::write(&path, "counter a\n").await.unwrap();

        let (mut rx, cancel, handle) = start_watcher(dir.path()).await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn non_program_files_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let (mut rx, cancel, handle) = start_watcher(dir.path()).await;

        tokio::fs::write(dir.path().join("notes.txt"), "hello")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());

        cancel.cancel();
        handle.await.unwrap();
    }
}
