//! 파일 tailer — 로그 파일을 따라가며 라인을 수집합니다.
//!
//! `tail -f`와 유사한 동작을 폴링으로 구현합니다. 라인은 개행이
//! 제거된 [`LogLine`]으로 bounded 채널에 전달됩니다.
//!
//! # 로테이션 감지
//! - inode 변경 감지 (logrotate 등)
//! - 파일 크기 축소 감지 (truncation)
//! - 새 파일 자동 열기
//!
//! one-shot 모드에서는 각 파일을 처음부터 EOF까지 한 번 읽고 채널을
//! 닫은 뒤 종료합니다. 채널이 닫히는 것이 loader의 종료 신호입니다.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs::{metadata, File};
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use metrail_core::telemetry::{self, LABEL_LOGFILE};
use metrail_core::{LogLine, MetrailError, PipelineError};

/// tailer 설정
#[derive(Debug, Clone)]
pub struct TailerConfig {
    /// 감시할 파일 경로 목록
    pub paths: Vec<PathBuf>,
    /// 파일 상태 체크 주기 (밀리초)
    pub poll_interval_ms: u64,
    /// 최대 라인 길이 (바이트). 초과분은 잘리고 에러로 집계
    pub max_line_length: usize,
    /// true면 처음부터 EOF까지 한 번 읽고 종료
    pub one_shot: bool,
}

impl Default for TailerConfig {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            poll_interval_ms: 250,
            max_line_length: 64 * 1024,
            one_shot: false,
        }
    }
}

/// 파일별 추적 상태
#[derive(Debug)]
struct FileState {
    path: PathBuf,
    /// 마지막 읽기 위치 (바이트 오프셋)
    offset: u64,
    /// 현재 파일의 inode (Unix 전용)
    #[cfg(unix)]
    inode: Option<u64>,
}

/// 폴링 파일 tailer
///
/// `run()`은 one-shot이 아니면 취소될 때까지 실행됩니다.
/// `tokio::spawn`으로 별도 태스크에서 호출하세요. 송신측이 이 tailer
/// 하나뿐이면 종료 시 채널이 닫혀 loader가 드레인을 시작합니다.
pub struct Tailer {
    config: TailerConfig,
    tx: mpsc::Sender<LogLine>,
    cancel: CancellationToken,
    file_states: Vec<FileState>,
}

impl Tailer {
    /// 새 tailer를 생성합니다.
    pub fn new(config: TailerConfig, tx: mpsc::Sender<LogLine>, cancel: CancellationToken) -> Self {
        let file_states = config
            .paths
            .iter()
            .map(|path| FileState {
                path: path.clone(),
                offset: 0,
                #[cfg(unix)]
                inode: None,
            })
            .collect();
        Self {
            config,
            tx,
            cancel,
            file_states,
        }
    }

    /// tailer를 실행합니다.
    pub async fn run(mut self) -> Result<(), MetrailError> {
        info!(
            files = self.file_states.len(),
            one_shot = self.config.one_shot,
            "starting tailer"
        );

        if self.config.one_shot {
            for i in 0..self.file_states.len() {
                self.poll_file(i).await?;
            }
            // tx가 drop되며 채널이 닫힘 -- loader 종료 트리거
            info!("one-shot read complete, closing lines channel");
            return Ok(());
        }

        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        loop {
            for i in 0..self.file_states.len() {
                if let Err(e) = self.poll_file(i).await {
                    // 채널이 닫힌 경우에만 종료, I/O 에러는 다음 폴에서 재시도
                    if matches!(
                        e,
                        MetrailError::Pipeline(PipelineError::ChannelSend(_))
                    ) {
                        return Err(e);
                    }
                }
            }
            tokio::select! {
                _ = sleep(poll_interval) => {}
                _ = self.cancel.cancelled() => {
                    info!("tailer cancelled");
                    return Ok(());
                }
            }
        }
    }

    /// 파일 하나의 로테이션/truncation을 확인하고 새 라인을 전달합니다.
    async fn poll_file(&mut self, i: usize) -> Result<(), MetrailError> {
        let path = self.file_states[i].path.clone();
        let logfile = path.display().to_string();

        #[cfg(unix)]
        {
            match get_inode(&path).await {
                Ok(current) => {
                    if let Some(last) = self.file_states[i].inode {
                        if last != current {
                            info!(logfile = %logfile, "log rotation detected");
                            metrics::counter!(
                                telemetry::LOG_ROTATIONS_TOTAL,
                                LABEL_LOGFILE => logfile.clone()
                            )
                            .increment(1);
                            self.file_states[i].offset = 0;
                        }
                    }
                    self.file_states[i].inode = Some(current);
                }
                Err(e) => {
                    debug!(logfile = %logfile, error = %e, "stat failed, file may not exist yet");
                    return Ok(());
                }
            }
        }

        match metadata(&path).await {
            Ok(meta) => {
                if meta.len() < self.file_states[i].offset {
                    warn!(
                        logfile = %logfile,
                        size = meta.len(),
                        offset = self.file_states[i].offset,
                        "file truncation detected"
                    );
                    metrics::counter!(
                        telemetry::LOG_TRUNCATES_TOTAL,
                        LABEL_LOGFILE => logfile.clone()
                    )
                    .increment(1);
                    self.file_states[i].offset = 0;
                }
            }
            Err(_) => return Ok(()),
        }

        let offset = self.file_states[i].offset;
        let (lines, new_offset) = match self
            .read_new_lines(&path, offset, self.config.one_shot)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                metrics::counter!(
                    telemetry::LOG_ERRORS_TOTAL,
                    LABEL_LOGFILE => logfile.clone()
                )
                .increment(1);
                warn!(logfile = %logfile, error = %e, "read failed");
                return Ok(());
            }
        };
        self.file_states[i].offset = new_offset;

        if !lines.is_empty() {
            metrics::counter!(
                telemetry::LOG_LINES_TOTAL,
                LABEL_LOGFILE => logfile.clone()
            )
            .increment(lines.len() as u64);
        }
        for text in lines {
            let line = LogLine::new(logfile.clone(), text);
            self.tx.send(line).await.map_err(|e| {
                MetrailError::Pipeline(PipelineError::ChannelSend(e.to_string()))
            })?;
        }
        Ok(())
    }

    /// 오프셋부터 완결된 라인들을 읽습니다.
    ///
    /// 반환값: (라인들, 새 오프셋). follow 모드에서는 개행으로 끝나지
    /// 않은 꼬리를 다음 폴까지 남겨 둡니다. one-shot이면 꼬리도 한
    /// 라인으로 전달합니다.
    async fn read_new_lines(
        &self,
        path: &Path,
        offset: u64,
        deliver_partial: bool,
    ) -> Result<(Vec<String>, u64), std::io::Error> {
        let file = File::open(path).await?;
        let mut reader = BufReader::new(file);
        reader.seek(std::io::SeekFrom::Start(offset)).await?;

        let mut lines = Vec::new();
        let mut current_offset = offset;
        let mut buf = String::new();

        loop {
            buf.clear();
            let bytes_read = reader.read_line(&mut buf).await?;
            if bytes_read == 0 {
                break;
            }

            let complete = buf.ends_with('\n');
            if !complete && !deliver_partial {
                // 아직 쓰는 중인 라인, 오프셋을 전진시키지 않음
                break;
            }

            current_offset += bytes_read as u64;
            let mut text = buf.trim_end_matches(['\n', '\r']).to_owned();
            if text.len() > self.config.max_line_length {
                warn!(
                    logfile = %path.display(),
                    length = text.len(),
                    "line exceeds max length, truncating"
                );
                text.truncate(self.config.max_line_length);
            }
            lines.push(text);
        }

        Ok((lines, current_offset))
    }
}

/// 파일의 inode를 가져옵니다 (Unix 전용).
#[cfg(unix)]
async fn get_inode(path: &Path) -> Result<u64, std::io::Error> {
    use std::os::unix::fs::MetadataExt;

    let meta = metadata(path).await?;
    Ok(meta.ino())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn tailer_for(path: &Path, one_shot: bool) -> (Tailer, mpsc::Receiver<LogLine>) {
        let (tx, rx) = mpsc::channel(64);
        let config = TailerConfig {
            paths: vec![path.to_owned()],
            poll_interval_ms: 10,
            one_shot,
            ..Default::default()
        };
        (Tailer::new(config, tx, CancellationToken::new()), rx)
    }

    #[tokio::test]
    async fn one_shot_reads_all_lines_and_closes_channel() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "line 1").unwrap();
        writeln!(file, "line 2").unwrap();
        file.flush().unwrap();

        let (tailer, mut rx) = tailer_for(file.path(), true);
        tailer.run().await.unwrap();

        assert_eq!(rx.recv().await.unwrap().text, "line 1");
        assert_eq!(rx.recv().await.unwrap().text, "line 2");
        // tailer 종료 후 채널이 닫혀 있어야 함
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn lines_exclude_newline_and_carry_filename() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "GET /index 200").unwrap();
        file.flush().unwrap();

        let (tailer, mut rx) = tailer_for(file.path(), true);
        tailer.run().await.unwrap();

        let line = rx.recv().await.unwrap();
        assert_eq!(line.text, "GET /index 200");
        assert!(!line.text.contains('\n'));
        assert_eq!(line.filename, file.path().display().to_string());
    }

    #[tokio::test]
    async fn follow_mode_picks_up_appended_lines() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "first").unwrap();
        file.flush().unwrap();

        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(64);
        let config = TailerConfig {
            paths: vec![file.path().to_owned()],
            poll_interval_ms: 10,
            one_shot: false,
            ..Default::default()
        };
        let tailer = Tailer::new(config, tx, cancel.clone());
        let handle = tokio::spawn(tailer.run());

        assert_eq!(rx.recv().await.unwrap().text, "first");

        writeln!(file, "second").unwrap();
        file.flush().unwrap();
        assert_eq!(rx.recv().await.unwrap().text, "second");

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn partial_line_is_held_until_newline_arrives() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "incomplete").unwrap();
        file.flush().unwrap();

        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(64);
        let config = TailerConfig {
            paths: vec![file.path().to_owned()],
            poll_interval_ms: 10,
            one_shot: false,
            ..Default::default()
        };
        let tailer = Tailer::new(config, tx, cancel.clone());
        let handle = tokio::spawn(tailer.run());

        // 개행 전에는 전달되지 않음
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());

        writeln!(file, " now").unwrap();
        file.flush().unwrap();
        assert_eq!(rx.recv().await.unwrap().text, "incomplete now");

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn rotation_resets_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        tokio::fs::write(&path, "old line\n").await.unwrap();

        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(64);
        let config = TailerConfig {
            paths: vec![path.clone()],
            poll_interval_ms: 10,
            one_shot: false,
            ..Default::default()
        };
        let tailer = Tailer::new(config, tx, cancel.clone());
        let handle = tokio::spawn(tailer.run());

        assert_eq!(rx.recv().await.unwrap().text, "old line");

        // 로테이션: 삭제 후 새 파일 생성 (inode 변경)
        tokio::fs::remove_file(&path).await.unwrap();
        tokio::fs::write(&path, "fresh line\n").await.unwrap();

        assert_eq!(rx.recv().await.unwrap().text, "fresh line");

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }
}
