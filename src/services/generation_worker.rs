use crate::services::generation_queue::{GenerationQueueState, Task};
use regex::Regex;
use std::future::Future;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, LazyLock};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::Notify;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::LinesStream;
use tracing::{error, info, trace};

static PROGRESS_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^progress\s+(\d+)\s*/\s*(\d+)$").expect("hard-coded regex should always compile")
});
static OUTPUT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^output\s+(.+)$").expect("hard-coded regex should always compile")
});

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Generation command is empty")]
    EmptyCommand,
    #[error("I/O error while running generator: {0}")]
    Io(#[from] std::io::Error),
    #[error("Unable to encode task parameters: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("Generator exited with {0}")]
    Failed(ExitStatus),
}

/// Forwards step updates for one task into the shared queue.
#[derive(Clone)]
pub struct ProgressSink {
    queue: GenerationQueueState,
    task_id: u64,
}

impl ProgressSink {
    pub fn new(queue: GenerationQueueState, task_id: u64) -> Self {
        Self { queue, task_id }
    }

    pub async fn report(&self, step: u32, total: u32) {
        self.queue
            .lock()
            .await
            .report_progress(self.task_id, step, total);
    }
}

/// Runs a single task to completion, returning the produced file names.
pub trait Generator: Send + Sync + 'static {
    fn generate(
        &self,
        task: &Task,
        progress: ProgressSink,
    ) -> impl Future<Output = Result<Vec<String>, GenerationError>> + Send;
}

/// Delegates generation to an external program. Task parameters are written
/// to its stdin as JSON; it reports back on stdout with `progress N/M` and
/// `output FILENAME` lines.
pub struct ProcessGenerator {
    command: Vec<String>,
    save_path: PathBuf,
}

impl ProcessGenerator {
    pub fn new(command: Vec<String>, save_path: PathBuf) -> Self {
        Self { command, save_path }
    }
}

#[derive(Debug, PartialEq)]
enum GeneratorLine {
    Progress(u32, u32),
    Output(String),
}

fn parse_line(line: &str) -> Option<GeneratorLine> {
    let line = line.trim();
    if let Some(caps) = PROGRESS_LINE.captures(line) {
        let step = caps[1].parse().ok()?;
        let total = caps[2].parse().ok()?;
        return Some(GeneratorLine::Progress(step, total));
    }
    OUTPUT_LINE
        .captures(line)
        .map(|caps| GeneratorLine::Output(caps[1].trim().to_string()))
}

impl Generator for ProcessGenerator {
    async fn generate(
        &self,
        task: &Task,
        progress: ProgressSink,
    ) -> Result<Vec<String>, GenerationError> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or(GenerationError::EmptyCommand)?;
        let payload = serde_json::to_vec(&task.params)?;

        let mut child = Command::new(program)
            .args(args)
            .env("WGP_TASK_ID", task.id.to_string())
            .env("WGP_REPEATS", task.repeats.to_string())
            .env("WGP_SAVE_PATH", &self.save_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            // A generator may exit without consuming its input.
            if let Err(err) = stdin.write_all(&payload).await
                && err.kind() != std::io::ErrorKind::BrokenPipe
            {
                return Err(err.into());
            }
        }

        let mut files = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            let mut lines = LinesStream::new(BufReader::new(stdout).lines());
            while let Some(line) = lines.next().await {
                let line = line?;
                match parse_line(&line) {
                    Some(GeneratorLine::Progress(step, total)) => progress.report(step, total).await,
                    Some(GeneratorLine::Output(file)) => files.push(file),
                    None => trace!("generator: {}", line),
                }
            }
        }

        let status = child.wait().await?;
        if !status.success() {
            return Err(GenerationError::Failed(status));
        }
        Ok(files)
    }
}

/// Processes queued tasks one at a time, sleeping until `notify` fires
/// whenever the queue is empty.
pub async fn run_worker<G: Generator>(
    queue: GenerationQueueState,
    notify: Arc<Notify>,
    generator: G,
) {
    loop {
        let next = queue.lock().await.start_next();
        let Some(task) = next else {
            notify.notified().await;
            continue;
        };

        info!("Generating task {}", task.id);
        let sink = ProgressSink::new(queue.clone(), task.id);
        let outcome = generator.generate(&task, sink).await.map_err(|err| {
            error!("Task {} failed: {}", task.id, err);
            err.to_string()
        });
        queue.lock().await.finish(task.id, outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::generation_queue::{GenerationQueue, NewTask, TaskState, TaskStatus};
    use serde_json::Map;
    use std::time::Duration;
    use tokio::sync::Mutex;

    struct FakeGenerator;

    impl Generator for FakeGenerator {
        async fn generate(
            &self,
            task: &Task,
            progress: ProgressSink,
        ) -> Result<Vec<String>, GenerationError> {
            progress.report(1, 2).await;
            Ok(vec![format!("{}.mp4", task.id)])
        }
    }

    fn new_task() -> NewTask {
        NewTask {
            params: Map::new(),
            prompt: "a lighthouse at dusk".to_string(),
            repeats: 1,
            length: 81,
            steps: 2,
            inputs: Vec::new(),
        }
    }

    async fn wait_until_finished(queue: &GenerationQueueState, task_id: u64) -> TaskState {
        for _ in 0..200 {
            if let Ok(state @ TaskState::Finished(_)) = queue.lock().await.status(task_id) {
                return state;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task {task_id} never finished");
    }

    #[test]
    fn parses_generator_lines() {
        assert_eq!(parse_line("progress 3/30"), Some(GeneratorLine::Progress(3, 30)));
        assert_eq!(parse_line("  progress 3 / 30 "), Some(GeneratorLine::Progress(3, 30)));
        assert_eq!(
            parse_line("output 2025-01-01-clip.mp4"),
            Some(GeneratorLine::Output("2025-01-01-clip.mp4".to_string()))
        );
        assert_eq!(parse_line("loading transformer"), None);
    }

    #[tokio::test]
    async fn worker_drains_queue() {
        let queue: GenerationQueueState = Arc::new(Mutex::new(GenerationQueue::new(10)));
        let notify = Arc::new(Notify::new());
        let worker = tokio::spawn(run_worker(queue.clone(), notify.clone(), FakeGenerator));

        let first = queue.lock().await.submit(new_task());
        notify.notify_one();
        let second = queue.lock().await.submit(new_task());
        notify.notify_one();

        for submitted in [first, second] {
            let TaskState::Finished(result) = wait_until_finished(&queue, submitted.task_id).await
            else {
                unreachable!();
            };
            assert_eq!(result.status, TaskStatus::Completed);
            assert_eq!(result.files, vec![format!("{}.mp4", submitted.task_id)]);
        }
        assert_eq!(queue.lock().await.snapshot().total_tasks, 0);
        worker.abort();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn process_generator_reads_protocol() {
        let queue: GenerationQueueState = Arc::new(Mutex::new(GenerationQueue::new(10)));
        queue.lock().await.submit(new_task());
        let task = queue.lock().await.start_next().unwrap();

        let generator = ProcessGenerator::new(
            vec![
                "sh".to_string(),
                "-c".to_string(),
                "cat > /dev/null; echo 'progress 1/2'; echo 'output clip.mp4'".to_string(),
            ],
            PathBuf::from("outputs"),
        );
        let files = generator
            .generate(&task, ProgressSink::new(queue.clone(), task.id))
            .await
            .unwrap();
        assert_eq!(files, vec!["clip.mp4".to_string()]);

        let TaskState::Pending(progress) = queue.lock().await.status(task.id).unwrap() else {
            panic!("expected task still queued");
        };
        assert_eq!(progress.current_step, 1);
        assert_eq!(progress.progress, 50.0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn process_generator_reports_failure() {
        let queue: GenerationQueueState = Arc::new(Mutex::new(GenerationQueue::new(10)));
        queue.lock().await.submit(new_task());
        let task = queue.lock().await.start_next().unwrap();

        let generator = ProcessGenerator::new(
            vec![
                "sh".to_string(),
                "-c".to_string(),
                "cat > /dev/null; exit 3".to_string(),
            ],
            PathBuf::from("outputs"),
        );
        let err = generator
            .generate(&task, ProgressSink::new(queue.clone(), task.id))
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Failed(_)));
    }
}
