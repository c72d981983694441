use crate::services::input_images::discard_images;
use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const PROMPT_PREVIEW_CHARS: usize = 100;

pub type GenerationQueueState = Arc<Mutex<GenerationQueue>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct Task {
    pub id: u64,
    pub params: Map<String, Value>,
    pub prompt: String,
    pub repeats: u32,
    pub length: u32,
    pub steps: u32,
    pub status: TaskStatus,
    pub created_at: String,
    /// Images staged for this task, deleted when it leaves the queue.
    pub inputs: Vec<PathBuf>,
    started_at: Option<Instant>,
}

/// What a caller supplies when enqueuing; the queue assigns the rest.
pub struct NewTask {
    pub params: Map<String, Value>,
    pub prompt: String,
    pub repeats: u32,
    pub length: u32,
    pub steps: u32,
    pub inputs: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Submitted {
    pub task_id: u64,
    pub position: usize,
    pub estimated_wait: Option<f64>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TaskInfo {
    pub id: u64,
    pub prompt: String,
    pub status: TaskStatus,
    pub length: u32,
    pub steps: u32,
    pub position: usize,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct QueueStatus {
    pub total_tasks: usize,
    pub current_task_id: Option<u64>,
    pub tasks: Vec<TaskInfo>,
    pub is_processing: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TaskProgress {
    pub task_id: u64,
    pub status: TaskStatus,
    pub progress: f64,
    pub current_step: u32,
    pub total_steps: u32,
    pub position: usize,
    pub eta_seconds: Option<f64>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GenerationResult {
    pub task_id: u64,
    pub status: TaskStatus,
    pub files: Vec<String>,
    pub generation_time_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum TaskState {
    Pending(TaskProgress),
    Finished(GenerationResult),
}

#[derive(Debug, Error, PartialEq)]
pub enum QueueError {
    #[error("Task {0} not found")]
    NotFound(u64),
    #[error("Task {0} not found in queue")]
    NotInQueue(u64),
    #[error("Cannot remove task that is currently processing")]
    Busy(u64),
}

pub struct GenerationQueue {
    tasks: VecDeque<Task>,
    last_id: u64,
    in_progress: bool,
    progress: f64,
    current_step: u32,
    completed: BTreeMap<u64, GenerationResult>,
    completed_history: usize,
}

impl GenerationQueue {
    pub fn new(completed_history: usize) -> Self {
        Self {
            tasks: VecDeque::new(),
            last_id: 0,
            in_progress: false,
            progress: 0.0,
            current_step: 0,
            completed: BTreeMap::new(),
            completed_history,
        }
    }

    pub fn submit(&mut self, new_task: NewTask) -> Submitted {
        self.last_id += 1;
        let task = Task {
            id: self.last_id,
            params: new_task.params,
            prompt: new_task.prompt,
            repeats: new_task.repeats,
            length: new_task.length,
            steps: new_task.steps,
            status: TaskStatus::Queued,
            created_at: Utc::now().to_rfc3339(),
            inputs: new_task.inputs,
            started_at: None,
        };
        info!("Queued task {} ({} steps)", task.id, task.steps);
        self.tasks.push_back(task);
        Submitted {
            task_id: self.last_id,
            position: self.tasks.len(),
            estimated_wait: None,
        }
    }

    pub fn snapshot(&self) -> QueueStatus {
        let tasks = self
            .tasks
            .iter()
            .enumerate()
            .map(|(index, task)| TaskInfo {
                id: task.id,
                prompt: task.prompt.chars().take(PROMPT_PREVIEW_CHARS).collect(),
                status: task.status,
                length: task.length,
                steps: task.steps,
                position: index + 1,
                created_at: task.created_at.clone(),
            })
            .collect();
        QueueStatus {
            total_tasks: self.tasks.len(),
            current_task_id: self.tasks.front().map(|task| task.id),
            tasks,
            is_processing: self.in_progress,
        }
    }

    pub fn status(&self, task_id: u64) -> Result<TaskState, QueueError> {
        let Some(index) = self.index_of(task_id) else {
            return self
                .completed
                .get(&task_id)
                .cloned()
                .map(TaskState::Finished)
                .ok_or(QueueError::NotFound(task_id));
        };

        let task = &self.tasks[index];
        let processing = index == 0 && self.in_progress;
        Ok(TaskState::Pending(TaskProgress {
            task_id,
            status: if processing {
                TaskStatus::Processing
            } else {
                TaskStatus::Queued
            },
            progress: if processing { self.progress } else { 0.0 },
            current_step: if processing { self.current_step } else { 0 },
            total_steps: task.steps,
            position: index + 1,
            eta_seconds: None,
        }))
    }

    pub fn remove(&mut self, task_id: u64) -> Result<(), QueueError> {
        let index = self
            .index_of(task_id)
            .ok_or(QueueError::NotInQueue(task_id))?;
        if index == 0 && self.in_progress {
            return Err(QueueError::Busy(task_id));
        }
        if let Some(task) = self.tasks.remove(index) {
            discard_images(&task.inputs);
        }
        info!("Removed task {} from queue", task_id);
        Ok(())
    }

    /// Drops every waiting task, returning how many were removed. The task
    /// being processed is kept.
    pub fn clear(&mut self) -> usize {
        let keep = usize::from(self.in_progress && !self.tasks.is_empty());
        let removed = self.tasks.len() - keep;
        for task in self.tasks.drain(keep..) {
            discard_images(&task.inputs);
        }
        info!("Cleared {} tasks from queue", removed);
        removed
    }

    /// Marks the front task as processing and hands a copy to the worker.
    pub fn start_next(&mut self) -> Option<Task> {
        if self.in_progress {
            return None;
        }
        let task = self.tasks.front_mut()?;
        task.status = TaskStatus::Processing;
        task.started_at = Some(Instant::now());
        let task = task.clone();
        self.in_progress = true;
        self.progress = 0.0;
        self.current_step = 0;
        debug!("Started task {}", task.id);
        Some(task)
    }

    pub fn report_progress(&mut self, task_id: u64, step: u32, total: u32) {
        if !self.in_progress || self.tasks.front().map(|task| task.id) != Some(task_id) {
            return;
        }
        self.current_step = step;
        self.progress = if total == 0 {
            0.0
        } else {
            (f64::from(step) / f64::from(total) * 100.0).clamp(0.0, 100.0)
        };
    }

    /// Moves the processing task into the completed history.
    pub fn finish(&mut self, task_id: u64, outcome: Result<Vec<String>, String>) {
        let Some(index) = self.index_of(task_id) else {
            warn!("Finished task {} is no longer queued", task_id);
            return;
        };
        let Some(task) = self.tasks.remove(index) else {
            return;
        };
        discard_images(&task.inputs);
        self.in_progress = false;
        self.progress = 0.0;
        self.current_step = 0;

        let generation_time_seconds = task.started_at.map(|start| start.elapsed().as_secs_f64());
        let result = match outcome {
            Ok(files) => GenerationResult {
                task_id,
                status: TaskStatus::Completed,
                files,
                generation_time_seconds,
                error: None,
            },
            Err(message) => GenerationResult {
                task_id,
                status: TaskStatus::Failed,
                files: Vec::new(),
                generation_time_seconds,
                error: Some(message),
            },
        };
        info!("Task {} finished with status {:?}", task_id, result.status);
        self.completed.insert(task_id, result);
        while self.completed.len() > self.completed_history {
            self.completed.pop_first();
        }
    }

    fn index_of(&self, task_id: u64) -> Option<usize> {
        self.tasks.iter().position(|task| task.id == task_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_task(prompt: &str) -> NewTask {
        NewTask {
            params: Map::new(),
            prompt: prompt.to_string(),
            repeats: 1,
            length: 81,
            steps: 30,
            inputs: Vec::new(),
        }
    }

    fn task_with_input(queue: &mut GenerationQueue, dir: &std::path::Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, b"image").unwrap();
        queue.submit(NewTask {
            inputs: vec![path.clone()],
            ..new_task(name)
        });
        path
    }

    #[test]
    fn submit_assigns_increasing_ids_and_positions() {
        let mut queue = GenerationQueue::new(10);
        let first = queue.submit(new_task("a cat"));
        let second = queue.submit(new_task("a dog"));
        assert_eq!((first.task_id, first.position), (1, 1));
        assert_eq!((second.task_id, second.position), (2, 2));

        queue.remove(1).unwrap();
        let third = queue.submit(new_task("a bird"));
        assert_eq!((third.task_id, third.position), (3, 2));
    }

    #[test]
    fn snapshot_truncates_prompts() {
        let mut queue = GenerationQueue::new(10);
        queue.submit(new_task(&"x".repeat(250)));
        let snapshot = queue.snapshot();
        assert_eq!(snapshot.total_tasks, 1);
        assert_eq!(snapshot.current_task_id, Some(1));
        assert_eq!(snapshot.tasks[0].prompt.len(), PROMPT_PREVIEW_CHARS);
        assert_eq!(snapshot.tasks[0].position, 1);
        assert!(!snapshot.is_processing);
    }

    #[test]
    fn status_reports_processing_only_for_front_task() {
        let mut queue = GenerationQueue::new(10);
        queue.submit(new_task("a"));
        queue.submit(new_task("b"));
        queue.start_next().unwrap();
        queue.report_progress(1, 15, 30);

        let TaskState::Pending(front) = queue.status(1).unwrap() else {
            panic!("expected pending task");
        };
        assert_eq!(front.status, TaskStatus::Processing);
        assert_eq!(front.progress, 50.0);
        assert_eq!(front.current_step, 15);

        let TaskState::Pending(second) = queue.status(2).unwrap() else {
            panic!("expected pending task");
        };
        assert_eq!(second.status, TaskStatus::Queued);
        assert_eq!(second.progress, 0.0);
        assert_eq!(second.position, 2);

        assert_eq!(queue.status(9), Err(QueueError::NotFound(9)));
    }

    #[test]
    fn processing_task_cannot_be_removed_or_cleared() {
        let mut queue = GenerationQueue::new(10);
        queue.submit(new_task("a"));
        queue.submit(new_task("b"));
        queue.submit(new_task("c"));
        queue.start_next().unwrap();

        assert_eq!(queue.remove(1), Err(QueueError::Busy(1)));
        assert_eq!(queue.remove(7), Err(QueueError::NotInQueue(7)));
        assert_eq!(queue.clear(), 2);
        assert_eq!(queue.snapshot().current_task_id, Some(1));
    }

    #[test]
    fn clear_removes_everything_when_idle() {
        let mut queue = GenerationQueue::new(10);
        queue.submit(new_task("a"));
        queue.submit(new_task("b"));
        assert_eq!(queue.clear(), 2);
        assert_eq!(queue.snapshot().total_tasks, 0);
        assert_eq!(queue.clear(), 0);
    }

    #[test]
    fn finished_tasks_move_to_bounded_history() {
        let mut queue = GenerationQueue::new(2);
        for prompt in ["a", "b", "c"] {
            queue.submit(new_task(prompt));
        }
        for id in 1..=3 {
            let task = queue.start_next().unwrap();
            assert_eq!(task.id, id);
            assert!(queue.start_next().is_none());
            let outcome = if id == 2 {
                Err("out of memory".to_string())
            } else {
                Ok(vec![format!("video_{id}.mp4")])
            };
            queue.finish(id, outcome);
        }

        assert!(!queue.snapshot().is_processing);
        assert_eq!(queue.status(1), Err(QueueError::NotFound(1)));
        let TaskState::Finished(failed) = queue.status(2).unwrap() else {
            panic!("expected finished task");
        };
        assert_eq!(failed.status, TaskStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("out of memory"));
        let TaskState::Finished(done) = queue.status(3).unwrap() else {
            panic!("expected finished task");
        };
        assert_eq!(done.files, vec!["video_3.mp4".to_string()]);
        assert!(done.generation_time_seconds.is_some());
    }

    #[test]
    fn staged_inputs_are_deleted_when_tasks_leave_the_queue() {
        let dir = tempfile::tempdir().unwrap();
        let mut queue = GenerationQueue::new(10);
        let running = task_with_input(&mut queue, dir.path(), "running.png");
        let removed = task_with_input(&mut queue, dir.path(), "removed.png");
        let cleared = task_with_input(&mut queue, dir.path(), "cleared.png");
        queue.start_next().unwrap();

        queue.remove(2).unwrap();
        assert!(!removed.exists());
        assert_eq!(queue.clear(), 1);
        assert!(!cleared.exists());
        assert!(running.exists());

        queue.finish(1, Ok(Vec::new()));
        assert!(!running.exists());
    }
}
