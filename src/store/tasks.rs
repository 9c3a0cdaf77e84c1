use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{Task, TaskStatus};
use crate::store::users::DEFAULT_ADMIN_EMAIL;

/// Create / read / update / delete access to tasks.
///
/// `Ok(None)` means the task does not exist; errors are reserved for the
/// backing store failing.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn create(&self, task: Task) -> Result<Task, AppError>;

    async fn get(&self, id: Uuid) -> Result<Option<Task>, AppError>;

    /// All tasks, oldest first.
    async fn list(&self) -> Result<Vec<Task>, AppError>;

    async fn update_status(&self, id: Uuid, status: TaskStatus) -> Result<Option<Task>, AppError>;

    /// Removes a task and returns it.
    async fn delete(&self, id: Uuid) -> Result<Option<Task>, AppError>;

    async fn count(&self) -> Result<usize, AppError> {
        Ok(self.list().await?.len())
    }
}

/// Tasks kept in a vector in insertion order.
#[derive(Default)]
pub struct InMemoryTaskStore {
    tasks: RwLock<Vec<Task>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store holding three sample tasks, one per status, authored by the
    /// default admin.
    pub fn with_demo_tasks() -> Self {
        let demo = [
            ("Finish the REST backend", "Add the team endpoints.", TaskStatus::Done),
            ("Finish the task backend", "Move the schema from posts to tasks.", TaskStatus::InProgress),
            ("Revise the frontend", "Show tasks and teams.", TaskStatus::Todo),
        ];
        let tasks = demo
            .into_iter()
            .map(|(title, description, status)| Task {
                id: Uuid::new_v4(),
                title: title.to_string(),
                description: description.to_string(),
                status,
                author: DEFAULT_ADMIN_EMAIL.to_string(),
                created_at: Utc::now(),
            })
            .collect();
        Self {
            tasks: RwLock::new(tasks),
        }
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskStore {
    async fn create(&self, task: Task) -> Result<Task, AppError> {
        let mut tasks = self.tasks.write();
        if tasks.iter().any(|existing| existing.id == task.id) {
            return Err(AppError::Conflict(format!("Task {} already exists", task.id)));
        }
        tasks.push(task.clone());
        Ok(task)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Task>, AppError> {
        Ok(self.tasks.read().iter().find(|task| task.id == id).cloned())
    }

    async fn list(&self) -> Result<Vec<Task>, AppError> {
        Ok(self.tasks.read().clone())
    }

    async fn update_status(&self, id: Uuid, status: TaskStatus) -> Result<Option<Task>, AppError> {
        let mut tasks = self.tasks.write();
        Ok(tasks.iter_mut().find(|task| task.id == id).map(|task| {
            task.status = status;
            task.clone()
        }))
    }

    async fn delete(&self, id: Uuid) -> Result<Option<Task>, AppError> {
        let mut tasks = self.tasks.write();
        Ok(tasks
            .iter()
            .position(|task| task.id == id)
            .map(|index| tasks.remove(index)))
    }

    async fn count(&self) -> Result<usize, AppError> {
        Ok(self.tasks.read().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaskInput;

    fn task(title: &str) -> Task {
        Task::new(
            TaskInput {
                title: title.to_string(),
                description: None,
            },
            "john@example.com",
        )
    }

    #[tokio::test]
    async fn test_crud_lifecycle() {
        let store = InMemoryTaskStore::new();
        let first = store.create(task("first")).await.unwrap();
        let second = store.create(task("second")).await.unwrap();

        let titles: Vec<_> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.title)
            .collect();
        assert_eq!(titles, vec!["first", "second"]);

        let updated = store
            .update_status(first.id, TaskStatus::InProgress)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.status, TaskStatus::InProgress);
        assert_eq!(store.get(first.id).await.unwrap(), Some(updated));

        let removed = store.delete(second.id).await.unwrap().unwrap();
        assert_eq!(removed.title, "second");
        assert_eq!(store.get(second.id).await.unwrap(), None);
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_task() {
        let store = InMemoryTaskStore::new();
        let id = Uuid::new_v4();
        assert_eq!(store.get(id).await.unwrap(), None);
        assert_eq!(store.update_status(id, TaskStatus::Done).await.unwrap(), None);
        assert_eq!(store.delete(id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_demo_tasks_cover_every_status() {
        let store = InMemoryTaskStore::with_demo_tasks();
        assert_eq!(store.count().await.unwrap(), 3);

        let statuses: Vec<_> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.status)
            .collect();
        assert_eq!(
            statuses,
            vec![TaskStatus::Done, TaskStatus::InProgress, TaskStatus::Todo]
        );
        assert_eq!(InMemoryTaskStore::new().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_id_conflicts() {
        let store = InMemoryTaskStore::new();
        let original = store.create(task("first")).await.unwrap();
        let result = store.create(original).await;
        assert!(matches!(result, Err(AppError::Conflict(_))));
    }
}
