use shared::{ApiResponse, CreateTaskRequest, Task, TaskStatus, UpdateTaskRequest, User};
use tracing::info;

use super::{ApiClient, ApiError, Auth, Result};
use crate::cache::{QueryFamily, QueryKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TaskStats {
    pub total: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub cancelled: usize,
}

impl TaskStats {
    pub fn from_tasks(tasks: &[Task]) -> Self {
        tasks.iter().fold(Self::default(), |mut stats, task| {
            stats.total += 1;
            match task.status {
                TaskStatus::InProgress => stats.in_progress += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Cancelled => stats.cancelled += 1,
            }
            stats
        })
    }
}

/// Admins may edit any task, everyone else only their own.
pub fn can_edit(user: &User, task: &Task) -> bool {
    user.is_admin() || task.user_id.as_deref() == Some(user.id.as_str())
}

pub async fn get_tasks(client: &ApiClient) -> Result<Vec<Task>> {
    if let Some(tasks) = client.cached::<Vec<Task>>(&QueryKey::Tasks) {
        return Ok(tasks);
    }
    let reply = client.get::<Vec<Task>>("tasks").await?;
    info!(count = reply.response.data.len(), "Api get tasks");
    client.remember(QueryKey::Tasks, &reply.response.data, reply.epoch);
    Ok(reply.data())
}

pub async fn get_task(client: &ApiClient, id: &str) -> Result<Task> {
    let key = QueryKey::Task(id.to_owned());
    if let Some(task) = client.cached::<Task>(&key) {
        return Ok(task);
    }
    let reply = client.get::<Task>(&format!("tasks/{id}")).await?;
    info!(task_id = id, "Api get task by id");
    client.remember(key, &reply.response.data, reply.epoch);
    Ok(reply.data())
}

pub async fn create_task(
    client: &ApiClient,
    request: &CreateTaskRequest,
) -> Result<ApiResponse<Task>> {
    if request.title.trim().is_empty() {
        return Err(ApiError::validation("Title is required"));
    }
    let reply = client
        .post::<_, Task>("tasks", request, Auth::Bearer)
        .await?;
    info!(task_id = %reply.response.data.id, "Api create task");
    client.cache().invalidate_family(QueryFamily::Tasks);
    Ok(reply.response)
}

pub async fn update_task(
    client: &ApiClient,
    id: &str,
    request: &UpdateTaskRequest,
) -> Result<ApiResponse<Task>> {
    if request
        .title
        .as_deref()
        .is_some_and(|title| title.trim().is_empty())
    {
        return Err(ApiError::validation("Title is required"));
    }
    let reply = client
        .put::<_, Task>(&format!("tasks/{id}"), request)
        .await?;
    info!(task_id = id, "Api update task");
    client.cache().invalidate_family(QueryFamily::Tasks);
    Ok(reply.response)
}

pub async fn delete_task(client: &ApiClient, id: &str) -> Result<ApiResponse<Option<Task>>> {
    let reply = client
        .delete::<Option<Task>>(&format!("tasks/{id}"))
        .await?;
    info!(task_id = id, "Api delete task");
    client.cache().invalidate_family(QueryFamily::Tasks);
    Ok(reply.response)
}
