use std::future::Future;

use crate::error::Result;
use crate::types::*;

/// The slice of the Z-Image API the generation session and history store use.
///
/// [`ZImageClient`](crate::ZImageClient) is the production implementation.
/// The session is generic over this trait so the polling engine can run
/// against scripted backends.
///
/// # Example
///
/// ```ignore
/// use zimage_studio::*;
///
/// struct Offline;
///
/// impl ImageApi for Offline {
///     async fn generate(&self, req: &GenerateRequest) -> Result<GenerateResponse> {
///         Ok(GenerateResponse {
///             task_id: format!("{}-{}", req.metadata.batch_id, req.metadata.batch_index),
///             status_url: None,
///             image_url: None,
///         })
///     }
///     // ...
/// }
/// ```
pub trait ImageApi: Send + Sync + 'static {
    /// Queue one image. Returns the backend task id.
    fn generate(
        &self,
        request: &GenerateRequest,
    ) -> impl Future<Output = Result<GenerateResponse>> + Send;

    /// Aggregate status of a batch and all of its items.
    fn batch_detail(&self, batch_id: &str) -> impl Future<Output = Result<BatchDetail>> + Send;

    /// Ask the backend to revoke a task.
    fn cancel_task(&self, task_id: &str)
        -> impl Future<Output = Result<TaskActionResponse>> + Send;

    /// One page of past batches, newest first.
    fn list_history(
        &self,
        limit: u32,
        offset: u32,
    ) -> impl Future<Output = Result<Vec<BatchSummary>>> + Send;

    /// Delete a past batch.
    fn delete_history(
        &self,
        batch_id: &str,
    ) -> impl Future<Output = Result<TaskActionResponse>> + Send;
}
