use std::any::Any;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use crate::{Job, JobEnvelope, JobError, JobResult, QueueError, QueueResult};

/// A job reconstructed from an envelope, with its concrete type erased for
/// runtime dispatch
#[async_trait]
pub trait ErasedJob: Send + Sync {
    /// The registered type name this job was created under
    fn job_type(&self) -> &'static str;

    /// Execute the job; the context is downcast to the job's declared
    /// `Context` type
    async fn handle(&self, context: Arc<dyn Any + Send + Sync>) -> Result<(), JobError>;

    /// Invoke the job's `finished` lifecycle hook
    async fn finished(&self, result: &JobResult);

    /// Invoke the job's `failed` lifecycle hook
    async fn failed(&self, error: &JobError);

    /// Re-serialize the job's state
    fn payload(&self) -> QueueResult<Vec<u8>>;
}

struct TypedJob<J: Job> {
    job: J,
}

#[async_trait]
impl<J: Job> ErasedJob for TypedJob<J> {
    fn job_type(&self) -> &'static str {
        J::NAME
    }

    async fn handle(&self, context: Arc<dyn Any + Send + Sync>) -> Result<(), JobError> {
        let typed_context = context
            .downcast_ref::<J::Context>()
            .ok_or_else(|| JobError::new(format!("invalid worker context type for job '{}'", J::NAME)))?
            .clone();

        self.job.handle(typed_context).await
    }

    async fn finished(&self, result: &JobResult) {
        self.job.finished(result).await;
    }

    async fn failed(&self, error: &JobError) {
        self.job.failed(error).await;
    }

    fn payload(&self) -> QueueResult<Vec<u8>> {
        serde_json::to_vec(&self.job).map_err(Into::into)
    }
}

/// Factory reconstructing a typed job from an envelope payload
trait JobFactory: Send + Sync {
    fn job_type(&self) -> &'static str;

    fn create(&self, envelope: &JobEnvelope) -> QueueResult<Box<dyn ErasedJob>>;
}

struct TypedFactory<J: Job> {
    _phantom: PhantomData<fn() -> J>,
}

impl<J: Job> JobFactory for TypedFactory<J> {
    fn job_type(&self) -> &'static str {
        J::NAME
    }

    fn create(&self, envelope: &JobEnvelope) -> QueueResult<Box<dyn ErasedJob>> {
        let job: J = serde_json::from_slice(&envelope.payload)?;
        Ok(Box::new(TypedJob { job }))
    }
}

/// Thread-safe mapping from a job's declared type name to a factory that
/// reconstructs a typed job from a [`JobEnvelope`]
///
/// Owned by each [`Queue`](crate::Queue) rather than living as process-global
/// state, so tests stay isolated.
pub struct JobTypeRegistry {
    factories: RwLock<HashMap<String, Arc<dyn JobFactory>>>,
}

impl JobTypeRegistry {
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }

    /// Register a job type, idempotently: re-registering the same name is a
    /// no-op, not an error
    pub fn register<J: Job>(&self) {
        let mut factories = self.factories.write();
        if factories.contains_key(J::NAME) {
            return;
        }

        debug!(job_type = J::NAME, "Registered job type");
        factories.insert(J::NAME.to_string(), Arc::new(TypedFactory::<J> { _phantom: PhantomData }));
    }

    /// Reconstruct a job from its envelope
    ///
    /// Fails with [`QueueError::UnknownJobType`] when no factory is
    /// registered for the envelope's declared type name, and with
    /// [`QueueError::Serialization`] when the payload cannot be decoded.
    pub fn create(&self, envelope: &JobEnvelope) -> QueueResult<Box<dyn ErasedJob>> {
        let factory = {
            let factories = self.factories.read();
            factories
                .get(&envelope.job_type_name)
                .cloned()
                .ok_or_else(|| QueueError::UnknownJobType(envelope.job_type_name.clone()))?
        };

        factory.create(envelope)
    }

    /// Check if a job type is registered
    pub fn is_registered(&self, job_type: &str) -> bool {
        self.factories.read().contains_key(job_type)
    }

    /// Get all registered job types
    pub fn registered_types(&self) -> Vec<String> {
        self.factories.read().keys().cloned().collect()
    }

    /// Clear all registrations (test support only)
    pub fn reset(&self) {
        self.factories.write().clear();
    }
}

impl Default for JobTypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
