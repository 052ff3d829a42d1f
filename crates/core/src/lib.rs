//! Core types shared by the queue, poll client and worker.

#![forbid(unsafe_code)]

mod poll;

pub use poll::{validate_batch, BatchError, PollPayload, PollResult, StatusInfo};

/// Label carrying the name an object should have in the target cluster.
pub const ORIGINAL_NAME_LABEL: &str = "tfo.galleybytes.com/original-name";

/// Status text the poll API reports while the job workflow is still running.
pub const WORKFLOW_PENDING: &str = "workflow has not completed";

/// Plural resource name the poll API uses in its not-found messages.
pub const TERRAFORM_RESOURCE: &str = "terraforms.tf.isaaguilar.com";

pub const TERRAFORM_GROUP: &str = "tf.isaaguilar.com";
pub const TERRAFORM_VERSION: &str = "v1alpha2";
pub const TERRAFORM_KIND: &str = "Terraform";
pub const TERRAFORM_PLURAL: &str = "terraforms";

/// Reference to a provisioning job tracked by the work queue.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct JobRef {
    pub uid: String,
    /// Only used for log context.
    pub name: String,
    pub namespace: String,
    pub outputs_secret: String,
}

impl JobRef {
    pub fn new(uid: impl Into<String>, namespace: impl Into<String>, outputs_secret: impl Into<String>) -> Self {
        Self { uid: uid.into(), name: String::new(), namespace: namespace.into(), outputs_secret: outputs_secret.into() }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Jobs without an outputs secret never produce objects, so they are never polled.
    pub fn should_poll(&self) -> bool {
        !self.outputs_secret.is_empty()
    }
}

/// True when `err_msg` says the poll API has no record of the job `uid`.
pub fn is_not_registered(err_msg: &str, uid: &str) -> bool {
    err_msg.contains(&format!("{} \"{}\" not found", TERRAFORM_RESOURCE, uid))
}
