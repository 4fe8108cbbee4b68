//! Guarded operations: a validator chain bound to a terminal business operation.
//!
//! Calling a [`Guarded`] looks exactly like calling the wrapped
//! [`Operation`], except that the operation also receives the
//! [`TrustContext`] the chain produced. This is the single boundary where
//! faults become [`Failure`] values; callers never see a panic or a raw error.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;

use crate::chain::{Pipeline, ValidatorChain};
use crate::context::TrustContext;
use crate::error::{Failure, OperationError};
use crate::request::GuardedRequest;
use crate::validator::{AuthEnv, Check, Validator};

/// What a business operation produced.
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    /// Final result, returned to the caller as-is.
    Complete(Value),
    /// A human has to decide; `action` names the UI flow, `prompt` is shown to the user.
    NeedsApproval { action: String, prompt: Value },
}

/// Terminal business operation behind a validator chain.
#[async_trait]
pub trait Operation: Send + Sync {
    fn name(&self) -> &'static str;

    /// Arguments read by the operation itself, on top of the pipeline's.
    fn required_args(&self) -> &'static [&'static str] {
        &[]
    }

    async fn execute(
        &self,
        request: &GuardedRequest,
        context: &TrustContext,
    ) -> Result<Outcome, OperationError>;
}

/// A validator chain followed by a business operation.
pub struct Guarded<V = Check> {
    chain: ValidatorChain<V>,
    operation: Arc<dyn Operation>,
    required_args: Vec<&'static str>,
}

impl Guarded<Check> {
    pub fn with_pipeline(pipeline: Pipeline, operation: Arc<dyn Operation>) -> Self {
        Self::new(pipeline.chain(), operation)
    }
}

impl<V: Validator> Guarded<V> {
    pub fn new(chain: ValidatorChain<V>, operation: Arc<dyn Operation>) -> Self {
        let mut required_args = chain.required_args();
        for arg in operation.required_args() {
            if !required_args.contains(arg) {
                required_args.push(arg);
            }
        }

        Self {
            chain,
            operation,
            required_args,
        }
    }

    pub fn chain(&self) -> &ValidatorChain<V> {
        &self.chain
    }

    pub fn operation_name(&self) -> &'static str {
        self.operation.name()
    }

    pub fn required_args(&self) -> &[&'static str] {
        &self.required_args
    }

    /// Check arguments, run the chain, then the operation.
    pub async fn call(&self, request: &GuardedRequest, env: &AuthEnv) -> Result<Outcome, Failure> {
        request.args.check(&self.required_args)?;

        let context = self.chain.run(request, env).await?;

        let outcome = AssertUnwindSafe(self.operation.execute(request, &context))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(error)) => {
                tracing::warn!(operation = self.operation.name(), error = %error, "operation failed");
                Err(Failure::unknown(error.to_string()))
            }
            Err(panic) => {
                let failure = Failure::from_panic(panic);
                tracing::error!(operation = self.operation.name(), %failure, "operation panicked");
                Err(failure)
            }
        }
    }
}
