//! Ordered validator chains and the four named pipelines.

use std::panic::AssertUnwindSafe;

use futures::FutureExt;

use crate::context::TrustContext;
use crate::error::Failure;
use crate::request::GuardedRequest;
use crate::validator::{AuthEnv, Check, Rejection, Validator};

const KEYVAULT_CHECKS: &[Check] = &[Check::ExtensionInitialized, Check::SessionValid];

const ACCOUNT_CHECKS: &[Check] = &[
    Check::ExtensionInitialized,
    Check::SessionValid,
    Check::AccountLinked,
];

const DOMAIN_CHECKS: &[Check] = &[
    Check::ExtensionInitialized,
    Check::SessionValid,
    Check::AccountLinked,
    Check::DomainApproved,
];

const ENTITY_CHECKS: &[Check] = &[
    Check::ExtensionInitialized,
    Check::SessionValid,
    Check::AccountLinked,
    Check::EntityDomainAccess,
];

/// Named validator sequences. Session validity precedes account linkage,
/// and domain checks follow the account check.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Pipeline {
    KeyVault,
    Account,
    Domain,
    Entity,
}

impl Pipeline {
    pub const ALL: [Pipeline; 4] = [
        Pipeline::KeyVault,
        Pipeline::Account,
        Pipeline::Domain,
        Pipeline::Entity,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Pipeline::KeyVault => "keyvault",
            Pipeline::Account => "account",
            Pipeline::Domain => "domain",
            Pipeline::Entity => "entity",
        }
    }

    pub const fn checks(self) -> &'static [Check] {
        match self {
            Pipeline::KeyVault => KEYVAULT_CHECKS,
            Pipeline::Account => ACCOUNT_CHECKS,
            Pipeline::Domain => DOMAIN_CHECKS,
            Pipeline::Entity => ENTITY_CHECKS,
        }
    }

    pub fn chain(self) -> ValidatorChain<Check> {
        ValidatorChain::new(self.name(), self.checks().to_vec())
    }
}

/// Validators run strictly in order; the first rejection stops the chain.
#[derive(Clone, Debug)]
pub struct ValidatorChain<V = Check> {
    name: &'static str,
    validators: Vec<V>,
}

impl<V: Validator> ValidatorChain<V> {
    pub fn new(name: &'static str, validators: Vec<V>) -> Self {
        Self { name, validators }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn validators(&self) -> &[V] {
        &self.validators
    }

    /// Union of the arguments every validator reads, in first-use order.
    pub fn required_args(&self) -> Vec<&'static str> {
        let mut args: Vec<&'static str> = Vec::new();
        for arg in self.validators.iter().flat_map(|v| v.required_args().iter()) {
            if !args.contains(arg) {
                args.push(arg);
            }
        }
        args
    }

    /// Run the chain, returning the accumulated context or the first failure.
    ///
    /// Faults and panics inside a validator are normalized to
    /// [`Failure::Unknown`].
    pub async fn run(
        &self,
        request: &GuardedRequest,
        env: &AuthEnv,
    ) -> Result<TrustContext, Failure> {
        let mut context = TrustContext::default();

        for validator in &self.validators {
            let name = validator.name();
            tracing::debug!(chain = self.name, validator = name, "running validator");

            let outcome = AssertUnwindSafe(validator.validate(request, &context, env))
                .catch_unwind()
                .await;

            let fragment = match outcome {
                Ok(Ok(fragment)) => fragment,
                Ok(Err(Rejection::Permission(kind))) => {
                    tracing::info!(
                        chain = self.name,
                        validator = name,
                        kind = kind.key(),
                        domain = %request.domain,
                        "request denied"
                    );
                    return Err(Failure::Permission(kind));
                }
                Ok(Err(Rejection::Fault(error))) => {
                    tracing::warn!(chain = self.name, validator = name, error = %error, "validator fault");
                    return Err(Failure::unknown(format!("{name}: {error:#}")));
                }
                Err(panic) => {
                    let failure = Failure::from_panic(panic);
                    tracing::error!(chain = self.name, validator = name, %failure, "validator panicked");
                    return Err(failure);
                }
            };

            context = context.merge(name, fragment);
        }

        Ok(context)
    }
}
