//! Ordered fallback over request or command variants
//!
//! Variants are tried in order until one succeeds. A failure whose cause
//! cannot be fixed by another variant stops the chain early. When every
//! variant fails, the diagnostics of all attempts are combined.

use std::future::Future;
use tracing::warn;

use super::{Failure, FailureCause};
use crate::workflow::{CommandTemplate, FetchVariant};

/// Something that can be tried as one step of a fallback chain
pub trait Variant: Clone {
    fn label(&self) -> String;
}

impl Variant for FetchVariant {
    fn label(&self) -> String {
        self.name.clone()
    }
}

impl Variant for CommandTemplate {
    fn label(&self) -> String {
        self.program.clone()
    }
}

#[derive(Debug, Clone)]
pub struct FallbackChain<V> {
    variants: Vec<V>,
}

impl<V: Variant> FallbackChain<V> {
    pub fn new(variants: Vec<V>) -> Self {
        Self { variants }
    }

    pub fn variants(&self) -> &[V] {
        &self.variants
    }

    /// Run `attempt` for each variant in order
    ///
    /// Returns the first success together with the label of the variant
    /// that produced it.
    pub async fn run<T, F, Fut>(&self, mut attempt: F) -> Result<(String, T), Failure>
    where
        F: FnMut(V) -> Fut,
        Fut: Future<Output = Result<T, Failure>>,
    {
        let total = self.variants.len();
        let mut failures: Vec<(String, Failure)> = Vec::new();

        for (index, variant) in self.variants.iter().enumerate() {
            let label = variant.label();
            if index > 0 {
                warn!("Falling back to variant '{}' ({}/{})", label, index + 1, total);
            }

            match attempt(variant.clone()).await {
                Ok(value) => return Ok((label, value)),
                Err(failure) => {
                    let retryable = failure.cause.is_retryable();
                    failures.push((label, failure));
                    if !retryable {
                        break;
                    }
                }
            }
        }

        Err(combine(failures))
    }
}

fn combine(mut failures: Vec<(String, Failure)>) -> Failure {
    match failures.len() {
        0 => Failure::new(FailureCause::InvalidInput, "no variants configured"),
        1 => failures.remove(0).1,
        _ => {
            let diagnostic = failures
                .iter()
                .map(|(label, failure)| format!("[{}] {}", label, failure))
                .collect::<Vec<_>>()
                .join("\n");
            // The last cause decides the reported cause
            let cause = failures
                .last()
                .map(|(_, f)| f.cause.clone())
                .unwrap_or(FailureCause::InvalidInput);
            Failure::new(cause, diagnostic)
        }
    }
}
