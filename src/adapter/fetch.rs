//! Structure Fetcher - downloads a molecule structure by compound ID
//!
//! Request variants (3-D first, then 2-D by default) come from the fetch
//! configuration and are tried in order. Only a 200 response with a
//! non-empty body counts as success; the body is written to the
//! molecule's structure file.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};

use super::fallback::FallbackChain;
use super::{bounded, Adapter, AdapterError, AdapterOutput, Failure, FailureCause, Invocation};
use crate::engine::workspace::Workspace;
use crate::workflow::{evaluate_expression, Artifacts, FetchConfig, FetchVariant, StageKind, TemplateVars};

#[derive(Debug)]
pub struct StructureFetcher {
    client: reqwest::Client,
    chain: FallbackChain<FetchVariant>,
    timeout: Duration,
    diagnostic_limit: usize,
}

impl StructureFetcher {
    pub fn new(config: &FetchConfig, diagnostic_limit: usize) -> Result<Self, AdapterError> {
        let timeout = Duration::from_millis(config.timeout);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                AdapterError::Fetch(Failure::new(FailureCause::Transport, e.to_string()))
            })?;

        Ok(Self {
            client,
            chain: FallbackChain::new(config.variants.clone()),
            timeout,
            diagnostic_limit,
        })
    }

    /// Render the URL of `variant` for compound `cid`
    pub fn build_url(variant: &FetchVariant, cid: u64) -> Result<String, Failure> {
        let vars = TemplateVars::new().with("cid", cid);
        evaluate_expression(&variant.url, &vars)
            .map_err(|e| Failure::new(FailureCause::InvalidInput, e.to_string()))
    }

    async fn request(&self, variant: FetchVariant, cid: u64) -> Result<Vec<u8>, Failure> {
        let url = Self::build_url(&variant, cid)?;
        let start = std::time::Instant::now();
        debug!("Executing GET {}", url);

        let response = self.client.get(&url).send().await.map_err(|e| {
            let cause = if e.is_timeout() {
                FailureCause::Timeout(self.timeout)
            } else {
                FailureCause::Transport
            };
            Failure::new(cause, format!("GET {}: {}", url, e))
        })?;

        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(|e| {
            Failure::new(FailureCause::Transport, format!("GET {}: {}", url, e))
        })?;

        info!(
            "GET {} -> {} ({}ms)",
            url,
            status,
            start.elapsed().as_millis()
        );

        if status != 200 {
            let text = String::from_utf8_lossy(&body);
            return Err(Failure::new(
                FailureCause::HttpStatus(status),
                bounded(&format!("GET {}\n{}", url, text), self.diagnostic_limit),
            ));
        }
        if body.iter().all(|b| b.is_ascii_whitespace()) {
            return Err(Failure::new(
                FailureCause::EmptyOutput(format!("response body of {}", url)),
                "",
            ));
        }

        Ok(body.to_vec())
    }
}

#[async_trait]
impl Adapter for StructureFetcher {
    fn stage(&self) -> StageKind {
        StageKind::Fetch
    }

    async fn invoke(
        &self,
        workspace: &Workspace,
        invocation: &Invocation<'_>,
    ) -> Result<AdapterOutput, AdapterError> {
        let molecule = invocation.require_molecule(StageKind::Fetch)?;
        let cid = invocation.sample.compound_id(molecule);
        if cid == 0 {
            return Err(AdapterError::Fetch(Failure::new(
                FailureCause::InvalidInput,
                "compound identifier must be a positive integer",
            )));
        }

        let (variant, body) = self
            .chain
            .run(|variant| self.request(variant, cid))
            .await
            .map_err(AdapterError::Fetch)?;

        let target = workspace.path(&Artifacts::structure(molecule));
        let partial = workspace.path(&format!("{}.part", Artifacts::structure(molecule)));
        let written = std::fs::write(&partial, &body).and_then(|_| std::fs::rename(&partial, &target));
        if let Err(e) = written {
            let _ = std::fs::remove_file(&partial);
            return Err(AdapterError::Fetch(Failure::io(
                &format!("writing {}", target.display()),
                &e,
            )));
        }

        invocation
            .log
            .note(&format!("CID {} fetched using the '{}' request", cid, variant));

        Ok(AdapterOutput::new(
            vec![target],
            format!("CID {}: {} bytes from '{}' request", cid, body.len(), variant),
        ))
    }
}
