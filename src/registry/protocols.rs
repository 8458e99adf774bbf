use std::sync::Arc;

use super::normalizer::RegistryError;
use super::transport::{decode_ack, require_hash, to_body, RegistryRequest, Transport};
use crate::models::{
    AutomatedBillingRequest, BatchSubmissionResult, Billing, OperationAck, Page, Protocol,
    ProtocolBatchRequest, ProtocolFilters, ProtocolRequest, SubmissionResult,
};

const PROTOCOLS_PATH: &str = "acompanhamento/protocolos";
const BATCH_SEGMENT: &str = "lote";
const AUTOMATED_BILLING_SEGMENT: &str = "cobranca-automatizada";

/// Protocol tracking (Acompanhamento) operations.
///
/// The registry is the only source of truth: nothing is cached and every read
/// goes upstream. State rules (deletable, billable) are enforced upstream and
/// surfaced through the error taxonomy.
#[derive(Clone)]
pub struct ProtocolService {
    transport: Arc<Transport>,
}

impl ProtocolService {
    pub fn new(transport: Arc<Transport>) -> Self {
        Self { transport }
    }

    /// Lists one page of protocols. Only the filters that are set are sent and
    /// the upstream ordering is kept.
    pub async fn list_protocols(
        &self,
        filters: &ProtocolFilters,
    ) -> Result<Page<Protocol>, RegistryError> {
        tracing::info!("Listing registry protocols: {:?}", filters);

        let request = RegistryRequest::get(PROTOCOLS_PATH).query(filters.to_query());
        let page: Page<Protocol> = self
            .transport
            .execute_as(&request, "protocol listing")
            .await?;

        tracing::info!("Registry returned {} protocol(s)", page.itens.len());
        Ok(page)
    }

    /// Fetches a single protocol by hash.
    pub async fn detail_protocol(&self, hash: &str) -> Result<Protocol, RegistryError> {
        let hash = require_hash(hash)?;
        tracing::info!("Fetching registry protocol {}", hash);

        let request = RegistryRequest::get(PROTOCOLS_PATH).segment(hash);
        let mut protocol: Protocol = self
            .transport
            .execute_as(&request, "protocol detail")
            .await?;

        if protocol.hash.is_empty() {
            protocol.hash = hash.to_string();
        }
        Ok(protocol)
    }

    /// Submits a single protocol.
    pub async fn submit_protocol(
        &self,
        request: &ProtocolRequest,
    ) -> Result<SubmissionResult, RegistryError> {
        tracing::info!(
            "Submitting registry protocol (tipoSolicitacao={})",
            request.tipo_solicitacao
        );

        let body = to_body(request)?;
        let result: SubmissionResult = self
            .transport
            .execute_as(
                &RegistryRequest::post(PROTOCOLS_PATH).json(body),
                "protocol submission",
            )
            .await?;

        tracing::info!(
            "✓ Protocol submitted: hash={:?} numeroProtocolo={:?}",
            result.hash,
            result.numero_protocolo
        );
        Ok(result)
    }

    /// Submits several protocols in one upstream request.
    ///
    /// The batch is all-or-nothing from the client's side: an upstream
    /// rejection is returned as an error and nothing is retried per item.
    pub async fn submit_protocol_batch(
        &self,
        request: &ProtocolBatchRequest,
    ) -> Result<BatchSubmissionResult, RegistryError> {
        if request.protocolos.is_empty() {
            return Err(RegistryError::Validation(
                "batch must carry at least one protocol".to_string(),
            ));
        }
        tracing::info!(
            "Submitting registry protocol batch of {}",
            request.protocolos.len()
        );

        let body = to_body(request)?;
        let result: BatchSubmissionResult = self
            .transport
            .execute_as(
                &RegistryRequest::post(PROTOCOLS_PATH)
                    .segment(BATCH_SEGMENT)
                    .json(body),
                "protocol batch submission",
            )
            .await?;

        tracing::info!(
            "✓ Protocol batch accepted ({} result(s))",
            result.protocolos.len()
        );
        Ok(result)
    }

    /// Deletes a protocol; the upstream decides whether its state allows it.
    pub async fn delete_protocol(&self, hash: &str) -> Result<OperationAck, RegistryError> {
        let hash = require_hash(hash)?;
        tracing::info!("Deleting registry protocol {}", hash);

        let value = self
            .transport
            .execute(&RegistryRequest::delete(PROTOCOLS_PATH).segment(hash))
            .await?;
        let ack = decode_ack(value, "protocol deletion")?;

        tracing::info!("✓ Protocol {} deleted", hash);
        Ok(ack)
    }

    /// Generates the automated billing for a protocol. No local state check:
    /// the upstream decides whether the protocol is billable.
    pub async fn generate_automated_billing(
        &self,
        hash: &str,
        request: &AutomatedBillingRequest,
    ) -> Result<Billing, RegistryError> {
        let hash = require_hash(hash)?;
        tracing::info!("Generating automated billing for protocol {}", hash);

        let body = to_body(request)?;
        let mut billing: Billing = self
            .transport
            .execute_as(
                &RegistryRequest::post(PROTOCOLS_PATH)
                    .segment(hash)
                    .segment(AUTOMATED_BILLING_SEGMENT)
                    .json(body),
                "automated billing",
            )
            .await?;

        if billing.hash_protocolo.is_none() {
            billing.hash_protocolo = Some(hash.to_string());
        }
        tracing::info!("✓ Billing {} generated for protocol {}", billing.hash, hash);
        Ok(billing)
    }
}
