use std::sync::Arc;

use super::normalizer::RegistryError;
use super::transport::{decode_ack, require_hash, to_body, RegistryRequest, Transport};
use crate::models::{
    Billing, OperationAck, Page, PaymentType, PaymentTypeFilters, PixRefundRequest,
    PixRefundResult,
};

const BILLING_PATH: &str = "cobranca";
const PAYMENT_TYPES_SEGMENT: &str = "tipos-pagamento";

/// Billing (Cobrança) operations.
///
/// The client only observes the billing lifecycle: each call is one
/// transition attempt and the upstream answer is reported as-is. There is no
/// local locking per billing hash and no local idempotence logic.
#[derive(Clone)]
pub struct BillingService {
    transport: Arc<Transport>,
}

impl BillingService {
    pub fn new(transport: Arc<Transport>) -> Self {
        Self { transport }
    }

    pub async fn detail_billing(&self, hash: &str) -> Result<Billing, RegistryError> {
        let hash = require_hash(hash)?;
        tracing::info!("Fetching billing {}", hash);

        let mut billing: Billing = self
            .transport
            .execute_as(
                &RegistryRequest::get(BILLING_PATH).segment(hash),
                "billing detail",
            )
            .await?;

        if billing.hash.is_empty() {
            billing.hash = hash.to_string();
        }
        Ok(billing)
    }

    /// Cancels an open billing. Whether re-canceling succeeds or conflicts is
    /// up to the upstream.
    pub async fn cancel_billing(&self, hash: &str) -> Result<OperationAck, RegistryError> {
        let hash = require_hash(hash)?;
        tracing::info!("Canceling billing {}", hash);

        let value = self
            .transport
            .execute(
                &RegistryRequest::post(BILLING_PATH)
                    .segment(hash)
                    .segment("cancelar"),
            )
            .await?;
        let ack = decode_ack(value, "billing cancellation")?;

        tracing::info!("✓ Billing {} canceled", hash);
        Ok(ack)
    }

    /// Lists one page of the payment-type catalog.
    pub async fn list_payment_types(
        &self,
        filters: &PaymentTypeFilters,
    ) -> Result<Page<PaymentType>, RegistryError> {
        tracing::info!("Listing payment types: {:?}", filters);

        let request = RegistryRequest::get(BILLING_PATH)
            .segment(PAYMENT_TYPES_SEGMENT)
            .query(filters.to_query());
        self.transport
            .execute_as(&request, "payment type listing")
            .await
    }

    /// Requests a PIX refund (devolução) for a paid billing.
    ///
    /// Only the amount's shape is checked locally; whether it exceeds the paid
    /// value is the upstream's call and comes back as `Validation`.
    pub async fn refund_pix(
        &self,
        hash: &str,
        request: &PixRefundRequest,
    ) -> Result<PixRefundResult, RegistryError> {
        let hash = require_hash(hash)?;
        if !request.valor.is_finite() || request.valor <= 0.0 {
            return Err(RegistryError::Validation(format!(
                "refund amount must be a positive number, got {}",
                request.valor
            )));
        }
        tracing::info!("Requesting PIX refund of {:.2} for billing {}", request.valor, hash);

        let body = to_body(request)?;
        let result: PixRefundResult = self
            .transport
            .execute_as(
                &RegistryRequest::post(BILLING_PATH)
                    .segment(hash)
                    .segment("pix")
                    .segment("devolucao")
                    .json(body),
                "PIX refund",
            )
            .await?;

        tracing::info!("✓ PIX refund accepted for billing {}: {:?}", hash, result.status);
        Ok(result)
    }
}
