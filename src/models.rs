use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

// ============ Shared Upstream Shapes ============

/// Status value exactly as the registry sends it: a flag, a numeric code, or
/// a label. The client never rewrites it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UpstreamStatus {
    Flag(bool),
    Code(i64),
    Label(String),
}

/// One page of a paginated listing, with whatever page metadata the registry
/// returned. Items keep upstream ordering.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    /// Items of the requested page.
    pub itens: Vec<T>,
    /// 1-based page number, when reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagina: Option<u32>,
    /// Page size, when reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tamanho_pagina: Option<u32>,
    /// Total number of items across all pages, when reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_itens: Option<u64>,
    /// Total number of pages, when reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_paginas: Option<u32>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PageShape<T> {
    Bare(Vec<T>),
    Wrapped(PageEnvelope<T>),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageEnvelope<T> {
    #[serde(
        alias = "items",
        alias = "dados",
        alias = "data",
        alias = "registros",
        alias = "content",
        alias = "resultado"
    )]
    itens: Vec<T>,
    #[serde(default, alias = "page", alias = "paginaAtual")]
    pagina: Option<u32>,
    #[serde(default, alias = "pageSize")]
    tamanho_pagina: Option<u32>,
    #[serde(
        default,
        alias = "total",
        alias = "totalRegistros",
        alias = "totalElements"
    )]
    total_itens: Option<u64>,
    #[serde(default, alias = "totalPages")]
    total_paginas: Option<u32>,
}

impl<'de, T> Deserialize<'de> for Page<T>
where
    T: Deserialize<'de>,
{
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match PageShape::<T>::deserialize(deserializer)? {
            PageShape::Bare(itens) => Page {
                itens,
                pagina: None,
                tamanho_pagina: None,
                total_itens: None,
                total_paginas: None,
            },
            PageShape::Wrapped(envelope) => Page {
                itens: envelope.itens,
                pagina: envelope.pagina,
                tamanho_pagina: envelope.tamanho_pagina,
                total_itens: envelope.total_itens,
                total_paginas: envelope.total_paginas,
            },
        })
    }
}

/// Acknowledgement of a mutating call (deletion, cancellation). Empty bodies
/// decode to the default value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationAck {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mensagem: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<UpstreamStatus>,
    /// Any other field, passed through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ============ Protocol Tracking (Acompanhamento) ============

/// Optional filters for the protocol listing. Omitted filters are not sent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolFilters {
    pub pagina: Option<u32>,
    pub tamanho_pagina: Option<u32>,
    pub numero_protocolo: Option<String>,
    pub tipo_solicitacao: Option<i32>,
    pub situacao: Option<i32>,
}

impl ProtocolFilters {
    /// Query pairs for the filters that are set, with upstream names.
    pub fn to_query(&self) -> Vec<(&'static str, String)> {
        let mut query = Vec::new();
        if let Some(pagina) = self.pagina {
            query.push(("pagina", pagina.to_string()));
        }
        if let Some(tamanho) = self.tamanho_pagina {
            query.push(("tamanhoPagina", tamanho.to_string()));
        }
        if let Some(ref numero) = self.numero_protocolo {
            query.push(("numeroProtocolo", numero.clone()));
        }
        if let Some(tipo) = self.tipo_solicitacao {
            query.push(("tipoSolicitacao", tipo.to_string()));
        }
        if let Some(situacao) = self.situacao {
            query.push(("situacao", situacao.to_string()));
        }
        query
    }
}

/// A protocol as tracked by the registry. Used for both listing entries and
/// detail responses; fields the client does not model are kept in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Protocol {
    /// Opaque identifier assigned by the registry.
    #[serde(default)]
    pub hash: String,
    /// Protocol number, present once the registry accepted the submission.
    #[serde(
        default,
        deserialize_with = "de::string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub numero_protocolo: Option<String>,
    /// Request type code.
    #[serde(
        default,
        deserialize_with = "de::lenient_i32",
        skip_serializing_if = "Option::is_none"
    )]
    pub tipo_solicitacao: Option<i32>,
    /// Workflow state code.
    #[serde(
        default,
        deserialize_with = "de::lenient_i32",
        skip_serializing_if = "Option::is_none"
    )]
    pub situacao: Option<i32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Payload for a single protocol submission: the request type plus its
/// type-specific fields, sent verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolRequest {
    pub tipo_solicitacao: i32,
    #[serde(flatten)]
    pub dados: Map<String, Value>,
}

/// Several protocol payloads submitted in one upstream request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolBatchRequest {
    pub protocolos: Vec<ProtocolRequest>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Outcome of a protocol submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionResult {
    #[serde(
        default,
        deserialize_with = "de::string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub hash: Option<String>,
    #[serde(
        default,
        deserialize_with = "de::string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub numero_protocolo: Option<String>,
    #[serde(
        default,
        deserialize_with = "de::lenient_i32",
        skip_serializing_if = "Option::is_none"
    )]
    pub situacao: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mensagem: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Outcome of a batch submission. The batch is accepted or rejected as a
/// whole; a rejected batch surfaces as an error, never as a partial result.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSubmissionResult {
    pub protocolos: Vec<SubmissionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mensagem: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BatchShape {
    Bare(Vec<SubmissionResult>),
    Wrapped(BatchEnvelope),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchEnvelope {
    #[serde(default, alias = "itens", alias = "resultados", alias = "dados")]
    protocolos: Vec<SubmissionResult>,
    #[serde(default)]
    mensagem: Option<String>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl<'de> Deserialize<'de> for BatchSubmissionResult {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match BatchShape::deserialize(deserializer)? {
            BatchShape::Bare(protocolos) => BatchSubmissionResult {
                protocolos,
                ..Default::default()
            },
            BatchShape::Wrapped(envelope) => BatchSubmissionResult {
                protocolos: envelope.protocolos,
                mensagem: envelope.mensagem,
                extra: envelope.extra,
            },
        })
    }
}

// ============ Billing (Cobrança) ============

/// Request for automated billing generation on a protocol.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomatedBillingRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_tipo_pagamento: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valor: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vencimento: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A billing record generated from a protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Billing {
    #[serde(default)]
    pub hash: String,
    #[serde(
        default,
        deserialize_with = "de::string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub hash_protocolo: Option<String>,
    #[serde(
        default,
        deserialize_with = "de::lenient_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub valor: Option<f64>,
    #[serde(
        default,
        deserialize_with = "de::lenient_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub valor_pago: Option<f64>,
    #[serde(
        default,
        deserialize_with = "de::lenient_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub valor_devolvido: Option<f64>,
    #[serde(
        default,
        deserialize_with = "de::lenient_i64",
        skip_serializing_if = "Option::is_none"
    )]
    pub id_tipo_pagamento: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<UpstreamStatus>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Billing {
    /// Lifecycle phase as observed from the upstream status.
    pub fn phase(&self) -> BillingPhase {
        self.status
            .as_ref()
            .map(BillingPhase::from_status)
            .unwrap_or(BillingPhase::Unknown)
    }
}

/// Observed billing lifecycle phase.
///
/// `Open -> {Canceled | Paid}`, `Paid -> PartiallyRefunded -> {Paid | FullyRefunded}`.
/// Transitions happen upstream only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingPhase {
    Open,
    Canceled,
    Paid,
    PartiallyRefunded,
    FullyRefunded,
    Unknown,
}

impl BillingPhase {
    /// Classifies an upstream status label. Numeric codes and flags are
    /// upstream-defined and stay `Unknown`.
    pub fn from_status(status: &UpstreamStatus) -> Self {
        let UpstreamStatus::Label(label) = status else {
            return BillingPhase::Unknown;
        };
        let label = label.to_lowercase().replace(['_', '-'], " ");
        let refunded = ["devol", "estorn", "refund", "reembols"]
            .iter()
            .any(|k| label.contains(k));

        if refunded && (label.contains("parcial") || label.contains("partial")) {
            BillingPhase::PartiallyRefunded
        } else if refunded {
            BillingPhase::FullyRefunded
        } else if label.contains("cancel") {
            BillingPhase::Canceled
        } else if ["abert", "pend", "open", "aguard", "emitid"]
            .iter()
            .any(|k| label.contains(k))
        {
            BillingPhase::Open
        } else if ["pago", "paga", "paid", "liquid", "quitad"]
            .iter()
            .any(|k| label.contains(k))
        {
            BillingPhase::Paid
        } else {
            BillingPhase::Unknown
        }
    }

    /// No further upstream transition is expected.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BillingPhase::Canceled | BillingPhase::FullyRefunded)
    }
}

/// Optional filters for the payment-type catalog.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentTypeFilters {
    pub pagina: Option<u32>,
    pub tamanho_pagina: Option<u32>,
    pub status: Option<String>,
}

impl PaymentTypeFilters {
    pub fn to_query(&self) -> Vec<(&'static str, String)> {
        let mut query = Vec::new();
        if let Some(pagina) = self.pagina {
            query.push(("pagina", pagina.to_string()));
        }
        if let Some(tamanho) = self.tamanho_pagina {
            query.push(("tamanhoPagina", tamanho.to_string()));
        }
        if let Some(ref status) = self.status {
            query.push(("status", status.clone()));
        }
        query
    }
}

/// Payment-type catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentType {
    #[serde(
        default,
        deserialize_with = "de::lenient_i64",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descricao: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<UpstreamStatus>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PaymentType {
    /// Whether the entry is active, when the status says so unambiguously.
    pub fn is_active(&self) -> Option<bool> {
        match self.status.as_ref()? {
            UpstreamStatus::Flag(flag) => Some(*flag),
            UpstreamStatus::Code(code) => match code {
                1 => Some(true),
                0 => Some(false),
                _ => None,
            },
            UpstreamStatus::Label(label) => match label.trim().to_lowercase().as_str() {
                "ativo" | "ativa" | "active" | "a" | "true" => Some(true),
                "inativo" | "inativa" | "inactive" | "i" | "false" => Some(false),
                _ => None,
            },
        }
    }
}

/// PIX refund (devolução) request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PixRefundRequest {
    /// Amount to give back to the payer.
    pub valor: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub motivo: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Result of a PIX refund request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PixRefundResult {
    #[serde(
        default,
        alias = "idDevolucao",
        deserialize_with = "de::string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,
    #[serde(
        default,
        deserialize_with = "de::lenient_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub valor: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<UpstreamStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mensagem: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Lenient scalar decoders: the registry is inconsistent about sending
/// numbers as JSON numbers or as strings.
mod de {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<Value>::deserialize(deserializer)? {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s)),
            Some(Value::Number(n)) => Ok(Some(n.to_string())),
            Some(other) => Err(D::Error::custom(format!(
                "expected string or number, got {}",
                other
            ))),
        }
    }

    pub fn lenient_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<Value>::deserialize(deserializer)? {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => n
                .as_i64()
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("expected integer, got {}", n))),
            Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
            Some(Value::String(s)) => s
                .trim()
                .parse::<i64>()
                .map(Some)
                .map_err(|_| D::Error::custom(format!("expected integer, got {:?}", s))),
            Some(other) => Err(D::Error::custom(format!("expected integer, got {}", other))),
        }
    }

    pub fn lenient_i32<'de, D>(deserializer: D) -> Result<Option<i32>, D::Error>
    where
        D: Deserializer<'de>,
    {
        lenient_i64(deserializer)?
            .map(|v| {
                i32::try_from(v).map_err(|_| D::Error::custom(format!("{} out of range", v)))
            })
            .transpose()
    }

    pub fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<Value>::deserialize(deserializer)? {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => Ok(n.as_f64()),
            Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
            Some(Value::String(s)) => s
                .trim()
                .replace(',', ".")
                .parse::<f64>()
                .map(Some)
                .map_err(|_| D::Error::custom(format!("expected amount, got {:?}", s))),
            Some(other) => Err(D::Error::custom(format!("expected amount, got {}", other))),
        }
    }
}
