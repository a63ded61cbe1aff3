//! eWAY managed payments (token billing) client.
//!
//! Only the `ProcessPayment` call is supported: one fixed SOAP envelope out,
//! four fields read back.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use rebill_shared::ProcessorConfig;

use super::{ChargeRequest, GatewayClient, GatewayClientFactory, GatewayError, GatewayResponse};

pub const MANAGED_PAYMENT_NAMESPACE: &str = "https://www.eway.com.au/gateway/managedpayment";
pub const PROCESS_PAYMENT_ACTION: &str = "https://www.eway.com.au/gateway/managedpayment/ProcessPayment";

#[derive(Debug, Clone)]
struct Credentials {
    customer_id: String,
    user_name: String,
    password: String,
}

pub struct EwayTokenClient {
    client: reqwest::Client,
    endpoint: String,
    credentials: Credentials,
    timeout: Duration,
}

impl EwayTokenClient {
    pub fn new(config: &ProcessorConfig, timeout: Duration) -> Result<Self, GatewayError> {
        if config.url_recur.trim().is_empty() {
            return Err(GatewayError::Configuration(format!(
                "processor {} has no recurring endpoint",
                config.id
            )));
        }

        let client = reqwest::Client::builder()
            .user_agent("Rebill/1.0")
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: config.url_recur.clone(),
            credentials: Credentials {
                customer_id: config.customer_id.clone(),
                user_name: config.user_name.clone(),
                password: config.password.clone(),
            },
            timeout,
        })
    }

    fn envelope(&self, request: &ChargeRequest) -> String {
        format!(
            concat!(
                r#"<?xml version="1.0" encoding="utf-8"?>"#,
                r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/" xmlns:man="{ns}">"#,
                "<soap:Header><man:eWAYHeader>",
                "<man:eWAYCustomerID>{customer_id}</man:eWAYCustomerID>",
                "<man:Username>{user_name}</man:Username>",
                "<man:Password>{password}</man:Password>",
                "</man:eWAYHeader></soap:Header>",
                "<soap:Body><man:ProcessPayment>",
                "<man:managedCustomerID>{token}</man:managedCustomerID>",
                "<man:amount>{amount}</man:amount>",
                "<man:InvoiceReference>{reference}</man:InvoiceReference>",
                "<man:InvoiceDescription>{description}</man:InvoiceDescription>",
                "</man:ProcessPayment></soap:Body></soap:Envelope>"
            ),
            ns = MANAGED_PAYMENT_NAMESPACE,
            customer_id = escape_xml(&self.credentials.customer_id),
            user_name = escape_xml(&self.credentials.user_name),
            password = escape_xml(&self.credentials.password),
            token = escape_xml(&request.customer_token),
            amount = request.amount_minor_units,
            reference = escape_xml(&request.invoice_reference),
            description = escape_xml(&request.invoice_description),
        )
    }
}

#[async_trait]
impl GatewayClient for EwayTokenClient {
    async fn process_payment(&self, request: &ChargeRequest) -> Result<GatewayResponse, GatewayError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "text/xml; charset=utf-8")
            .header("SOAPAction", PROCESS_PAYMENT_ACTION)
            .body(self.envelope(request))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::Timeout(self.timeout.as_secs())
                } else {
                    GatewayError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let parsed = parse_response(&body);

        // SOAP faults arrive with a 500 status and still carry a usable faultstring
        if !status.is_success() && parsed.fault.is_none() {
            return Err(GatewayError::InvalidResponse(format!("HTTP {}", status)));
        }
        if parsed == GatewayResponse::default() {
            return Err(GatewayError::InvalidResponse(
                "no transaction fields in response".to_string(),
            ));
        }

        Ok(parsed)
    }
}

/// Builds [`EwayTokenClient`]s sharing one request timeout.
pub struct EwayClientFactory {
    timeout: Duration,
}

impl EwayClientFactory {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl GatewayClientFactory for EwayClientFactory {
    fn build(&self, config: &ProcessorConfig) -> Result<Arc<dyn GatewayClient>, GatewayError> {
        Ok(Arc::new(EwayTokenClient::new(config, self.timeout)?))
    }
}

pub fn parse_response(body: &str) -> GatewayResponse {
    GatewayResponse {
        transaction_status: extract_xml_value(body, "ewayTrxnStatus"),
        transaction_number: extract_xml_value(body, "ewayTrxnNumber"),
        transaction_error: extract_xml_value(body, "ewayTrxnError"),
        fault: extract_xml_value(body, "faultstring"),
    }
}

// Element content, with or without a namespace prefix
fn extract_xml_value(xml: &str, tag: &str) -> Option<String> {
    let pattern = format!(r"<(?:\w+:)?{}(?:\s[^>]*)?>([^<]*)</(?:\w+:)?{}>", tag, tag);
    if let Ok(re) = regex::Regex::new(&pattern) {
        if let Some(caps) = re.captures(xml) {
            return caps.get(1).map(|m| unescape_xml(m.as_str().trim()));
        }
    }
    None
}

pub fn escape_xml(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

fn unescape_xml(value: &str) -> String {
    decode_char_refs(value)
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

// &#NN; and &#xNN; references; invalid code points are left as written
fn decode_char_refs(value: &str) -> String {
    if !value.contains("&#") {
        return value.to_string();
    }
    if let Ok(re) = regex::Regex::new(r"&#(?:[xX]([0-9a-fA-F]{1,6})|([0-9]{1,7}));") {
        return re
            .replace_all(value, |caps: &regex::Captures| {
                let code = match (caps.get(1), caps.get(2)) {
                    (Some(hex), _) => u32::from_str_radix(hex.as_str(), 16).ok(),
                    (None, Some(dec)) => dec.as_str().parse::<u32>().ok(),
                    (None, None) => None,
                };
                match code.and_then(char::from_u32) {
                    Some(c) => c.to_string(),
                    None => caps[0].to_string(),
                }
            })
            .into_owned();
    }
    value.to_string()
}
