use std::time::Duration;

use quick_xml::escape::escape;
use reqwest::header::CONTENT_TYPE;

use super::{xml, RawReading, TelemetryClient, TelemetryError};
use crate::config::TelemetryConfig;

/// SOAP 1.1 client for the terminal variable endpoint.
pub struct SoapTelemetryClient {
    http: reqwest::Client,
    endpoint: String,
    namespace: String,
    soap_action: Option<String>,
    username: Option<String>,
    password: Option<String>,
}

impl SoapTelemetryClient {
    pub fn new(cfg: &TelemetryConfig) -> Result<Self, TelemetryError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .map_err(|e| TelemetryError::DeviceUnreachable(format!("failed to build http client: {e}")))?;

        Ok(Self {
            http,
            endpoint: cfg.endpoint.clone(),
            namespace: cfg.namespace.clone(),
            soap_action: cfg.soap_action.clone(),
            username: cfg.username.clone(),
            password: cfg.password.clone(),
        })
    }

    fn envelope(&self, terminal_id: &str, variable_name: &str) -> String {
        let mut credentials = String::new();
        if let Some(user) = &self.username {
            credentials.push_str(&format!("<Username>{}</Username>", escape(user.as_str())));
        }
        if let Some(pass) = &self.password {
            credentials.push_str(&format!("<Password>{}</Password>", escape(pass.as_str())));
        }

        format!(
            concat!(
                r#"<?xml version="1.0" encoding="utf-8"?>"#,
                r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">"#,
                r#"<soap:Body><GetTerminalVariable xmlns="{ns}">"#,
                "{credentials}",
                "<TerminalId>{terminal}</TerminalId>",
                "<VariableName>{variable}</VariableName>",
                "</GetTerminalVariable></soap:Body></soap:Envelope>"
            ),
            ns = escape(self.namespace.as_str()),
            credentials = credentials,
            terminal = escape(terminal_id),
            variable = escape(variable_name),
        )
    }
}

#[async_trait::async_trait]
impl TelemetryClient for SoapTelemetryClient {
    async fn fetch_reading(
        &self,
        terminal_id: &str,
        variable_name: &str,
    ) -> Result<RawReading, TelemetryError> {
        let mut request = self
            .http
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "text/xml; charset=utf-8")
            .body(self.envelope(terminal_id, variable_name));
        if let Some(action) = &self.soap_action {
            request = request.header("SOAPAction", format!("\"{action}\""));
        }

        let response = request
            .send()
            .await
            .map_err(|e| TelemetryError::DeviceUnreachable(format!("{terminal_id}: {e}")))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TelemetryError::DeviceUnreachable(format!("{terminal_id}: {e}")))?;

        interpret_response(terminal_id, variable_name, &body, status.is_success())
    }
}

/// Map a SOAP response body to a reading or a classified failure.
///
/// SOAP faults arrive with HTTP 500, so the body is inspected before the
/// status code.
pub fn interpret_response(
    terminal_id: &str,
    variable_name: &str,
    body: &str,
    http_ok: bool,
) -> Result<RawReading, TelemetryError> {
    let tree = match xml::parse(body) {
        Ok(tree) => tree,
        Err(e) if http_ok => return Err(TelemetryError::InvalidResponse(format!("{terminal_id}: {e}"))),
        Err(_) => {
            return Err(TelemetryError::DeviceUnreachable(format!(
                "{terminal_id}: http error without parseable body"
            )))
        }
    };

    if let Some(fault) = xml::resolve_fault(&tree) {
        let lowered = fault.to_ascii_lowercase();
        let offline = ["offline", "not connected", "non connesso", "disconnected"]
            .iter()
            .any(|needle| lowered.contains(needle));
        return Err(if offline {
            TelemetryError::DeviceOffline(format!("{terminal_id}: {fault}"))
        } else {
            TelemetryError::DeviceUnreachable(format!("{terminal_id}: {fault}"))
        });
    }

    if !http_ok {
        return Err(TelemetryError::DeviceUnreachable(format!("{terminal_id}: http error")));
    }

    if xml::resolve_online(&tree) == Some(false) {
        return Err(TelemetryError::DeviceOffline(format!("{terminal_id}: reported offline")));
    }

    let variable = xml::resolve_named_variable(&tree, variable_name);
    let value = variable
        .as_ref()
        .and_then(|v| v.value.as_deref())
        .and_then(xml::parse_level);
    let timestamp = variable
        .as_ref()
        .and_then(|v| v.timestamp.as_deref())
        .and_then(xml::parse_timestamp);

    if variable.is_none() {
        tracing::debug!(terminal_id, variable_name, "variable not present in telemetry response");
    }

    Ok(RawReading {
        value,
        timestamp,
        serial: xml::resolve_serial(&tree),
    })
}
