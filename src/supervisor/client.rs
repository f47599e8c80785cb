//! HTTP client for a host's addressed endpoint

use std::time::Duration;

use reqwest::StatusCode;

use super::SupervisorError;
use crate::address::HostAddress;
use crate::server::{StatusReport, COMMAND_ID_HEADER, TRACE_ID_HEADER};

/// A completed invocation (status 200 or 500)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvocationReply {
    pub status: u16,
    /// Newline-joined `"<severity>: <message>"` lines
    pub body: String,
    pub command_id: Option<String>,
}

impl InvocationReply {
    pub fn succeeded(&self) -> bool {
        self.status == StatusCode::OK.as_u16()
    }
}

/// Talks to one host, identified by its [`HostAddress`]
#[derive(Debug, Clone)]
pub struct HostClient {
    http: reqwest::Client,
    address: HostAddress,
    url: String,
    probe_timeout: Duration,
    request_timeout: Option<Duration>,
}

impl HostClient {
    pub fn new(
        address: HostAddress,
        connect_timeout: Duration,
        request_timeout: Option<Duration>,
    ) -> Result<Self, SupervisorError> {
        let url = address.url();
        let http = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .no_proxy()
            .build()
            .map_err(|source| SupervisorError::Transport {
                url: url.clone(),
                source,
            })?;

        Ok(Self {
            http,
            address,
            url,
            probe_timeout: connect_timeout,
            request_timeout,
        })
    }

    pub fn address(&self) -> &HostAddress {
        &self.address
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn transport(&self, source: reqwest::Error) -> SupervisorError {
        SupervisorError::Transport {
            url: self.url.clone(),
            source,
        }
    }

    /// Status probe. Anything but a 200 with a status body is a failure.
    pub async fn status(&self) -> Result<StatusReport, SupervisorError> {
        let response = self
            .http
            .get(&self.url)
            .timeout(self.probe_timeout)
            .send()
            .await
            .map_err(|e| self.transport(e))?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(protocol_error("status probe", status, &body));
        }

        response
            .json::<StatusReport>()
            .await
            .map_err(|e| SupervisorError::Protocol(format!("malformed status body: {e}")))
    }

    /// Post `procedure` and wait for the host to run it
    pub async fn invoke(
        &self,
        procedure: &str,
        trace_id: &str,
    ) -> Result<InvocationReply, SupervisorError> {
        let mut request = self
            .http
            .post(&self.url)
            .header(TRACE_ID_HEADER, trace_id)
            .header(reqwest::header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(procedure.to_string());
        if let Some(timeout) = self.request_timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await.map_err(|e| self.transport(e))?;
        let status = response.status();
        let command_id = response
            .headers()
            .get(COMMAND_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.map_err(|e| self.transport(e))?;

        match status {
            StatusCode::OK | StatusCode::INTERNAL_SERVER_ERROR => Ok(InvocationReply {
                status: status.as_u16(),
                body,
                command_id,
            }),
            other => Err(protocol_error(procedure, other, &body)),
        }
    }
}

fn protocol_error(what: &str, status: StatusCode, body: &str) -> SupervisorError {
    let reason = status.canonical_reason().unwrap_or("unknown status");
    let body = body.trim();
    if body.is_empty() {
        SupervisorError::Protocol(format!("{what}: {} {reason}", status.as_u16()))
    } else {
        SupervisorError::Protocol(format!("{what}: {} {reason}: {body}", status.as_u16()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_carries_reason() {
        let err = protocol_error("Demo.Method", StatusCode::NOT_FOUND, "no host is serving /x/");
        assert_eq!(
            err.to_string(),
            "unexpected response from host: Demo.Method: 404 Not Found: no host is serving /x/"
        );

        let err = protocol_error("status probe", StatusCode::SERVICE_UNAVAILABLE, "  ");
        assert!(err.to_string().ends_with("503 Service Unavailable"));
    }

    #[test]
    fn test_reply_success_is_200_only() {
        let ok = InvocationReply {
            status: 200,
            ..Default::default()
        };
        let failed = InvocationReply {
            status: 500,
            ..Default::default()
        };
        assert!(ok.succeeded());
        assert!(!failed.succeeded());
    }
}
