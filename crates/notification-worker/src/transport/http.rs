//! HTTP 推送网关通道
//!
//! 把单条推送 POST 到推送网关（FCM 代理等）。请求级超时由分发器统一控制，
//! 这里只设置建连超时。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{PushMessage, PushTransport, TransportError};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendRequest<'a> {
    token: &'a str,
    title: &'a str,
    body: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_url: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    deep_link: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendResponse {
    #[serde(alias = "name")]
    message_id: String,
}

pub struct HttpPushTransport {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpPushTransport {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        connect_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| TransportError::Unreachable(format!("创建 HTTP 客户端失败: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.endpoint)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    fn classify(err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_connect() {
            TransportError::Unreachable(err.to_string())
        } else {
            TransportError::Protocol(err.to_string())
        }
    }
}

#[async_trait]
impl PushTransport for HttpPushTransport {
    fn name(&self) -> &str {
        "http"
    }

    /// 任何 HTTP 响应都说明网关可达，只有连接层失败才算不可用
    async fn probe(&self) -> Result<(), TransportError> {
        let url = format!("{}/health", self.endpoint);
        match self.authorize(self.client.get(&url)).send().await {
            Ok(resp) => {
                debug!(status = %resp.status(), "推送网关探测成功");
                Ok(())
            }
            Err(e) => {
                warn!(endpoint = %self.endpoint, error = %e, "推送网关探测失败");
                Err(TransportError::Unreachable(e.to_string()))
            }
        }
    }

    async fn send(&self, message: &PushMessage) -> Result<String, TransportError> {
        let payload = SendRequest {
            token: &message.token,
            title: &message.title,
            body: &message.body,
            image_url: message.image_url.as_deref(),
            deep_link: message.deep_link.as_deref(),
        };

        let resp = self
            .authorize(self.client.post(self.messages_url()).json(&payload))
            .send()
            .await
            .map_err(Self::classify)?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            return Err(TransportError::InvalidToken(format!("HTTP {}", status.as_u16())));
        }
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(TransportError::Rejected {
                code: status.as_u16(),
                message,
            });
        }

        let body: SendResponse = resp.json().await.map_err(Self::classify)?;
        Ok(body.message_id)
    }
}
