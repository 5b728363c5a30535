//! `PanelApi` over JSON/HTTPS.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::api::PanelApi;
use crate::config::BackendConfig;
use crate::error::{Field, PanelError};
use crate::model::{
    BindingDraft, BindingPatch, NewNode, Node, NodeChanges, NodeId, ServiceBinding, ServiceId,
};

/// Error body the backend sends with 4xx/5xx responses
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    detail: Option<String>,
    #[serde(default)]
    field: Option<String>,
}

pub struct HttpPanelApi {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpPanelApi {
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, PanelError> {
        let client = Client::builder()
            .user_agent(concat!("nodepanel/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| PanelError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()),
        })
    }

    pub fn from_config(config: &BackendConfig) -> Result<Self, PanelError> {
        Self::new(
            config.base_url.clone(),
            config.resolve_token(),
            config.timeout(),
        )
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, PanelError> {
        let token = self
            .token
            .as_deref()
            .ok_or_else(|| PanelError::Authorization("no access token configured".into()))?;
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(%method, %url, "backend request");
        Ok(self
            .client
            .request(method, url)
            .bearer_auth(token)
            .header("Accept", "application/json"))
    }

    async fn send(&self, builder: RequestBuilder, context: &str) -> Result<Response, PanelError> {
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                PanelError::Network(format!("{} timed out", context))
            } else {
                PanelError::Network(format!("{}: {}", context, e))
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        let body: ErrorBody = serde_json::from_str(&text).unwrap_or_default();
        let message = body.detail.unwrap_or_else(|| {
            if text.is_empty() {
                status.to_string()
            } else {
                text.clone()
            }
        });
        tracing::warn!(%status, context, %message, "backend rejected request");

        Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => PanelError::Authorization(message),
            StatusCode::NOT_FOUND => PanelError::NotFound(context.to_string()),
            StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY | StatusCode::BAD_REQUEST => {
                PanelError::Conflict {
                    message,
                    field: body.field.as_deref().and_then(Field::from_wire),
                }
            }
            s => PanelError::Server {
                status: s.as_u16(),
                message,
            },
        })
    }

    async fn parse<T: DeserializeOwned>(response: Response, context: &str) -> Result<T, PanelError> {
        let text = response
            .text()
            .await
            .map_err(|e| PanelError::Network(format!("{}: {}", context, e)))?;
        serde_json::from_str(&text).map_err(|source| PanelError::Parse {
            context: context.to_string(),
            source,
        })
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
        context: &str,
    ) -> Result<T, PanelError> {
        let response = self.send(builder, context).await?;
        Self::parse(response, context).await
    }
}

#[async_trait]
impl PanelApi for HttpPanelApi {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn list_nodes(&self) -> Result<Vec<Node>, PanelError> {
        let req = self.request(Method::GET, "/nodes")?;
        self.fetch(req, "GET /nodes").await
    }

    async fn create_node(&self, node: &NewNode) -> Result<Node, PanelError> {
        let req = self.request(Method::POST, "/nodes")?.json(node);
        self.fetch(req, "POST /nodes").await
    }

    async fn update_node(&self, id: NodeId, changes: &NodeChanges) -> Result<Node, PanelError> {
        let path = format!("/nodes/{}", id);
        let req = self.request(Method::PUT, &path)?.json(changes);
        self.fetch(req, &format!("PUT {}", path)).await
    }

    async fn delete_node(&self, id: NodeId) -> Result<(), PanelError> {
        let path = format!("/nodes/{}", id);
        let req = self.request(Method::DELETE, &path)?;
        self.send(req, &format!("DELETE {}", path)).await?;
        Ok(())
    }

    async fn reconnect_node(&self, id: NodeId) -> Result<(), PanelError> {
        let path = format!("/nodes/{}/reconnect", id);
        let req = self.request(Method::POST, &path)?;
        self.send(req, &format!("POST {}", path)).await?;
        Ok(())
    }

    async fn list_services(&self, node_id: NodeId) -> Result<Vec<ServiceBinding>, PanelError> {
        let path = format!("/nodes/{}/services", node_id);
        let req = self.request(Method::GET, &path)?;
        self.fetch(req, &format!("GET {}", path)).await
    }

    async fn create_service(
        &self,
        node_id: NodeId,
        draft: &BindingDraft,
    ) -> Result<ServiceBinding, PanelError> {
        let path = format!("/nodes/{}/services", node_id);
        let req = self.request(Method::POST, &path)?.json(draft);
        self.fetch(req, &format!("POST {}", path)).await
    }

    async fn update_service(
        &self,
        node_id: NodeId,
        service_id: ServiceId,
        patch: &BindingPatch,
    ) -> Result<ServiceBinding, PanelError> {
        let path = format!("/nodes/{}/services/{}", node_id, service_id);
        let req = self.request(Method::PUT, &path)?.json(patch);
        self.fetch(req, &format!("PUT {}", path)).await
    }

    async fn delete_service(
        &self,
        node_id: NodeId,
        service_id: ServiceId,
    ) -> Result<(), PanelError> {
        let path = format!("/nodes/{}/services/{}", node_id, service_id);
        let req = self.request(Method::DELETE, &path)?;
        self.send(req, &format!("DELETE {}", path)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NodeStatus, Protocol, ProtocolSettings};
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> HttpPanelApi {
        HttpPanelApi::new(server.uri(), Some("t0ken".into()), Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn test_list_nodes_sends_bearer_and_parses() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/nodes"))
            .and(header("authorization", "Bearer t0ken"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"id": 1, "name": "eu-1", "address": "1.2.3.4", "status": "connected",
                 "xray_version": "1.8.24", "connection": {"qr_code": "data:image/png;base64,AA"}},
                {"id": 2, "name": "us-1", "address": "5.6.7.8", "port": 62050, "status": "weird"}
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let nodes = client(&server).list_nodes().await.unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].status, NodeStatus::Active);
        assert!(nodes[0].connection.as_ref().unwrap().qr_code.is_some());
        assert_eq!(nodes[1].status, NodeStatus::Connecting);
        assert_eq!(nodes[1].port, Some(62050));
    }

    #[tokio::test]
    async fn test_create_node_posts_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/nodes"))
            .and(body_json(serde_json::json!({"name": "eu-1", "address": "1.2.3.4"})))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!(
                {"id": 9, "name": "eu-1", "address": "1.2.3.4", "status": "connecting"}
            )))
            .mount(&server)
            .await;

        let node = client(&server)
            .create_node(&NewNode {
                name: "eu-1".into(),
                address: "1.2.3.4".into(),
                port: None,
            })
            .await
            .unwrap();
        assert_eq!(node.id, 9);
        assert_eq!(node.status, NodeStatus::Connecting);
    }

    #[tokio::test]
    async fn test_status_codes_map_to_taxonomy() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/nodes/4"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/nodes/4/reconnect"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/nodes/4/services"))
            .respond_with(ResponseTemplate::new(409).set_body_json(serde_json::json!(
                {"detail": "vless already bound", "field": "protocol"}
            )))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/nodes"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let api = client(&server);
        assert!(matches!(api.delete_node(4).await, Err(PanelError::NotFound(_))));
        assert!(matches!(
            api.reconnect_node(4).await,
            Err(PanelError::Authorization(_))
        ));
        let draft = BindingDraft::new(ProtocolSettings::Vless {
            id: "b831381d-6324-4d53-ad4f-8cda48b30811".into(),
            flow: None,
        });
        match api.create_service(4, &draft).await {
            Err(PanelError::Conflict { message, field }) => {
                assert_eq!(message, "vless already bound");
                assert_eq!(field, Some(Field::Protocol));
            }
            other => panic!("expected conflict, got {:?}", other),
        }
        assert!(matches!(
            api.list_nodes().await,
            Err(PanelError::Server { status: 503, .. })
        ));
    }

    #[tokio::test]
    async fn test_malformed_payload_is_parse_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/nodes/1/services"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"id": 1, "node_id": 1, "protocol": "wireguard", "settings": {}}
            ])))
            .mount(&server)
            .await;

        let err = client(&server).list_services(1).await.unwrap_err();
        assert!(matches!(err, PanelError::Parse { .. }));
    }

    #[tokio::test]
    async fn test_update_service_parses_binding() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/nodes/1/services/3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!(
                {"id": 3, "node_id": 1, "protocol": "trojan", "settings": {"password": "new"}}
            )))
            .mount(&server)
            .await;

        let binding = client(&server)
            .update_service(
                1,
                3,
                &BindingPatch::new(ProtocolSettings::Trojan {
                    password: "new".into(),
                }),
            )
            .await
            .unwrap();
        assert_eq!(binding.protocol(), Protocol::Trojan);
    }

    #[tokio::test]
    async fn test_missing_token_fails_without_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let api = HttpPanelApi::new(server.uri(), None, Duration::from_secs(1)).unwrap();
        assert!(matches!(
            api.list_nodes().await,
            Err(PanelError::Authorization(_))
        ));
    }

    #[tokio::test]
    async fn test_timeout_is_network_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/nodes"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let api =
            HttpPanelApi::new(server.uri(), Some("t".into()), Duration::from_millis(50)).unwrap();
        assert!(matches!(api.list_nodes().await, Err(PanelError::Network(_))));
    }
}
