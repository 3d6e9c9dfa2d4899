//! Topic lifecycle over the control-plane connection (§4.8).

use std::sync::Arc;

use strmkit_protocol::api::{
    self, validate_topic_name, CreateTopicRequest, DeleteTopicRequest, ListTopicsRequest,
    ListTopicsResponse, TopicOperationStatus, TopicSpec,
};

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::metrics::Metrics;

/// Client-side name validation fails before any wire I/O; report it as a
/// configuration problem with the call, not a protocol error from a broker
/// that was never contacted.
fn validate_name_or_invalid_configuration(name: &str) -> Result<()> {
    validate_topic_name(name).map_err(|e| Error::InvalidConfiguration(e.to_string()))
}

pub struct Admin {
    connection: Arc<Connection>,
    metrics: Arc<dyn Metrics>,
}

impl Admin {
    #[must_use]
    pub fn new(connection: Arc<Connection>, metrics: Arc<dyn Metrics>) -> Self {
        Self { connection, metrics }
    }

    /// Creates a topic. `timeout_ms` of `None` lets the broker use its own
    /// default.
    pub async fn create_topic(
        &self,
        name: &str,
        topic_spec: TopicSpec,
        dry_run: bool,
        timeout_ms: Option<i32>,
    ) -> Result<TopicOperationStatus> {
        validate_name_or_invalid_configuration(name)?;
        let request = CreateTopicRequest {
            name: name.to_owned(),
            dry_run,
            timeout_ms,
            topic_spec,
        };
        let body = request.encode_envelope()?;
        self.metrics.request_sent(api::api_key::ADMIN_CREATE);
        let response_bytes = self
            .connection
            .send_unary(api::api_key::ADMIN_CREATE, api::ADMIN_VERSION, body)
            .await
            .inspect_err(|_| self.metrics.request_failed(api::api_key::ADMIN_CREATE))?;
        let mut buf = response_bytes;
        TopicOperationStatus::decode_envelope(&mut buf).map_err(Into::into)
    }

    /// Deletes a topic. `force` bypasses broker-side safety checks (e.g. a
    /// non-empty topic).
    pub async fn delete_topic(&self, name: &str, force: bool) -> Result<TopicOperationStatus> {
        validate_name_or_invalid_configuration(name)?;
        let request = DeleteTopicRequest {
            name: name.to_owned(),
            force,
        };
        let body = request.encode_envelope();
        self.metrics.request_sent(api::api_key::ADMIN_DELETE);
        let response_bytes = self
            .connection
            .send_unary(api::api_key::ADMIN_DELETE, api::ADMIN_VERSION, body)
            .await
            .inspect_err(|_| self.metrics.request_failed(api::api_key::ADMIN_DELETE))?;
        let mut buf = response_bytes;
        TopicOperationStatus::decode_envelope(&mut buf).map_err(Into::into)
    }

    /// Lists topics, optionally filtered by name.
    pub async fn list_topics(
        &self,
        filters: Vec<String>,
        summary: bool,
        system: bool,
    ) -> Result<ListTopicsResponse> {
        let request = ListTopicsRequest {
            filters,
            summary,
            system,
        };
        let body = request.encode_envelope();
        self.metrics.request_sent(api::api_key::ADMIN_LIST);
        let response_bytes = self
            .connection
            .send_unary(api::api_key::ADMIN_LIST, api::ADMIN_VERSION, body)
            .await
            .inspect_err(|_| self.metrics.request_failed(api::api_key::ADMIN_LIST))?;
        let mut buf = response_bytes;
        ListTopicsResponse::decode(&mut buf).map_err(Into::into)
    }
}
