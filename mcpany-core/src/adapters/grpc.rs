//! Dynamic gRPC transport adapter.
//!
//! Methods resolve by fully-qualified name against an injected descriptor
//! pool (descriptor loading itself happens outside the core). Request JSON
//! decodes into a `DynamicMessage` shaped by the method's input descriptor;
//! the unary response marshals back to JSON. tonic carries the wire work
//! through a small hand-rolled codec, since the generated-code codecs assume
//! compile-time message types.

use std::sync::Arc;

use prost_reflect::{DescriptorPool, DynamicMessage, MessageDescriptor, MethodDescriptor};
use serde_json::Value;
use tonic::client::Grpc;
use tonic::codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder};
use tonic::transport::Channel;
use tonic::{Code, Status};
use tracing::debug;

use crate::definition::GrpcCall;
use crate::error::{Error, Result};
use crate::pool::Pool;
use crate::transform::apply_output_transform;

pub struct GrpcAdapter {
    pool: Arc<dyn Pool<Channel>>,
    descriptors: DescriptorPool,
}

impl GrpcAdapter {
    pub fn new(pool: Arc<dyn Pool<Channel>>, descriptors: DescriptorPool) -> Self {
        Self { pool, descriptors }
    }

    /// Resolve `package.Service.Method` (or `package.Service/Method`) in the
    /// descriptor pool.
    pub fn resolve_method(&self, fqn: &str) -> Result<MethodDescriptor> {
        let (service_name, method_name) = split_method_fqn(fqn).ok_or_else(|| {
            Error::UpstreamUnreachable {
                reason: format!("malformed gRPC method name {fqn:?}"),
            }
        })?;

        let service = self
            .descriptors
            .get_service_by_name(service_name)
            .ok_or_else(|| Error::UpstreamUnreachable {
                reason: format!("gRPC service {service_name:?} not found in descriptors"),
            })?;
        let method = service
            .methods()
            .find(|method| method.name() == method_name)
            .ok_or_else(|| Error::UpstreamUnreachable {
                reason: format!("method {method_name:?} not found on {service_name:?}"),
            })?;
        Ok(method)
    }

    /// Decode the argument JSON into a message matching the method's input
    /// descriptor.
    pub fn decode_input(&self, method: &MethodDescriptor, raw_inputs: &[u8]) -> Result<DynamicMessage> {
        let payload: &[u8] = if raw_inputs.is_empty() { b"{}" } else { raw_inputs };
        let mut deserializer = serde_json::Deserializer::from_slice(payload);
        let message = DynamicMessage::deserialize(method.input(), &mut deserializer)
            .map_err(|err| Error::SchemaViolation {
                reason: format!("arguments do not match {}: {err}", method.input().full_name()),
            })?;
        deserializer.end().map_err(|err| Error::SchemaViolation {
            reason: format!("trailing content after arguments: {err}"),
        })?;
        Ok(message)
    }

    pub async fn execute(&self, tool_name: &str, call: &GrpcCall, raw_inputs: &[u8]) -> Result<Value> {
        let method = self.resolve_method(&call.method)?;
        let request = self.decode_input(&method, raw_inputs)?;

        let channel = self.pool.get().await?;
        let mut grpc = Grpc::new(channel);
        grpc.ready().await.map_err(|err| Error::UpstreamUnreachable {
            reason: format!("channel not ready: {err}"),
        })?;

        let path = format!(
            "/{}/{}",
            method.parent_service().full_name(),
            method.name()
        );
        let path = tonic::codegen::http::uri::PathAndQuery::try_from(path).map_err(|err| {
            Error::UpstreamUnreachable {
                reason: format!("invalid method path: {err}"),
            }
        })?;

        let mut request = tonic::Request::new(request);
        if let Some(timeout_ms) = call.timeout_ms {
            request.set_timeout(std::time::Duration::from_millis(timeout_ms));
        }

        debug!(tool = tool_name, method = %call.method, "dispatching gRPC unary call");
        let response = grpc
            .unary(request, path, DynamicCodec::new(method.clone()))
            .await
            .map_err(map_status)?;

        let output = serde_json::to_value(response.into_inner()).map_err(|err| {
            Error::ResponseParseFailed {
                reason: format!("failed to marshal response message: {err}"),
            }
        })?;

        match &call.output_transform {
            Some(spec) => {
                let body = serde_json::to_vec(&output).map_err(|err| Error::ResponseParseFailed {
                    reason: err.to_string(),
                })?;
                apply_output_transform(spec, &body)
            }
            None => Ok(output),
        }
    }
}

fn split_method_fqn(fqn: &str) -> Option<(&str, &str)> {
    if let Some((service, method)) = fqn.rsplit_once('/') {
        if !service.is_empty() && !method.is_empty() {
            return Some((service, method));
        }
        return None;
    }
    let (service, method) = fqn.rsplit_once('.')?;
    if service.is_empty() || method.is_empty() {
        return None;
    }
    Some((service, method))
}

fn map_status(status: Status) -> Error {
    match status.code() {
        Code::Unavailable | Code::Aborted => Error::UpstreamStatus {
            status: 503,
            body: status.message().to_string(),
        },
        Code::ResourceExhausted => Error::UpstreamStatus {
            status: 429,
            body: status.message().to_string(),
        },
        Code::DeadlineExceeded => Error::DeadlineExceeded {
            elapsed: std::time::Duration::ZERO,
        },
        Code::Internal | Code::Unknown | Code::DataLoss => Error::UpstreamStatus {
            status: 500,
            body: status.message().to_string(),
        },
        _ => Error::UpstreamStatus {
            status: 400,
            body: format!("{}: {}", status.code(), status.message()),
        },
    }
}

#[derive(Clone)]
struct DynamicCodec {
    method: MethodDescriptor,
}

impl DynamicCodec {
    fn new(method: MethodDescriptor) -> Self {
        Self { method }
    }
}

impl Codec for DynamicCodec {
    type Encode = DynamicMessage;
    type Decode = DynamicMessage;
    type Encoder = DynamicEncoder;
    type Decoder = DynamicDecoder;

    fn encoder(&mut self) -> Self::Encoder {
        DynamicEncoder
    }

    fn decoder(&mut self) -> Self::Decoder {
        DynamicDecoder(self.method.output())
    }
}

struct DynamicEncoder;

impl Encoder for DynamicEncoder {
    type Item = DynamicMessage;
    type Error = Status;

    fn encode(&mut self, item: DynamicMessage, dst: &mut EncodeBuf<'_>) -> std::result::Result<(), Status> {
        prost::Message::encode(&item, dst)
            .map_err(|err| Status::internal(format!("failed to encode request: {err}")))
    }
}

struct DynamicDecoder(MessageDescriptor);

impl Decoder for DynamicDecoder {
    type Item = DynamicMessage;
    type Error = Status;

    fn decode(
        &mut self,
        src: &mut DecodeBuf<'_>,
    ) -> std::result::Result<Option<DynamicMessage>, Status> {
        let message = DynamicMessage::decode(self.0.clone(), src)
            .map_err(|err| Status::internal(format!("failed to decode response: {err}")))?;
        Ok(Some(message))
    }
}
