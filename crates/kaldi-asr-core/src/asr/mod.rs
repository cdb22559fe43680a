mod chunker;
mod request_id;
mod traits;
mod ws_gateway;

#[cfg(test)]
pub mod mock;

pub use chunker::{Chunk, Chunker};
pub use request_id::RequestId;
pub use traits::{
    Connection, InferRequest, InferResult, ModelMetadata, StreamCallback, TensorMetadata,
    Transport, TransportError,
};
pub use ws_gateway::WsGatewayTransport;
