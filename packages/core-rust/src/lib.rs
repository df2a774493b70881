//! `mqrpc` core: wire envelopes, broker transport, and the correlated call
//! primitive shared by callers and the gateway.

pub mod call;
pub mod client;
pub mod correlation;
pub mod envelope;
pub mod transport;

pub use call::{CallError, RpcCaller};
pub use client::{GatewayClient, DEFAULT_CALL_TIMEOUT, DEFAULT_GATEWAY_QUEUE};
pub use correlation::CorrelationId;
pub use envelope::{CallEnvelope, EnvelopeError, Params, ServiceEnvelope, ERROR_KEY};
pub use transport::{
    open_broker, Broker, BrokerPtr, ConsumeOptions, Consumer, Connection, Delivery, MemoryBroker,
    MessageProperties, QueueOptions, TransportError,
};
