pub use peercall_tokio_transport::{
    ReconnectPolicy, SocketIoTransportFactory, Transport, TransportEvent, TransportFactory,
};
