//! Messaging backbone for a process-per-actor dataflow runtime.
//!
//! Actors run as forked OS processes and talk through single-producer /
//! single-consumer channels. A channel is either a ring buffer inside a
//! shared-memory segment or a DDS-style keep-last topic. Typed ports sit on
//! top of the channels and speak the [`Structs::Metadata`] wire format.
//!
//! ```text
//!  parent process                         actor process (fork)
//!  ┌──────────────────┐                   ┌──────────────────┐
//!  │ MultiProcessing  │── fork/waitpid ──▶│ Actor (ctl word) │
//!  │ SharedMemManager │                   │ OutPort / InPort │
//!  │ ChannelFactory   │                   │ RefPort / VarPort│
//!  └────────┬─────────┘                   └────────┬─────────┘
//!           │        /dev/shm segment (ring)       │
//!           └──────────────────────────────────────┘
//! ```

// Module naming follows project convention
#[allow(non_snake_case)]
pub mod Core {
    pub mod SharedMemory;
    pub mod alloc;
    pub mod futex;
    pub use alloc::{SharedMemManager, SharedSegment};
    pub use SharedMemory::{
        attach_shared_memory, create_shared_memory, open_or_create_shared_memory,
        unlink_shared_memory, RawHandle, SharedMemoryBackend,
    };
}

#[allow(non_snake_case)]
pub mod Structs {
    pub mod Arrays;
    pub mod Wire;
    pub use Arrays::{Array, Element, SparseArray};
    pub use Wire::{DType, Metadata, MetadataHeader, MAX_DIMS, METADATA_HEADER_SIZE};
}

#[allow(non_snake_case)]
pub mod Transport;

#[allow(non_snake_case)]
pub mod Actors;

#[allow(non_snake_case)]
pub mod Ports;

#[allow(non_snake_case)]
pub mod Debug {
    pub mod StructDebug;
}

pub mod config;
pub mod error;

pub use config::RuntimeConfig;
pub use error::{MessagingError, Result};

pub use Actors::{Actor, ActorHandle, ActorId, ActorStatus, MultiProcessing, ProcessType};
pub use Core::{SharedMemManager, SharedSegment};
pub use Ports::{
    AbstractTransformer, IdentityTransformer, InPort, OutPort, PortData, PortInitializer,
    PortKind, RefPort, TransformOp, Transformer, VarCommand, VarPort, VarRequest,
    VirtualPortTransformer,
};
pub use Structs::{Array, DType, Element, Metadata, SparseArray};
pub use Transport::{
    Channel, ChannelBackend, ChannelBuilder, ChannelFactory, DdsBackend, DdsTransport,
    RecvEndpoint, SendEndpoint,
};
