//! Typed ports over channel endpoints.
//!
//! Data ports ([`OutPort`], [`InPort`]) move [`PortData`] values through one
//! channel. Variable ports ([`RefPort`], [`VarPort`]) use a request channel
//! and a response channel to read and write a value owned by another actor.
//! Shape and dtype adaptation happens on the sending side through a
//! [`Transformer`], so receivers only ever see their own contract.

mod data;
mod payload;
mod transformer;
mod var;

pub use data::{InPort, OutPort};
pub use payload::{PortData, PortKind};
pub use transformer::{
    AbstractTransformer, IdentityTransformer, TransformOp, Transformer, VirtualPortTransformer,
};
pub use var::{RefPort, VarCommand, VarPort, VarRequest};

pub use crate::Transport::PortInitializer;
