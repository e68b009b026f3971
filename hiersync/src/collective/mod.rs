//! Point-to-point collective algorithms over a [`PeerTransport`].
//!
//! [`PeerTransport`]: crate::transport::PeerTransport

mod allreduce;
mod barrier;
mod broadcast;
mod helpers;
mod reduce;

pub(crate) use allreduce::ring_allreduce;
pub(crate) use barrier::dissemination_barrier;
pub(crate) use broadcast::tree_broadcast;
pub(crate) use helpers::OpContext;
pub(crate) use reduce::tree_reduce;
