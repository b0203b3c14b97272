pub(crate) mod fusion;
pub(crate) mod group;
pub(crate) mod node_group;
pub(crate) mod operation;
pub(crate) mod pixel;
pub(crate) mod schedule;
pub(crate) mod state;
