//! Resource generation module.
//!
//! Builds the static pod manifest for the local etcd member.
//!
//! ## Resources Generated
//!
//! | Piece | Purpose |
//! |-------|---------|
//! | etcd command | Default flags merged with user overrides, sorted by key |
//! | Image reference | Repository, arch suffix and etcd tag for the Kubernetes version |
//! | Static pod | Host-networked pod with data and PKI hostPath volumes and a `/health` probe |

pub mod arguments;
pub mod etcd_pod;
pub mod images;
pub mod static_pod;

pub use arguments::{build_argument_list, default_etcd_arguments, etcd_command};
pub use etcd_pod::build_etcd_pod;
pub use images::{ImageError, core_image};
