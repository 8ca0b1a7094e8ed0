//! Capture Kubernetes pod logs to disk.
//!
//! Two capture modes are provided:
//!
//! - a multi-pod tail ([`streamer::MultiPodLogStreamer`]) that follows every
//!   container of the pods matching a label selector and writes one file per
//!   container under `<base>/<namespace>/<pod>/<container>.log`;
//! - a namespace dump ([`namespace_writer`]) that filters a raw operator log
//!   down to the lines of one namespace and keeps the last few
//!   warning/error lines for inline display.

pub mod error;
pub mod kubernetes;
pub mod layout;
pub mod namespace_writer;
pub mod outcome;
pub mod parser;
pub mod registry;
pub mod ring;
pub mod streamer;
pub mod types;
pub mod utils;

pub use error::{CaptureError, Result};
pub use kubernetes::{TailOptions, tail_cluster_logs, tail_operator_logs};
pub use namespace_writer::{NamespaceDump, NamespaceLogWriter, dump_namespace_logs};
pub use ring::ImportantLogBuffer;
pub use streamer::{Completion, LogSource, MultiPodLogStreamer, SessionState, TailSession};
