//! Collaborators shared by every judge task of the daemon.

use std::sync::Arc;

use olympus_common::store::ProblemStore;

use crate::channel::TaskChannel;
use crate::compile::CompileService;
use crate::reporter::Reporter;

/// Built once in `main` and cloned into the consumer
#[derive(Clone)]
pub struct Context {
    pub store: Arc<dyn ProblemStore>,
    pub channel: Arc<dyn TaskChannel>,
    pub compiler: CompileService,
    pub reporter: Arc<dyn Reporter>,
    /// Bytes of input and answer attached to each case detail
    pub data_display_limit: usize,
}
