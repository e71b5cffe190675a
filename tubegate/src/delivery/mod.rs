//! Request-scoped delivery: selection, range negotiation, pipeline, sinks and
//! lifecycle management.

pub mod lifecycle;
pub mod pipeline;
pub mod range;
pub mod selector;
pub mod sink;

pub use lifecycle::{GuardedStream, LifecycleGuard, LifecyclePhase, PipelineResources};
pub use pipeline::{PipelineOutput, StreamPipeline};
pub use range::{RangeWindow, negotiate};
pub use selector::{FormatSelection, MediaKind, QualityRequest, select};
pub use sink::{DeliveryHeaders, DeliveryResult, DeliveryTarget, FileDelivery, deliver};
