//! Ordered payload transform stages.
//!
//! A [`Pipeline`] has an inbound channel (applied to decoded request
//! payloads before a handler runs) and an outbound channel (applied by the
//! writer loop before a message is encoded). Stages run in registration
//! order; the first error short-circuits the channel and the message is
//! dropped by the caller.
//!
//! Stages are registered while building the server and the pipeline is
//! frozen behind an `Arc` before the first connection is accepted.

use std::sync::Arc;

use bytes::Bytes;

use crate::errors::PipelineError;
use crate::session::Session;

/// One transform step.
pub trait Stage: Send + Sync {
    /// Transform `payload` for `session`, or reject it.
    fn process(&self, session: &Session, payload: Bytes) -> Result<Bytes, PipelineError>;
}

impl<F> Stage for F
where
    F: Fn(&Session, Bytes) -> Result<Bytes, PipelineError> + Send + Sync,
{
    fn process(&self, session: &Session, payload: Bytes) -> Result<Bytes, PipelineError> {
        self(session, payload)
    }
}

/// An ordered list of stages.
#[derive(Clone, Default)]
pub struct PipelineChannel {
    stages: Vec<Arc<dyn Stage>>,
}

impl PipelineChannel {
    /// Append a stage.
    pub fn push_back(&mut self, stage: impl Stage + 'static) {
        self.stages.push(Arc::new(stage));
    }

    /// Run every stage in order.
    pub fn process(&self, session: &Session, payload: Bytes) -> Result<Bytes, PipelineError> {
        self.stages
            .iter()
            .try_fold(payload, |payload, stage| stage.process(session, payload))
    }

    /// Number of stages.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Whether the channel passes payloads through untouched.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

/// Inbound and outbound stage channels.
#[derive(Clone, Default)]
pub struct Pipeline {
    inbound: PipelineChannel,
    outbound: PipelineChannel,
}

impl Pipeline {
    /// Pipeline with no stages in either direction.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages applied to decoded request payloads.
    pub fn inbound(&self) -> &PipelineChannel {
        &self.inbound
    }

    /// Stages applied to payloads before encoding.
    pub fn outbound(&self) -> &PipelineChannel {
        &self.outbound
    }

    /// Builder-style: append an inbound stage.
    #[must_use]
    pub fn with_inbound(mut self, stage: impl Stage + 'static) -> Self {
        self.inbound.push_back(stage);
        self
    }

    /// Builder-style: append an outbound stage.
    #[must_use]
    pub fn with_outbound(mut self, stage: impl Stage + 'static) -> Self {
        self.outbound.push_back(stage);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::detached_session;
    use assert_matches::assert_matches;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn append(suffix: &'static str) -> impl Stage {
        move |_: &Session, payload: Bytes| -> Result<Bytes, PipelineError> {
            let mut out = payload.to_vec();
            out.extend_from_slice(suffix.as_bytes());
            Ok(Bytes::from(out))
        }
    }

    #[test]
    fn empty_channel_passes_through() {
        let session = detached_session();
        let out = Pipeline::new()
            .outbound()
            .process(&session, Bytes::from_static(b"raw"))
            .unwrap();
        assert_eq!(&out[..], b"raw");
    }

    #[test]
    fn stages_run_in_registration_order() {
        let session = detached_session();
        let pipeline = Pipeline::new().with_outbound(append("-a")).with_outbound(append("-b"));
        assert_eq!(pipeline.outbound().len(), 2);

        let out = pipeline
            .outbound()
            .process(&session, Bytes::from_static(b"x"))
            .unwrap();
        assert_eq!(&out[..], b"x-a-b");
    }

    #[test]
    fn first_error_short_circuits() {
        let session = detached_session();
        let later_calls = Arc::new(AtomicUsize::new(0));
        let counter = later_calls.clone();

        let pipeline = Pipeline::new()
            .with_outbound(|_: &Session, _: Bytes| -> Result<Bytes, PipelineError> {
                Err(PipelineError::rejected("filter", "blocked"))
            })
            .with_outbound(move |_: &Session, payload: Bytes| -> Result<Bytes, PipelineError> {
                let _ = counter.fetch_add(1, Ordering::SeqCst);
                Ok(payload)
            });

        assert_matches!(
            pipeline.outbound().process(&session, Bytes::new()),
            Err(PipelineError::Rejected { stage, .. }) if stage == "filter"
        );
        assert_eq!(later_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn channels_are_independent() {
        let session = detached_session();
        let pipeline = Pipeline::new().with_inbound(append("-in"));
        assert!(pipeline.outbound().is_empty());

        let out = pipeline
            .inbound()
            .process(&session, Bytes::from_static(b"req"))
            .unwrap();
        assert_eq!(&out[..], b"req-in");
    }

    #[test]
    fn stage_sees_session() {
        let session = detached_session();
        session.bind(5).unwrap();
        let pipeline = Pipeline::new().with_outbound(|s: &Session, _: Bytes| -> Result<Bytes, PipelineError> {
            Ok(Bytes::from(s.uid().to_string()))
        });
        let out = pipeline.outbound().process(&session, Bytes::new()).unwrap();
        assert_eq!(&out[..], b"5");
    }
}
