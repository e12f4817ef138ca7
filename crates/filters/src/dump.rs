//! Dump filter

use sluice_event::Event;
use sluice_pipeline::{Filter, FilterCx};

/// Diagnostic pass-through: logs each event with a configurable tag.
pub struct Dump {
    tag: String,
}

impl Dump {
    pub fn new(tag: impl Into<String>) -> Self {
        Self { tag: tag.into() }
    }
}

impl Filter for Dump {
    fn describe(&self) -> &'static str {
        "dump"
    }

    fn clone_filter(&self) -> Box<dyn Filter> {
        Box::new(Self {
            tag: self.tag.clone(),
        })
    }

    fn process(&mut self, cx: &mut FilterCx<'_>, evt: Event) {
        match &evt {
            Event::Data(data) => {
                tracing::info!(target: "dump", tag = %self.tag, kind = evt.kind(), size = data.len());
            }
            Event::StreamEnd(err) => {
                tracing::info!(target: "dump", tag = %self.tag, kind = evt.kind(), error = %err);
            }
            _ => {
                tracing::info!(target: "dump", tag = %self.tag, kind = evt.kind());
            }
        }
        cx.output(evt);
    }
}
