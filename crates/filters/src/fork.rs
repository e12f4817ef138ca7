//! Fork filter

use sluice_event::Event;
use sluice_pipeline::{Filter, FilterCx, Input, Pipeline};

/// Joint filter copying the stream into a sub-pipeline while passing every
/// event through unchanged. The sub-pipeline's output is discarded.
pub struct Fork {
    sub: Option<Pipeline>,
}

impl Fork {
    pub fn new() -> Self {
        Self { sub: None }
    }
}

impl Default for Fork {
    fn default() -> Self {
        Self::new()
    }
}

impl Filter for Fork {
    fn describe(&self) -> &'static str {
        "fork"
    }

    fn clone_filter(&self) -> Box<dyn Filter> {
        Box::new(Self::new())
    }

    fn sub_slots(&self) -> usize {
        1
    }

    fn process(&mut self, cx: &mut FilterCx<'_>, evt: Event) {
        if self.sub.is_none() {
            self.sub = Some(cx.sub_pipeline(0, Input::null()));
        }
        if let Some(sub) = &self.sub {
            sub.input(evt.clone());
        }
        cx.output(evt);
    }

    fn reset(&mut self) {
        self.sub = None;
    }
}
