//! Link filter

use sluice_event::Event;
use sluice_pipeline::{Filter, FilterCx, Pipeline};

/// Joint filter routing the stream through a sub-pipeline; the
/// sub-pipeline's output replaces this filter's own output.
pub struct Link {
    sub: Option<Pipeline>,
}

impl Link {
    pub fn new() -> Self {
        Self { sub: None }
    }
}

impl Default for Link {
    fn default() -> Self {
        Self::new()
    }
}

impl Filter for Link {
    fn describe(&self) -> &'static str {
        "link"
    }

    fn clone_filter(&self) -> Box<dyn Filter> {
        Box::new(Self::new())
    }

    fn sub_slots(&self) -> usize {
        1
    }

    fn process(&mut self, cx: &mut FilterCx<'_>, evt: Event) {
        if self.sub.is_none() {
            self.sub = Some(cx.sub_pipeline(0, cx.output_handle()));
        }
        if let Some(sub) = &self.sub {
            sub.input(evt);
        }
    }

    fn reset(&mut self) {
        self.sub = None;
    }
}
