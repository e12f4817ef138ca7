//! Connect filter
//!
//! Terminal filter: on the first event it opens an [`Outbound`] to the
//! configured target and chains the reply stream to its own output. `Data`
//! goes to the upstream socket; a `StreamEnd` from the caller flushes and
//! half-closes the write side.

use sluice_event::Event;
use sluice_net::{Outbound, OutboundOptions};
use sluice_pipeline::{Filter, FilterCx};

/// Terminal filter attaching an outbound TCP connection.
pub struct Connect {
    host: String,
    port: u16,
    options: OutboundOptions,
    outbound: Option<Outbound>,
}

impl Connect {
    pub fn new(host: impl Into<String>, port: u16, options: OutboundOptions) -> Self {
        Self {
            host: host.into(),
            port,
            options,
            outbound: None,
        }
    }

    /// Parse a `host:port` target.
    pub fn parse_target(target: &str) -> Option<(String, u16)> {
        let (host, port) = target.rsplit_once(':')?;
        let port: u16 = port.parse().ok()?;
        if host.is_empty() {
            return None;
        }
        Some((host.to_string(), port))
    }

    fn ensure_outbound(&mut self, cx: &FilterCx<'_>) {
        if self.outbound.is_none() {
            let outbound = Outbound::new(cx.output_handle(), self.options.clone());
            outbound.connect(self.host.clone(), self.port);
            self.outbound = Some(outbound);
        }
    }
}

impl Filter for Connect {
    fn describe(&self) -> &'static str {
        "connect"
    }

    fn clone_filter(&self) -> Box<dyn Filter> {
        Box::new(Self::new(
            self.host.clone(),
            self.port,
            self.options.clone(),
        ))
    }

    fn process(&mut self, cx: &mut FilterCx<'_>, evt: Event) {
        self.ensure_outbound(cx);
        let Some(outbound) = &self.outbound else {
            return;
        };
        match evt {
            Event::Data(data) => outbound.send(data),
            Event::StreamEnd(_) => outbound.end(),
            _ => {}
        }
    }

    fn reset(&mut self) {
        if let Some(outbound) = self.outbound.take() {
            // A stream that ended normally is left to flush and half-close
            // on its own; anything else is an abort.
            if !outbound.ended() {
                outbound.close();
            }
        }
    }

    fn shutdown(&mut self) {
        if let Some(outbound) = &self.outbound {
            outbound.end();
        }
    }
}

#[cfg(test)]
#[path = "connect_test.rs"]
mod connect_test;
