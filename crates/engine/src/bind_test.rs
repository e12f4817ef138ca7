//! Tests for configuration binding

use std::str::FromStr;

use sluice_config::Config;

use crate::bind::{bind_module, EngineError};

#[test]
fn test_bind_full_graph() {
    let config = Config::from_str(
        r#"
[pipeline.inbound]
filters = [ { type = "demux-queue", to = "per-message" } ]

[pipeline.per-message]
filters = [ { type = "mux-queue", to = "upstream", key = "backend" } ]

[pipeline.upstream]
filters = [ { type = "connect", target = "127.0.0.1:9000" } ]
"#,
    )
    .unwrap();

    let module = bind_module(&config).unwrap();
    assert_eq!(module.layouts().len(), 3);
    assert!(module.layout("inbound").is_some());
    assert!(module.layout("per-message").is_some());
    assert!(module.layout("upstream").is_some());
}

#[test]
fn test_bind_every_filter_type() {
    let config = Config::from_str(
        r#"
[pipeline.sub]
filters = [ { type = "dump", tag = "sub" } ]

[pipeline.everything]
filters = [
    { type = "dump" },
    { type = "fork", to = "sub" },
    { type = "link", to = "sub" },
    { type = "replay", to = "sub" },
    { type = "mux", to = "sub" },
    { type = "mux-queue", to = "sub" },
    { type = "mux-fcgi", to = "sub" },
    { type = "demux", to = "sub" },
    { type = "demux-queue", to = "sub" },
    { type = "demux-fcgi", to = "sub" },
    { type = "connect", target = "localhost:1" },
]
"#,
    )
    .unwrap();

    let module = bind_module(&config).unwrap();
    let layout = module.layout("everything").unwrap();
    assert_eq!(layout.filter_count(), 11);
}

#[test]
fn test_layouts_can_allocate_after_bind() {
    let config = Config::from_str(
        r#"
[pipeline.main]
filters = [ { type = "dump", tag = "t" } ]
"#,
    )
    .unwrap();

    let module = bind_module(&config).unwrap();
    let layout = module.layout("main").unwrap();
    let pipeline = layout.alloc(
        sluice_pipeline::Context::new(),
        sluice_pipeline::Input::null(),
    );
    pipeline.input(sluice_event::Event::StreamStart);
    drop(pipeline);

    assert_eq!(layout.allocated(), 1);
    assert_eq!(layout.pooled(), 1);
}

#[test]
fn test_engine_error_display() {
    let err = EngineError::InvalidTarget {
        pipeline: "p".into(),
        target: "bad".into(),
    };
    assert_eq!(err.to_string(), "pipeline 'p': invalid connect target 'bad'");

    let err = EngineError::MissingPipeline {
        referenced_by: "listener 0.0.0.0:80".into(),
        pipeline: "gone".into(),
    };
    assert!(err.to_string().contains("unknown pipeline 'gone'"));
}
