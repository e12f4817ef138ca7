//! Tests for module binding and layout validation

use sluice_event::Event;

use crate::{BindError, Filter, FilterCx, LayoutSpec, ModuleBuilder};

struct Pass;

impl Filter for Pass {
    fn describe(&self) -> &'static str {
        "pass"
    }
    fn clone_filter(&self) -> Box<dyn Filter> {
        Box::new(Pass)
    }
    fn process(&mut self, cx: &mut FilterCx<'_>, evt: Event) {
        cx.output(evt);
    }
}

struct Joint;

impl Filter for Joint {
    fn describe(&self) -> &'static str {
        "joint"
    }
    fn clone_filter(&self) -> Box<dyn Filter> {
        Box::new(Joint)
    }
    fn sub_slots(&self) -> usize {
        1
    }
    fn process(&mut self, cx: &mut FilterCx<'_>, evt: Event) {
        cx.output(evt);
    }
}

#[test]
fn test_bind_empty_module() {
    let module = ModuleBuilder::new().bind().unwrap();
    assert!(module.layouts().is_empty());
}

#[test]
fn test_bind_resolves_named_reference() {
    let mut builder = ModuleBuilder::new();
    builder.add("sub", LayoutSpec::new().filter(Pass));
    builder.add("main", LayoutSpec::new().filter(Joint).to("sub"));

    let module = builder.bind().unwrap();
    assert!(module.layout("main").is_some());
    assert!(module.layout("sub").is_some());
    assert_eq!(module.layouts().len(), 2);
}

#[test]
fn test_bind_forward_reference() {
    // Declaration order must not matter
    let mut builder = ModuleBuilder::new();
    builder.add("main", LayoutSpec::new().filter(Joint).to("sub"));
    builder.add("sub", LayoutSpec::new().filter(Pass));

    assert!(builder.bind().is_ok());
}

#[test]
fn test_bind_inline_sub_pipeline() {
    let mut builder = ModuleBuilder::new();
    builder.add(
        "main",
        LayoutSpec::new()
            .filter(Joint)
            .to_inline(LayoutSpec::new().filter(Pass)),
    );

    let module = builder.bind().unwrap();
    // Named layout plus one anonymous indexed layout
    assert_eq!(module.layouts().len(), 2);
    assert!(module.layout("main").is_some());
}

#[test]
fn test_missing_to_is_a_bind_error() {
    let mut builder = ModuleBuilder::new();
    builder.add("main", LayoutSpec::new().filter(Joint));

    match builder.bind() {
        Err(BindError::MissingTo { pipeline, filter }) => {
            assert_eq!(pipeline, "main");
            assert_eq!(filter, "joint");
        }
        other => panic!("expected MissingTo, got {other:?}"),
    }
}

#[test]
fn test_unexpected_to_is_a_bind_error() {
    let mut builder = ModuleBuilder::new();
    builder.add("sub", LayoutSpec::new().filter(Pass));
    builder.add("main", LayoutSpec::new().filter(Pass).to("sub"));

    match builder.bind() {
        Err(BindError::UnexpectedTo { pipeline, filter }) => {
            assert_eq!(pipeline, "main");
            assert_eq!(filter, "pass");
        }
        other => panic!("expected UnexpectedTo, got {other:?}"),
    }
}

#[test]
fn test_unknown_pipeline_is_a_bind_error() {
    let mut builder = ModuleBuilder::new();
    builder.add("main", LayoutSpec::new().filter(Joint).to("nowhere"));

    match builder.bind() {
        Err(BindError::UnknownPipeline {
            pipeline,
            referenced_from,
        }) => {
            assert_eq!(pipeline, "nowhere");
            assert_eq!(referenced_from, "main");
        }
        other => panic!("expected UnknownPipeline, got {other:?}"),
    }
}

#[test]
fn test_duplicate_layout_is_a_bind_error() {
    let mut builder = ModuleBuilder::new();
    builder.add("main", LayoutSpec::new().filter(Pass));
    builder.add("main", LayoutSpec::new().filter(Pass));

    match builder.bind() {
        Err(BindError::DuplicateLayout { name }) => assert_eq!(name, "main"),
        other => panic!("expected DuplicateLayout, got {other:?}"),
    }
}

#[test]
fn test_mutually_recursive_layouts_bind() {
    let mut builder = ModuleBuilder::new();
    builder.add("a", LayoutSpec::new().filter(Joint).to("b"));
    builder.add("b", LayoutSpec::new().filter(Joint).to("a"));

    assert!(builder.bind().is_ok());
}

#[test]
fn test_shutdown_reaches_templates() {
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Stoppable {
        stopped: Rc<RefCell<bool>>,
    }
    impl Filter for Stoppable {
        fn describe(&self) -> &'static str {
            "stoppable"
        }
        fn clone_filter(&self) -> Box<dyn Filter> {
            Box::new(Stoppable {
                stopped: Rc::clone(&self.stopped),
            })
        }
        fn process(&mut self, cx: &mut FilterCx<'_>, evt: Event) {
            cx.output(evt);
        }
        fn shutdown(&mut self) {
            *self.stopped.borrow_mut() = true;
        }
    }

    let stopped = Rc::new(RefCell::new(false));
    let mut builder = ModuleBuilder::new();
    builder.add(
        "p",
        LayoutSpec::new().filter(Stoppable {
            stopped: Rc::clone(&stopped),
        }),
    );
    let module = builder.bind().unwrap();

    module.shutdown();
    assert!(*stopped.borrow());
}
