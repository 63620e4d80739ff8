use crate::config::{PassThrough, ProcessorConfig};
use crate::diagnostics::CollectingErrorListener;
use crate::error::{Severity, StxError};
use crate::output::{EventRecorder, OutputResolver, OutputSink};
use crate::processor::Processor;
use crate::program::{Program, ProgramBuilder, TemplateDecl, Traverse, Visibility};
use crate::source::{feed_str, transform_str};
use std::cell::RefCell;
use std::rc::Rc;
use stxflow_path::{Attribute, QName};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn program(build: impl FnOnce(&mut ProgramBuilder)) -> Program {
    let mut builder = ProgramBuilder::new();
    build(&mut builder);
    builder.build().expect("program should build")
}

fn transform(program: &Program, input: &str) -> String {
    transform_with(program, input, ProcessorConfig::default()).0
}

fn transform_with(
    program: &Program,
    input: &str,
    config: ProcessorConfig,
) -> (String, CollectingErrorListener) {
    init_logger();
    let listener = CollectingErrorListener::new();
    let mut out = EventRecorder::new();
    {
        let mut processor = Processor::new(program, &mut out)
            .with_config(config)
            .with_error_listener(listener.clone());
        feed_str(input, &mut processor).expect("transformation should succeed");
    }
    (out.render(), listener)
}

/// Shares its recording with the test after the processor is gone.
#[derive(Clone, Default)]
struct SharedRecorder(Rc<RefCell<EventRecorder>>);

impl OutputSink for SharedRecorder {
    fn start_document(&mut self) -> Result<(), StxError> {
        self.0.borrow_mut().start_document()
    }

    fn end_document(&mut self) -> Result<(), StxError> {
        self.0.borrow_mut().end_document()
    }

    fn start_element(&mut self, name: &QName, attributes: &[Attribute]) -> Result<(), StxError> {
        self.0.borrow_mut().start_element(name, attributes)
    }

    fn end_element(&mut self, name: &QName) -> Result<(), StxError> {
        self.0.borrow_mut().end_element(name)
    }

    fn characters(&mut self, text: &str) -> Result<(), StxError> {
        self.0.borrow_mut().characters(text)
    }

    fn comment(&mut self, text: &str) -> Result<(), StxError> {
        self.0.borrow_mut().comment(text)
    }

    fn processing_instruction(&mut self, target: &str, data: &str) -> Result<(), StxError> {
        self.0.borrow_mut().processing_instruction(target, data)
    }

    fn start_cdata(&mut self) -> Result<(), StxError> {
        self.0.borrow_mut().start_cdata()
    }

    fn end_cdata(&mut self) -> Result<(), StxError> {
        self.0.borrow_mut().end_cdata()
    }
}

#[derive(Clone, Default)]
struct Documents(Rc<RefCell<Vec<(String, SharedRecorder)>>>);

impl Documents {
    fn render(&self, href: &str) -> Option<String> {
        self.0
            .borrow()
            .iter()
            .find(|(h, _)| h == href)
            .map(|(_, sink)| sink.0.borrow().render())
    }
}

impl OutputResolver for Documents {
    fn resolve(&mut self, href: &str) -> Result<Box<dyn OutputSink>, StxError> {
        if href.starts_with("forbidden") {
            return Err(StxError::resource(format!("Can't open `{}'", href)));
        }
        let sink = SharedRecorder::default();
        self.0.borrow_mut().push((href.to_string(), sink.clone()));
        Ok(Box::new(sink))
    }
}

mod dispatch_tests {
    use super::*;

    #[test]
    fn test_children_are_processed_in_place() {
        let program = program(|b| {
            b.template("doc", |t| {
                t.literal_element("out", &[], |e| {
                    e.process_children();
                });
            })
            .template("item", |t| {
                t.literal_element("i", &[("n", "{@n}")], |e| {
                    e.value_of("position()");
                });
            });
        });
        let out = transform(&program, r#"<doc><item n="a"/><item n="b"/></doc>"#);
        assert_eq!(out, r#"<out><i n="a">1</i><i n="b">2</i></out>"#);
    }

    #[test]
    fn test_unrequested_children_are_skipped() {
        let program = program(|b| {
            b.template("doc", |t| {
                t.text("only");
            });
        });
        assert_eq!(transform(&program, "<doc><a>lost</a></doc>"), "only");
    }

    #[test]
    fn test_priority_and_declaration_order() {
        let program = program(|b| {
            b.template("*", |t| {
                t.text("any");
            })
            .template("item", |t| {
                t.text("item");
            })
            .template_with(TemplateDecl::new("item").priority(-1.0), |t| {
                t.text("low");
            });
        });
        assert_eq!(transform(&program, "<item/>"), "item");
    }


    #[test]
    fn test_name_test_beats_wildcard_declared_after_it() {
        let program = program(|b| {
            b.template("item", |t| {
                t.text("item");
            })
            .template("*", |t| {
                t.text("any");
            });
        });
        assert_eq!(transform(&program, "<item/>"), "item");
    }

    #[test]
    fn test_union_branches_count_positions_separately() {
        let program = program(|b| {
            b.template("doc", |t| {
                t.process_children();
            })
            .template("a | b", |t| {
                t.value_of("concat(name(.), position())");
            });
        });
        assert_eq!(
            transform(&program, "<doc><a/><b/><a/><c/></doc>"),
            "a1b1a2<c></c>"
        );
    }

    #[test]
    fn test_equal_priorities_warn_and_first_wins() {
        let program = program(|b| {
            b.template("item", |t| {
                t.text("first");
            })
            .template("item", |t| {
                t.text("second");
            });
        });
        let (out, listener) = transform_with(&program, "<item/>", ProcessorConfig::default());
        assert_eq!(out, "first");
        assert_eq!(listener.count(Severity::Warning), 1);
    }

    #[test]
    fn test_process_self_runs_the_next_best_template() {
        let program = program(|b| {
            b.template("item", |t| {
                t.literal_element("wrapped", &[], |e| {
                    e.process_self();
                });
            })
            .template("*", |t| {
                t.literal_element("any", &[], |e| {
                    e.process_children();
                });
            });
        });
        let out = transform(&program, "<doc><item>x</item></doc>");
        assert_eq!(out, "<any><wrapped><any>x</any></wrapped></any>");
    }

    #[test]
    fn test_process_self_falls_back_to_default_rule() {
        let program = program(|b| {
            b.template("item", |t| {
                t.text("[");
                t.process_self();
                t.text("]");
            });
        });
        assert_eq!(transform(&program, "<item>x</item>"), "[<item>x</item>]");
    }

    #[test]
    fn test_process_attributes() {
        let program = program(|b| {
            b.template("e", |t| {
                t.literal_element("copy", &[], |e| {
                    e.process_attributes();
                    e.process_children();
                });
            })
            .template("@a", |t| {
                t.attribute("b", ".");
            });
        });
        let out = transform(&program, r#"<e a="1" c="2">t</e>"#);
        assert_eq!(out, r#"<copy b="1" c="2">t</copy>"#);
    }

    #[test]
    fn test_has_child_nodes_looks_ahead() {
        let program = program(|b| {
            b.template("item", |t| {
                t.if_else(
                    "has-child-nodes()",
                    |y| {
                        y.text("full");
                    },
                    |n| {
                        n.text("empty");
                    },
                );
            });
        });
        let out = transform(&program, "<doc><item>x</item><item/></doc>");
        assert_eq!(out, "<doc>fullempty</doc>");
    }

    #[test]
    fn test_second_traversal_is_reported_and_skipped() {
        let program = program(|b| {
            b.template("doc", |t| {
                t.process_children();
                t.process_self();
                t.text("done");
            });
        });
        let (out, listener) = transform_with(&program, "<doc>x</doc>", ProcessorConfig::default());
        assert_eq!(out, "xdone");
        assert_eq!(listener.count(Severity::Error), 1);
        assert!(
            listener.messages()[0].contains("Encountered `process-self' after `process-children'")
        );
    }
}

mod sibling_tests {
    use super::*;

    fn sections() -> Program {
        program(|b| {
            b.template("doc", |t| {
                t.literal_element("doc", &[], |e| {
                    e.process_children();
                });
            })
            .template("title", |t| {
                t.literal_element("section", &[("t", "{@t}")], |e| {
                    e.process_siblings(Traverse::new().while_matching("para"));
                });
            })
            .template("para", |t| {
                t.literal_element("p", &[], |e| {
                    e.process_children();
                });
            });
        })
    }

    #[test]
    fn test_while_groups_following_siblings() {
        let input = r#"<doc><title t="A"/><para>1</para><para>2</para><title t="B"/><para>3</para></doc>"#;
        assert_eq!(
            transform(&sections(), input),
            r#"<doc><section t="A"><p>1</p><p>2</p></section><section t="B"><p>3</p></section></doc>"#
        );
    }

    #[test]
    fn test_waiter_resumes_at_parent_end() {
        let input = r#"<doc><title t="A"/></doc>"#;
        assert_eq!(transform(&sections(), input), r#"<doc><section t="A"></section></doc>"#);
    }

    #[test]
    fn test_until_stops_before_matching_sibling() {
        let program = program(|b| {
            b.template("start", |t| {
                t.text("(");
                t.process_siblings(Traverse::new().until_matching("stop"));
                t.text(")");
            })
            .template("x", |t| {
                t.text("x");
            })
            .template("stop", |t| {
                t.text("!");
            });
        });
        let out = transform(&program, "<r><start/><x/><x/><stop/><x/></r>");
        assert_eq!(out, "<r>(xx)!x</r>");
    }
}

mod variable_tests {
    use super::*;

    #[test]
    fn test_group_variable_survives_across_templates() {
        let program = program(|b| {
            b.variable("count", "0")
                .template("doc", |t| {
                    t.process_children();
                    t.literal_element("total", &[], |e| {
                        e.value_of("$count");
                    });
                })
                .template("item", |t| {
                    t.assign("count", "$count + 1");
                });
        });
        let out = transform(&program, "<doc><item/><item/><item/></doc>");
        assert_eq!(out, "<total>3</total>");
    }

    #[test]
    fn test_locals_conditions_and_choose() {
        let program = program(|b| {
            b.template("n", |t| {
                t.variable("v", "number(@x)");
                t.if_else(
                    "$v > 5",
                    |y| {
                        y.text("big");
                    },
                    |n| {
                        n.text("small");
                    },
                );
                t.choose(|c| {
                    c.when("$v = 1", |w| {
                        w.text("one");
                    })
                    .otherwise(|o| {
                        o.text("other");
                    });
                });
            });
        });
        let out = transform(&program, r#"<doc><n x="1"/><n x="7"/></doc>"#);
        assert_eq!(out, "<doc>smallonebigother</doc>");
    }

    #[test]
    fn test_loops() {
        let program = program(|b| {
            b.template("doc", |t| {
                t.for_each_item("i", "(1, 2, 3)", |l| {
                    l.value_of("$i");
                });
                t.variable("n", "0");
                t.while_("$n < 3", |w| {
                    w.assign("n", "$n + 1");
                    w.value_of("$n");
                });
            });
        });
        assert_eq!(transform(&program, "<doc/>"), "123123");
    }

    #[test]
    fn test_suspension_inside_loop_resumes_same_iteration() {
        let program = program(|b| {
            b.template("doc", |t| {
                t.for_each_item("i", "(1, 2)", |l| {
                    l.value_of("$i");
                    l.process_children();
                });
            });
        });
        let (out, listener) = transform_with(&program, "<doc><a/></doc>", ProcessorConfig::default());
        assert_eq!(out, "1<a></a>2");
        assert_eq!(listener.count(Severity::Error), 1);
    }


    #[test]
    fn test_locals_survive_suspension_unchanged() {
        let program = program(|b| {
            b.template("doc", |t| {
                t.variable("v", "'before'");
                t.text("A");
                t.literal_element("w", &[], |e| {
                    e.process_children();
                });
                t.value_of("$v");
            })
            .template("a", |t| {
                t.variable("v", "'child'");
                t.value_of("$v");
            });
        });
        assert_eq!(
            transform(&program, "<doc><a/><a/></doc>"),
            "A<w>childchild</w>before"
        );
    }

    #[test]
    fn test_content_variables() {
        let program = program(|b| {
            b.template("doc", |t| {
                t.variable_content("v", |c| {
                    c.text("a");
                    c.value_of("1 + 1");
                });
                t.value_of("concat($v, '!')");
            });
        });
        assert_eq!(transform(&program, "<doc/>"), "a2!");
    }

    #[test]
    fn test_procedures_with_params() {
        let program = program(|b| {
            b.procedure("greet", |p| {
                p.param("who", Some("'nobody'"));
                p.text("hello ");
                p.value_of("$who");
                p.text(";");
            })
            .template("doc", |t| {
                t.call_procedure_with("greet", Traverse::new().param("who", "name(.)"));
                t.call_procedure("greet");
            });
        });
        assert_eq!(transform(&program, "<doc/>"), "hello doc;hello nobody;");
    }

    #[test]
    fn test_params_flow_to_children() {
        let program = program(|b| {
            b.template("doc", |t| {
                t.process_children_with(Traverse::new().param("sep", "'-'"));
            })
            .template("item", |t| {
                t.param("sep", Some("'?'"));
                t.value_of("$sep");
            });
        });
        assert_eq!(transform(&program, "<doc><item/><item/></doc>"), "--");
    }

    #[test]
    fn test_missing_required_param() {
        let program = program(|b| {
            b.template("doc", |t| {
                t.required_param("p");
                t.text("x");
            });
        });
        let (out, listener) = transform_with(&program, "<doc/>", ProcessorConfig::default());
        assert_eq!(out, "x");
        assert!(listener.messages()[0].contains("Missing value for required parameter `p'"));
    }

    #[test]
    fn test_top_level_parameters() {
        let program = program(|b| {
            b.param("greeting", Some("'hi'")).template("doc", |t| {
                t.value_of("$greeting");
            });
        });
        assert_eq!(transform(&program, "<doc/>"), "hi");

        let mut out = EventRecorder::new();
        {
            let mut processor = Processor::new(&program, &mut out);
            processor.set_parameter("greeting", "hello");
            feed_str("<doc/>", &mut processor).unwrap();
        }
        assert_eq!(out.render(), "hello");
    }

    #[test]
    fn test_recursion_entry_point_gets_fresh_group_frame() {
        let build = |entry: bool| {
            program(|b| {
                let decl = TemplateDecl::new("sec");
                let decl = if entry { decl.recursion_entry_point() } else { decl };
                b.variable("n", "0").template_with(decl, |t| {
                    t.assign("n", "$n + 1");
                    t.value_of("$n");
                    t.process_children();
                });
            })
        };
        assert_eq!(transform(&build(true), "<sec><sec/></sec>"), "11");
        assert_eq!(transform(&build(false), "<sec><sec/></sec>"), "12");
    }

    #[test]
    fn test_assign_to_undeclared_is_reported() {
        let program = program(|b| {
            b.template("doc", |t| {
                t.assign("ghost", "1");
                t.text("ok");
            });
        });
        let (out, listener) = transform_with(&program, "<doc/>", ProcessorConfig::default());
        assert_eq!(out, "ok");
        assert!(listener.messages()[0].contains("Can't assign to undeclared variable `ghost'"));
    }
}

mod group_tests {
    use super::*;

    #[test]
    fn test_named_target_group() {
        let program = program(|b| {
            b.template("doc", |t| {
                t.process_children_with(Traverse::new().group("inner"));
            })
            .template("item", |t| {
                t.text("outer");
            })
            .group("inner", |g| {
                g.template("item", |t| {
                    t.text("inner");
                });
            });
        });
        assert_eq!(transform(&program, "<doc><item/></doc>"), "inner");
    }

    #[test]
    fn test_children_stay_in_the_template_group() {
        let program = program(|b| {
            b.template("doc", |t| {
                t.process_children_with(Traverse::new().group("g"));
            })
            .group("g", |g| {
                g.template("a", |t| {
                    t.text("a");
                    t.process_children();
                })
                .template("b", |t| {
                    t.text("b");
                });
            })
            .template("b", |t| {
                t.text("outer-b");
            });
        });
        assert_eq!(transform(&program, "<doc><a><b/></a></doc>"), "ab");
    }

    #[test]
    fn test_public_and_global_visibility() {
        let program = program(|b| {
            b.template("doc", |t| {
                t.process_children();
            })
            .group("lib", |g| {
                g.template_with(
                    TemplateDecl::new("item").visibility(Visibility::Public),
                    |t| {
                        t.text("public");
                    },
                )
                .template_with(
                    TemplateDecl::new("note").visibility(Visibility::Global),
                    |t| {
                        t.text("global");
                    },
                )
                .template("hidden", |t| {
                    t.text("private");
                });
            });
        });
        let (out, _) = transform_with(
            &program,
            "<doc><item/><note/><hidden>h</hidden></doc>",
            ProcessorConfig::default().with_pass_through(PassThrough::Text),
        );
        assert_eq!(out, "publicglobalh");
    }

    #[test]
    fn test_unknown_group_is_reported() {
        let program = program(|b| {
            b.template("doc", |t| {
                t.process_children_with(Traverse::new().group("nope"));
                t.text("after");
            });
        });
        let (out, listener) = transform_with(&program, "<doc><x/></doc>", ProcessorConfig::default());
        assert_eq!(out, "after");
        assert!(listener.messages()[0].contains("Group `nope' not defined"));
    }
}

mod output_tests {
    use super::*;

    #[test]
    fn test_pass_through_levels() {
        let program = program(|_| {});
        let input = "<a>x<!--c--><b>y</b><?p d?></a>";
        let run = |pass| {
            transform_with(
                &program,
                input,
                ProcessorConfig::default().with_pass_through(pass),
            )
            .0
        };
        assert_eq!(run(PassThrough::Nothing), "");
        assert_eq!(run(PassThrough::Text), "xy");
        assert_eq!(run(PassThrough::Markup), "<a>x<b>y</b></a>");
        assert_eq!(run(PassThrough::All), "<a>x<!--c--><b>y</b><?p d?></a>");
    }

    #[test]
    fn test_strip_space() {
        let program = program(|_| {});
        let input = "<a> <b/>\n t </a>";
        let config = ProcessorConfig::default().with_strip_space(true);
        assert_eq!(transform_with(&program, input, config).0, "<a><b></b>\n t </a>");
    }

    #[test]
    fn test_computed_elements_and_attributes() {
        let program = program(|b| {
            b.namespace("h", "urn:h").template("doc", |t| {
                t.element("{name(.)}-x", |e| {
                    e.attribute("id", "'7'");
                    e.attribute_content("label", |a| {
                        a.text("L");
                    });
                    e.start_element("h:inner");
                    e.end_element("h:inner");
                });
            });
        });
        assert_eq!(
            transform(&program, "<doc/>"),
            r#"<doc-x id="7" label="L"><h:inner></h:inner></doc-x>"#
        );
    }

    #[test]
    fn test_attribute_after_content_is_reported() {
        let program = program(|b| {
            b.template("doc", |t| {
                t.literal_element("e", &[], |e| {
                    e.text("t");
                    e.attribute("late", "1");
                });
            });
        });
        let (out, listener) = transform_with(&program, "<doc/>", ProcessorConfig::default());
        assert_eq!(out, "<e>t</e>");
        assert_eq!(listener.count(Severity::Error), 1);
    }

    #[test]
    fn test_copy() {
        let program = program(|b| {
            b.template("*", |t| {
                t.copy(|c| {
                    c.process_children();
                });
            })
            .template("keep", |t| {
                t.copy_with_attributes(|_| {});
            });
        });
        let out = transform(&program, r#"<a x="1"><b y="2"/><keep z="3"/>t</a>"#);
        assert_eq!(out, r#"<a><b></b><keep z="3"></keep>t</a>"#);
    }

    #[test]
    fn test_comments_instructions_and_cdata() {
        let program = program(|b| {
            b.template("doc", |t| {
                t.comment(|c| {
                    c.text("a--b");
                });
                t.processing_instruction("pi", |p| {
                    p.text("x?>y");
                });
                t.cdata(|c| {
                    c.text("<z>");
                });
            });
        });
        assert_eq!(
            transform(&program, "<doc/>"),
            "<!--a- -b--><?pi x? >y?><![CDATA[<z>]]>"
        );
    }

    #[test]
    fn test_markup_inside_comment_is_rejected() {
        let program = program(|b| {
            b.template("doc", |t| {
                t.comment(|c| {
                    c.literal_element("no", &[], |_| {});
                    c.text("text");
                });
            });
        });
        let (out, listener) = transform_with(&program, "<doc/>", ProcessorConfig::default());
        assert_eq!(out, "<!--text-->");
        assert!(listener.count(Severity::Error) >= 1);
    }


    #[test]
    fn test_recursive_cdata_is_rejected_once() {
        let program = program(|b| {
            b.procedure("p", |p| {
                p.param("d", Some("0"));
                p.cdata(|c| {
                    c.text("[");
                    c.value_of("$d");
                    c.if_("$d < 1", |i| {
                        i.call_procedure_with("p", Traverse::new().param("d", "$d + 1"));
                    });
                    c.text("]");
                });
            })
            .template("doc", |t| {
                t.call_procedure("p");
            });
        });
        let (out, listener) = transform_with(&program, "<doc/>", ProcessorConfig::default());
        assert_eq!(out, "<![CDATA[[0]]]>");
        assert_eq!(listener.count(Severity::Error), 1);
        assert!(
            listener.messages()[0].contains("Nested use of the same CDATA section"),
            "{:?}",
            listener.messages()
        );
    }

    #[test]
    fn test_result_document() {
        let program = program(|b| {
            b.template("doc", |t| {
                t.result_document("{name(.)}.xml", |r| {
                    r.literal_element("side", &[], |s| {
                        s.text("s");
                    });
                });
                t.text("main");
            });
        });
        let documents = Documents::default();
        let mut out = EventRecorder::new();
        {
            let mut processor =
                Processor::new(&program, &mut out).with_output_resolver(documents.clone());
            feed_str("<doc/>", &mut processor).unwrap();
        }
        assert_eq!(out.render(), "main");
        assert_eq!(documents.render("doc.xml").as_deref(), Some("<side>s</side>"));
    }

    #[test]
    fn test_unresolvable_result_document_is_skipped() {
        let program = program(|b| {
            b.template("doc", |t| {
                t.result_document("forbidden.xml", |r| {
                    r.text("lost");
                });
                t.text("main");
            });
        });
        let listener = CollectingErrorListener::new();
        let mut out = EventRecorder::new();
        {
            let mut processor = Processor::new(&program, &mut out)
                .with_output_resolver(Documents::default())
                .with_error_listener(listener.clone());
            feed_str("<doc/>", &mut processor).unwrap();
        }
        assert_eq!(out.render(), "main");
        assert!(matches!(
            listener.diagnostics()[0].error,
            StxError::Resource(_)
        ));
    }
}

mod error_tests {
    use super::*;

    #[test]
    fn test_evaluation_error_yields_empty() {
        let program = program(|b| {
            b.template("doc", |t| {
                t.text("[");
                t.value_of("$undefined");
                t.text("]");
            });
        });
        let (out, listener) = transform_with(&program, "<doc/>", ProcessorConfig::default());
        assert_eq!(out, "[]");
        assert_eq!(listener.count(Severity::Error), 1);
    }

    #[test]
    fn test_strict_mode_aborts_on_error() {
        let program = program(|b| {
            b.template("doc", |t| {
                t.value_of("$undefined");
            });
        });
        let mut out = EventRecorder::new();
        let config = ProcessorConfig::default().with_strict(true);
        assert!(transform_str(&program, "<doc/>", config, &mut out).is_err());
    }

    #[test]
    fn test_recursion_limit() {
        let program = program(|b| {
            b.procedure("again", |p| {
                p.call_procedure("again");
            })
            .template("doc", |t| {
                t.call_procedure("again");
            });
        });
        let mut out = EventRecorder::new();
        let config = ProcessorConfig::default().with_recursion_limit(10);
        let err = transform_str(&program, "<doc/>", config, &mut out).unwrap_err();
        assert_eq!(err, StxError::RecursionLimit(10));
    }

    #[test]
    fn test_terminating_message() {
        let program = program(|b| {
            b.template("doc", |t| {
                t.message("'note'");
                t.message_content(true, |m| {
                    m.text("stop");
                });
                t.text("unreached");
            });
        });
        let mut out = EventRecorder::new();
        let err = transform_str(&program, "<doc/>", ProcessorConfig::default(), &mut out)
            .unwrap_err();
        assert_eq!(err, StxError::Terminated("stop".to_string()));
        assert_eq!(out.render(), "");
    }

    #[test]
    fn test_unbalanced_events_are_fatal() {
        let program = program(|_| {});
        let mut out = EventRecorder::new();
        let mut processor = Processor::new(&program, &mut out);
        processor.start_document().unwrap();
        processor.start_element(QName::new("a"), vec![]).unwrap();
        assert!(processor.end_element(&QName::new("b")).is_err());
        assert!(processor.characters("late").is_err());
    }

    #[test]
    fn test_unclosed_element_at_end_is_fatal() {
        let program = program(|_| {});
        let mut out = EventRecorder::new();
        let mut processor = Processor::new(&program, &mut out);
        processor.start_document().unwrap();
        processor.start_element(QName::new("a"), vec![]).unwrap();
        let err = processor.end_document().unwrap_err();
        assert!(err.to_string().contains("was never closed"));
    }

    #[test]
    fn test_diagnostics_carry_instruction_location() {
        let program = program(|b| {
            b.template("doc", |t| {
                t.at(4, 9).value_of("$nope");
            });
        });
        let (_, listener) = transform_with(&program, "<doc/>", ProcessorConfig::default());
        let diagnostic = &listener.diagnostics()[0];
        assert_eq!(diagnostic.location.map(|l| (l.line, l.column)), Some((4, 9)));
    }
}

mod observer_tests {
    use super::*;
    use crate::observer::TraceRecorder;

    #[test]
    fn test_trace_of_a_small_document() {
        let program = program(|b| {
            b.template("doc", |t| {
                t.process_children();
            });
        });
        let mut trace = TraceRecorder::new();
        let mut out = EventRecorder::new();
        {
            let mut processor = Processor::new(&program, &mut out).with_observer(&mut trace);
            feed_str("<doc>t</doc>", &mut processor).unwrap();
        }
        assert_eq!(trace.lines[0], "start-document");
        assert!(trace.lines.contains(&"template `doc' for doc".to_string()));
        assert!(trace.lines.contains(&"enter 3 text(\"t\")".to_string()));
        assert!(trace.lines.contains(&"end template `doc'".to_string()));
        assert_eq!(trace.lines.last().map(String::as_str), Some("end-document"));
    }
}
