mod common;

use common::{cim_error, imethod, instance_with_path, named_instance, pull_params, returning, FakeTransport};
use wbem::{
    CimInstanceName, ConnectionConfig, EnumerationContext, ErrorKind, IterOptions, OpenOptions,
    PullFamily,
};

fn open_reply(method: &str, names: &[&str], eos: bool, context: Option<&str>) -> wbem::http::HttpResponse {
    let items: Vec<String> = names
        .iter()
        .map(|n| instance_with_path("CIM_Foo", n))
        .collect();
    imethod(method, &format!("{}{}", returning(&items), pull_params(eos, context)))
}

#[test]
fn open_then_pull_to_the_end() {
    let fake = FakeTransport::default();
    fake.push(open_reply("OpenEnumerateInstances", &["a"], false, Some("ctx-1")));
    fake.push(open_reply("PullInstancesWithPath", &["b"], true, None));
    let mut conn = fake.connect(ConnectionConfig::default());

    let first = conn
        .open_enumerate_instances(
            Some("root/cimv2"),
            "CIM_Foo",
            &Default::default(),
            &OpenOptions {
                max_object_count: Some(1),
                operation_timeout: Some(30),
                ..OpenOptions::default()
            },
        )
        .unwrap();
    assert!(!first.eos);
    assert_eq!(first.items.len(), 1);
    let context = first.context.unwrap();
    assert_eq!(context.context(), "ctx-1");
    assert_eq!(context.namespace(), "root/cimv2");

    let second = conn.pull_instances_with_path(context, Some(5)).unwrap();
    assert!(second.eos);
    assert!(second.context.is_none());
    assert_eq!(second.items.len(), 1);

    let sent = fake.sent();
    assert!(sent[0].body.contains("<IPARAMVALUE NAME=\"MaxObjectCount\"><VALUE>1</VALUE>"));
    assert!(sent[0].body.contains("<IPARAMVALUE NAME=\"OperationTimeout\"><VALUE>30</VALUE>"));
    assert!(sent[1].body.contains("<IPARAMVALUE NAME=\"EnumerationContext\"><VALUE>ctx-1</VALUE>"));
    assert_eq!(sent[1].header("CIMObject"), Some("root/cimv2"));
}

#[test]
fn open_with_immediate_end_has_no_context() {
    let fake = FakeTransport::default();
    fake.push(imethod(
        "OpenEnumerateInstancePaths",
        &format!(
            "{}{}",
            returning(&[common::instance_name("CIM_Foo", "a")]),
            pull_params(true, Some(""))
        ),
    ));
    let mut conn = fake.connect(ConnectionConfig::default());
    let result = conn
        .open_enumerate_instance_paths(None, "CIM_Foo", &OpenOptions::default())
        .unwrap();
    assert!(result.eos);
    assert!(result.context.is_none());
    assert_eq!(
        result.items[0].namespace.as_deref(),
        Some("root/cimv2")
    );
}

#[test]
fn missing_context_is_a_grammar_error() {
    let fake = FakeTransport::default();
    fake.push(open_reply("OpenEnumerateInstances", &["a"], false, None));
    let mut conn = fake.connect(ConnectionConfig::default());
    let err = conn
        .open_enumerate_instances(None, "CIM_Foo", &Default::default(), &OpenOptions::default())
        .unwrap_err();
    assert!(matches!(
        err.kind(),
        ErrorKind::Parse {
            kind: wbem::ParseErrorKind::CimXml,
            ..
        }
    ));
    assert!(err.response().is_some());
}

#[test]
fn close_enumeration_sends_the_context() {
    let fake = FakeTransport::default();
    fake.push(imethod("CloseEnumeration", ""));
    let mut conn = fake.connect(ConnectionConfig::default());
    conn.close_enumeration(EnumerationContext::new("ctx-9", "root/interop"))
        .unwrap();
    let sent = fake.sent();
    assert_eq!(sent[0].method(), "CloseEnumeration");
    assert_eq!(sent[0].header("CIMObject"), Some("root/interop"));
    assert!(sent[0].body.contains("ctx-9"));
}

#[test]
fn fallback_is_decided_once() {
    let fake = FakeTransport::default();
    fake.push(cim_error("OpenEnumerateInstances", 7));
    fake.push(imethod("EnumerateInstances", &returning(&[named_instance("CIM_Foo", "a")])));
    fake.push(imethod("EnumerateInstances", &returning(&[named_instance("CIM_Foo", "b")])));
    let mut conn = fake.connect(ConnectionConfig::default());
    let iter = IterOptions::default();

    let first: Vec<_> = conn
        .iter_enumerate_instances(None, "CIM_Foo", &Default::default(), &iter)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(conn.capabilities().get(PullFamily::EnumerateInstances), Some(false));
    // Other families are unaffected.
    assert_eq!(conn.capabilities().get(PullFamily::EnumerateInstancePaths), None);

    let second: Vec<_> = conn
        .iter_enumerate_instances(None, "CIM_Foo", &Default::default(), &iter)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(fake.count("OpenEnumerateInstances"), 1);
    assert_eq!(fake.count("EnumerateInstances"), 2);
}

#[test]
fn failed_code_also_triggers_fallback() {
    let fake = FakeTransport::default();
    fake.push(cim_error("OpenEnumerateInstancePaths", 1));
    fake.push(imethod(
        "EnumerateInstanceNames",
        &returning(&[common::instance_name("CIM_Foo", "a")]),
    ));
    let mut conn = fake.connect(ConnectionConfig::default());
    let cursor = conn
        .iter_enumerate_instance_paths(None, "CIM_Foo", &IterOptions::default())
        .unwrap();
    assert!(!cursor.is_pulled());
    assert_eq!(cursor.count(), 1);
}

#[test]
fn confirmed_pull_does_not_fall_back() {
    let fake = FakeTransport::default();
    fake.push(cim_error("OpenEnumerateInstances", 7));
    let mut conn = fake.connect(ConnectionConfig {
        use_pull: Some(true),
        ..ConnectionConfig::default()
    });
    let err = conn
        .iter_enumerate_instances(None, "CIM_Foo", &Default::default(), &IterOptions::default())
        .unwrap_err();
    assert_eq!(err.cim_status().map(|s| s.code()), Some(7));
    assert_eq!(fake.count("EnumerateInstances"), 0);
}

#[test]
fn other_errors_propagate_without_fallback() {
    let fake = FakeTransport::default();
    fake.push(cim_error("OpenEnumerateInstances", 5));
    let mut conn = fake.connect(ConnectionConfig::default());
    assert!(conn
        .iter_enumerate_instances(None, "CIM_Foo", &Default::default(), &IterOptions::default())
        .is_err());
    assert_eq!(conn.capabilities().get(PullFamily::EnumerateInstances), None);
}

#[test]
fn iteration_pulls_every_batch() {
    let fake = FakeTransport::default();
    fake.push(open_reply("OpenEnumerateInstances", &["a", "b"], false, Some("c1")));
    fake.push(open_reply("PullInstancesWithPath", &[], false, Some("c2")));
    fake.push(open_reply("PullInstancesWithPath", &["c"], true, None));
    let mut conn = fake.connect(ConnectionConfig::default());

    let names: Vec<String> = conn
        .iter_enumerate_instances(
            None,
            "CIM_Foo",
            &Default::default(),
            &IterOptions {
                max_object_count: 2,
                ..IterOptions::default()
            },
        )
        .unwrap()
        .map(|inst| inst.unwrap().path.unwrap().keybindings.get("Name").unwrap().as_ref().unwrap().to_string())
        .collect();
    assert_eq!(names.len(), 3);
    assert_eq!(conn.capabilities().get(PullFamily::EnumerateInstances), Some(true));
    assert_eq!(fake.count("PullInstancesWithPath"), 2);
    assert_eq!(fake.count("CloseEnumeration"), 0);
}

#[test]
fn abandoned_cursor_closes_the_session() {
    let fake = FakeTransport::default();
    fake.push(open_reply("OpenEnumerateInstances", &["a"], false, Some("c1")));
    fake.push(imethod("CloseEnumeration", ""));
    let mut conn = fake.connect(ConnectionConfig::default());

    {
        let mut cursor = conn
            .iter_enumerate_instances(None, "CIM_Foo", &Default::default(), &IterOptions::default())
            .unwrap();
        assert!(cursor.has_next_batch());
        assert!(cursor.next().unwrap().is_ok());
    }
    assert_eq!(fake.count("CloseEnumeration"), 1);
    assert!(fake.sent()[1].body.contains("c1"));
}

#[test]
fn failed_pull_still_closes_the_session() {
    let fake = FakeTransport::default();
    fake.push(open_reply("OpenEnumerateInstances", &["a"], false, Some("c1")));
    fake.push(cim_error("PullInstancesWithPath", 4));
    fake.push(imethod("CloseEnumeration", ""));
    let mut conn = fake.connect(ConnectionConfig::default());

    {
        let mut cursor = conn
            .iter_enumerate_instances(None, "CIM_Foo", &Default::default(), &IterOptions::default())
            .unwrap();
        assert!(cursor.next().unwrap().is_ok());
        let err = cursor.next().unwrap().unwrap_err();
        assert_eq!(err.cim_status().map(|s| s.code()), Some(4));
        assert!(cursor.has_next_batch());
    }
    assert_eq!(fake.count("CloseEnumeration"), 1);
    assert!(fake.sent()[2].body.contains("c1"));
}

#[test]
fn batches_can_be_taken_whole() {
    let fake = FakeTransport::default();
    fake.push(open_reply("OpenEnumerateInstances", &["a", "b"], false, Some("c1")));
    fake.push(open_reply("PullInstancesWithPath", &["c"], true, None));
    let mut conn = fake.connect(ConnectionConfig::default());
    let mut cursor = conn
        .iter_enumerate_instances(None, "CIM_Foo", &Default::default(), &IterOptions::default())
        .unwrap();
    assert_eq!(cursor.next_batch().unwrap().map(|b| b.len()), Some(2));
    assert_eq!(cursor.next_batch().unwrap().map(|b| b.len()), Some(1));
    assert!(!cursor.has_next_batch());
    assert!(cursor.next_batch().unwrap().is_none());
    cursor.close().unwrap();
    assert_eq!(fake.count("CloseEnumeration"), 0);
}

#[test]
fn zero_batch_size_is_rejected_before_sending() {
    let fake = FakeTransport::default();
    let mut conn = fake.connect(ConnectionConfig::default());
    let err = conn
        .iter_enumerate_instance_paths(
            None,
            "CIM_Foo",
            &IterOptions {
                max_object_count: 0,
                ..IterOptions::default()
            },
        )
        .unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Value(_)));
    assert!(fake.sent().is_empty());
}

#[test]
fn filters_cannot_be_forced_onto_traditional_operations() {
    let fake = FakeTransport::default();
    let mut conn = fake.connect(ConnectionConfig {
        use_pull: Some(false),
        ..ConnectionConfig::default()
    });
    let source = CimInstanceName::new("CIM_Foo").key("Name", "a");
    let err = conn
        .iter_reference_instances(
            &source,
            &Default::default(),
            &IterOptions {
                filter_query_language: Some("DMTF:FQL".into()),
                filter_query: Some("Name = 'x'".into()),
                ..IterOptions::default()
            },
        )
        .unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Value(_)));
    assert!(fake.sent().is_empty());
}
