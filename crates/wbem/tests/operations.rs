mod common;

use std::sync::{Arc, Mutex};

use common::{cim_error, http_reply, imethod, instance, instance_name, named_instance, returning, FakeTransport};
use wbem::http::{OperationOutcome, StagedHttpRequest, StagedHttpResponse};
use wbem::{
    CimInstanceName, CimStatus, CimValue, ConnectionConfig, ErrorKind, GetClassOptions,
    GetInstanceOptions, ModifyInstanceOptions, ObjectPath, OperationRecorder,
};

#[test]
fn get_instance_uses_default_namespace() {
    let fake = FakeTransport::default();
    fake.push(imethod("GetInstance", &returning(&[instance("CIM_Foo", "foo")])));
    let mut conn = fake.connect(ConnectionConfig::default());

    let name = CimInstanceName::new("CIM_Foo").key("Name", "foo");
    let inst = conn
        .get_instance(&name, &GetInstanceOptions::default())
        .unwrap();

    let path = inst.path.as_ref().unwrap();
    assert_eq!(path.namespace.as_deref(), Some("root/cimv2"));
    assert_eq!(path.host, None);
    assert_eq!(path.keybindings.get("name"), Some(&Some(CimValue::from("foo"))));
    assert_eq!(inst.get("Name"), Some(&Some(CimValue::from("foo"))));

    let sent = fake.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].url, "http://srv:5988/cimom");
    assert_eq!(sent[0].header("CIMObject"), Some("root/cimv2"));
    assert!(sent[0]
        .body
        .contains("<LOCALNAMESPACEPATH><NAMESPACE NAME=\"root\"/><NAMESPACE NAME=\"cimv2\"/></LOCALNAMESPACEPATH>"));
    // The instance name goes out without namespace.
    assert!(sent[0].body.contains("<IPARAMVALUE NAME=\"InstanceName\"><INSTANCENAME CLASSNAME=\"CIM_Foo\">"));
}

#[test]
fn explicit_namespace_wins_and_is_stamped() {
    let fake = FakeTransport::default();
    fake.push(imethod(
        "EnumerateInstances",
        &returning(&[named_instance("CIM_Foo", "a"), named_instance("CIM_Foo", "b")]),
    ));
    let mut conn = fake.connect(ConnectionConfig::default());

    let found = conn
        .enumerate_instances(Some("/root/interop/"), "CIM_Foo", &Default::default())
        .unwrap();
    assert_eq!(found.len(), 2);
    for inst in &found {
        assert_eq!(
            inst.path.as_ref().and_then(|p| p.namespace.as_deref()),
            Some("root/interop")
        );
    }
    assert_eq!(fake.sent()[0].header("CIMObject"), Some("root/interop"));
}

#[test]
fn get_class_stamps_host_and_namespace() {
    let fake = FakeTransport::default();
    fake.push(imethod(
        "GetClass",
        "<IRETURNVALUE><CLASS NAME=\"CIM_Foo\" SUPERCLASS=\"CIM_Base\"/></IRETURNVALUE>",
    ));
    let mut conn = fake.connect(ConnectionConfig::default());
    let class = conn
        .get_class(None, "CIM_Foo", &GetClassOptions::default())
        .unwrap();
    let path = class.path.unwrap();
    assert_eq!(path.host.as_deref(), Some("srv:5988"));
    assert_eq!(path.namespace.as_deref(), Some("root/cimv2"));
    assert_eq!(class.superclass.as_deref(), Some("CIM_Base"));
}

#[test]
fn cim_error_carries_status_and_payloads() {
    let fake = FakeTransport::default();
    fake.push(cim_error("GetClass", 6));
    let mut conn = fake.connect(ConnectionConfig::default());

    let err = conn
        .get_class(None, "CIM_Missing", &GetClassOptions::default())
        .unwrap_err();
    let status = err.cim_status().unwrap();
    assert_eq!(status.status, CimStatus::NotFound);
    assert_eq!(status.description(), "scripted");
    let request = String::from_utf8_lossy(err.request().unwrap()).into_owned();
    assert!(request.contains("IMETHODCALL NAME=\"GetClass\""));
    assert!(err.response().is_some());
    // Payloads are not retained on the connection outside debug mode.
    assert!(conn.last_raw_request().is_none());
}

#[test]
fn unsupported_auth_scheme_is_reported() {
    let fake = FakeTransport::default();
    fake.push(http_reply(401, &[("WWW-Authenticate", "Negotiate")], String::new()));
    let mut conn = fake.connect(ConnectionConfig {
        credentials: Some(("user".into(), "pass".into())),
        ..ConnectionConfig::default()
    });

    let err = conn.enumerate_instance_names(None, "CIM_Foo").unwrap_err();
    match err.kind() {
        ErrorKind::Auth(msg) => {
            assert!(msg.contains("does not support the \"Basic\""), "{msg}");
            assert!(msg.contains("Negotiate"));
        }
        other => panic!("expected an auth error, got {other:?}"),
    }
}

#[test]
fn closed_connection_sends_nothing() {
    let fake = FakeTransport::default();
    let mut conn = fake.connect(ConnectionConfig::default());
    conn.close();
    assert!(conn.is_closed());

    let err = conn.enumerate_class_names(None, None, None).unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::Closed);
    assert!(fake.sent().is_empty());
}

#[test]
fn modify_instance_requires_a_path() {
    let fake = FakeTransport::default();
    let mut conn = fake.connect(ConnectionConfig::default());
    let inst = wbem::CimInstance::new("CIM_Foo");
    let err = conn
        .modify_instance(&inst, &ModifyInstanceOptions::default())
        .unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Value(_)));
    assert!(fake.sent().is_empty());
}

#[test]
fn associators_of_an_instance_yield_instances() {
    let fake = FakeTransport::default();
    fake.push(imethod(
        "Associators",
        &returning(&[common::instance_with_path("CIM_Bar", "x")]),
    ));
    let mut conn = fake.connect(ConnectionConfig::default());
    let source = ObjectPath::Instance(CimInstanceName::new("CIM_Foo").key("Name", "a"));
    let found = conn.associators(&source, &Default::default()).unwrap();
    assert_eq!(found.len(), 1);
    match &found[0] {
        wbem::AssociatedObject::Instance(inst) => {
            let path = inst.path.as_ref().unwrap();
            // A host reported by the server is kept.
            assert_eq!(path.host.as_deref(), Some("srv"));
        }
        other => panic!("expected an instance, got {other:?}"),
    }
}

#[test]
fn associator_names_reject_class_paths_for_instance_sources() {
    let fake = FakeTransport::default();
    fake.push(imethod(
        "AssociatorNames",
        "<IRETURNVALUE><OBJECTPATH><CLASSPATH><NAMESPACEPATH><HOST>srv</HOST>\
         <LOCALNAMESPACEPATH><NAMESPACE NAME=\"root\"/></LOCALNAMESPACEPATH></NAMESPACEPATH>\
         <CLASSNAME NAME=\"CIM_Bar\"/></CLASSPATH></OBJECTPATH></IRETURNVALUE>",
    ));
    let mut conn = fake.connect(ConnectionConfig::default());
    let source = ObjectPath::Instance(CimInstanceName::new("CIM_Foo").key("Name", "a"));
    let err = conn
        .associator_names(&source, &Default::default())
        .unwrap_err();
    assert!(matches!(
        err.kind(),
        ErrorKind::Parse {
            kind: wbem::ParseErrorKind::CimXml,
            ..
        }
    ));
}

#[test]
fn invoke_method_returns_typed_outputs() {
    let fake = FakeTransport::default();
    fake.push(common::http_reply(
        200,
        &[("Content-Type", "application/xml")],
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\
         <CIM CIMVERSION=\"2.0\" DTDVERSION=\"2.0\"><MESSAGE ID=\"1\" PROTOCOLVERSION=\"1.0\">\
         <SIMPLERSP><METHODRESPONSE NAME=\"Reset\">\
         <RETURNVALUE PARAMTYPE=\"uint32\"><VALUE>0</VALUE></RETURNVALUE>\
         <PARAMVALUE NAME=\"Job\" PARAMTYPE=\"string\"><VALUE>j1</VALUE></PARAMVALUE>\
         </METHODRESPONSE></SIMPLERSP></MESSAGE></CIM>"
            .to_string(),
    ));
    let mut conn = fake.connect(ConnectionConfig::default());
    let target = ObjectPath::Instance(CimInstanceName::new("CIM_Foo").key("Name", "a"));
    let result = conn
        .invoke_method("Reset", &target, &[("Force", Some(CimValue::Boolean(true)))])
        .unwrap();
    assert_eq!(result.return_value, Some(CimValue::Uint32(0)));
    assert_eq!(
        result.out_params.get("job"),
        Some(&Some(CimValue::from("j1")))
    );
    let sent = &fake.sent()[0];
    assert_eq!(sent.header("CIMMethod"), Some("Reset"));
    assert_eq!(sent.header("CIMObject"), Some("root/cimv2:CIM_Foo.Name=\"a\""));
    assert!(sent.body.contains("<PARAMVALUE NAME=\"Force\""));
}

#[derive(Clone, Default)]
struct Log(Arc<Mutex<Vec<String>>>);

impl OperationRecorder for Log {
    fn enabled(&self) -> bool {
        true
    }
    fn enable(&mut self) {}
    fn disable(&mut self) {}
    fn reset(&mut self) {
        self.0.lock().unwrap().push("reset".into());
    }
    fn stage_operation(&mut self, _: &str, method: &str, args: &[(String, String)]) {
        let names: Vec<&str> = args.iter().map(|(k, _)| k.as_str()).collect();
        self.0
            .lock()
            .unwrap()
            .push(format!("op {method} {}", names.join(",")));
    }
    fn stage_http_request(&mut self, _: &str, request: &StagedHttpRequest) {
        self.0.lock().unwrap().push(format!("req {}", request.target));
    }
    fn stage_http_response1(&mut self, _: &str, response: Option<&StagedHttpResponse>) {
        self.0
            .lock()
            .unwrap()
            .push(format!("resp1 {:?}", response.map(|r| r.status)));
    }
    fn stage_http_response2(&mut self, payload: Option<&[u8]>) {
        self.0
            .lock()
            .unwrap()
            .push(format!("resp2 {}", payload.is_some()));
    }
    fn stage_result(&mut self, outcome: &OperationOutcome) {
        let kind = match outcome {
            OperationOutcome::Success(_) => "ok",
            OperationOutcome::Failure(_) => "err",
        };
        self.0.lock().unwrap().push(format!("result {kind}"));
    }
}

#[test]
fn recorders_see_every_phase_even_on_failure() {
    let fake = FakeTransport::default();
    fake.push(imethod(
        "EnumerateInstanceNames",
        &returning(&[instance_name("CIM_Foo", "a")]),
    ));
    fake.push(cim_error("EnumerateInstanceNames", 5));
    let mut conn = fake.connect(ConnectionConfig::default());
    let log = Log::default();
    conn.add_operation_recorder(Box::new(log.clone()));

    conn.enumerate_instance_names(None, "CIM_Foo").unwrap();
    conn.enumerate_instance_names(None, "CIM_Foo").unwrap_err();

    let phases = log.0.lock().unwrap().clone();
    let one = [
        "reset",
        "op EnumerateInstanceNames ClassName,namespace",
        "req /cimom",
        "resp1 None",
        "resp2 false",
        "resp1 Some(200)",
        "resp2 true",
    ];
    let mut expected: Vec<String> = one.iter().map(|s| s.to_string()).collect();
    expected.push("result ok".into());
    expected.extend(one.iter().map(|s| s.to_string()));
    expected.push("result err".into());
    assert_eq!(phases, expected);
}

#[test]
fn statistics_and_debug_payloads() {
    let fake = FakeTransport::default();
    fake.push(imethod("EnumerateClassNames", "<IRETURNVALUE><CLASSNAME NAME=\"CIM_A\"/></IRETURNVALUE>"));
    fake.push(cim_error("EnumerateClassNames", 1));
    let mut conn = fake.connect(ConnectionConfig {
        stats_enabled: true,
        ..ConnectionConfig::default()
    });
    conn.set_debug(true);

    let names = conn.enumerate_class_names(None, None, Some(true)).unwrap();
    assert_eq!(names, vec!["CIM_A".to_string()]);
    assert!(conn.last_request().unwrap().contains("DeepInheritance"));
    assert!(conn.last_raw_reply().is_some());
    assert!(conn.last_reply_len() > 0);
    assert!(conn.last_operation_time().is_some());

    conn.enumerate_class_names(None, None, None).unwrap_err();
    let stats = conn.statistics().get("EnumerateClassNames").unwrap();
    assert_eq!(stats.count, 2);
    assert_eq!(stats.exception_count, 1);
}

#[test]
fn copy_starts_a_fresh_session() {
    let fake = FakeTransport::default();
    let mut conn = fake.connect(ConnectionConfig::default());
    conn.set_default_namespace("/root/interop/");
    conn.close();
    let copy = conn.copy().unwrap();
    assert!(!copy.is_closed());
    assert_ne!(copy.conn_id(), conn.conn_id());
    assert_eq!(copy.default_namespace(), "root/interop");
}
