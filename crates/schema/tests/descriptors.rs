#![forbid(unsafe_code)]

use std::path::PathBuf;

use crdform_schema::{validate, AttrType, Registry};

fn shipped() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../descriptors")
}

#[test]
fn shipped_descriptors_load_and_compile() {
    let r = Registry::load_dir(&shipped()).unwrap();
    assert_eq!(r.type_names(), ["cert_manager_io_certificate_v1", "example_com_widget_v1"]);

    let cert = r.lookup("cert_manager_io_certificate_v1").unwrap();
    let spec = cert.schema.attribute("spec").unwrap();
    assert!(matches!(spec.child("dns_names").unwrap().ty, AttrType::List { .. }));
    assert!(matches!(spec.child("secret_template").unwrap().ty, AttrType::Object { .. }));

    let widget = r.lookup("example_com_widget_v1").unwrap();
    let spec = widget.descriptor.spec.as_ref().unwrap();
    assert_eq!(spec.child("target_port").unwrap().key, "targetPort");
}

#[test]
fn shipped_certificate_accepts_a_typical_configuration() {
    let r = Registry::load_dir(&shipped()).unwrap();
    let cert = r.lookup("cert_manager_io_certificate_v1").unwrap();
    let cfg = serde_json::json!({
        "metadata": { "name": "web", "namespace": "apps" },
        "spec": {
            "secret_name": "web-tls",
            "issuer_ref": { "name": "letsencrypt", "kind": "ClusterIssuer" },
            "dns_names": ["example.com", "www.example.com"],
            "duration": "2160h"
        }
    });
    let diags = validate(&cert.schema, &cfg);
    assert!(diags.is_empty(), "{:?}", diags);

    let bad = serde_json::json!({
        "metadata": { "name": "web" },
        "spec": { "secret_name": "web-tls", "issuer_ref": { "name": "x", "kind": "Vault" }, "duration": "90 days" }
    });
    assert_eq!(validate(&cert.schema, &bad).len(), 2);
}
